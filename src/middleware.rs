//! Middlewares for routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use base64ct::{Base64, Encoding};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;

use crate::ServerError;
use crate::config::Configuration;
use crate::error::Result;

/// Extract `(username, password)` from a `Basic` authorization header.
fn parse_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = Base64::decode_vec(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    Some((username.to_owned(), password.to_owned()))
}

/// Middleware rejecting requests without the configured Basic credentials.
pub async fn basic_auth(
    State(config): State<Arc<Configuration>>,
    req: Request,
    next: Next,
) -> Result<Response> {
    let Some((username, password)) = parse_basic(req.headers()) else {
        return Err(ServerError::Unauthorized);
    };

    let expected = &config.auth;
    let valid = username.as_bytes().ct_eq(expected.username.as_bytes())
        & password
            .as_bytes()
            .ct_eq(expected.password.expose_secret().as_bytes());

    if bool::from(valid) {
        Ok(next.run(req).await)
    } else {
        tracing::debug!(%username, "rejected basic credentials");
        Err(ServerError::Unauthorized)
    }
}
