//! Registry HTTP API, mounted under `/api`.

pub mod enheter;
pub mod regnskap;
pub mod status;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Router, middleware};
use url::Url;

use crate::{AppState, ServerError};

/// Every `/api` path, unknown ones included, is behind Basic authentication.
pub fn api(state: AppState) -> Router<AppState> {
    Router::new()
        // `GET /api/enheter` goes to `enheter`.
        .route("/enheter", get(enheter::handler))
        // `GET /api/regnskap/:ORGNR` goes to `regnskap`.
        .route("/regnskap/{orgnr}", get(regnskap::handler))
        // `GET /api/regnskap/:ORGNR/historikk` goes to `regnskap`. Maskinporten token required.
        .route("/regnskap/{orgnr}/historikk", get(regnskap::historikk))
        // Unknown `/api` paths never reach the static files.
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(middleware::from_fn_with_state(
            state,
            crate::middleware::basic_auth,
        ))
}

/// Append encoded path segments to an upstream base URL.
pub(crate) fn resource_url(
    base: &str,
    segments: &[&str],
) -> Result<Url, ServerError> {
    let invalid = || ServerError::Internal {
        details: format!("invalid upstream URL `{base}`"),
        source: None,
    };

    let mut url = Url::parse(base).map_err(|_| invalid())?;
    if !segments.is_empty() {
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
    }

    Ok(url)
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub fn state(config: crate::config::Configuration) -> AppState {
    crate::initialize_state(std::sync::Arc::new(config), None)
        .expect("cannot build state")
}
