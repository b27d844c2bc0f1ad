//! Claim set of the JWT-bearer assertion (RFC 7523).

use serde::{Deserialize, Serialize};
use url::Url;

use super::ClientCredentialConfig;
use crate::error::GatewayError;

/// Lifetime of an assertion, in seconds.
///
/// Maskinporten rejects assertions valid for longer than two minutes.
pub const ASSERTION_LIFETIME: u64 = 120;

/// Pieces of information asserted to the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Client ID.
    #[serde(rename = "iss")]
    pub issuer: String,
    /// Client ID, the client acts on its own behalf.
    #[serde(rename = "sub")]
    pub subject: String,
    /// Token endpoint.
    #[serde(rename = "aud")]
    pub audience: String,
    /// Requested permissions, space-delimited.
    pub scope: String,
    /// Time after which the assertion is rejected.
    #[serde(rename = "exp")]
    pub expires_at: u64,
    /// Time at which the assertion was built.
    #[serde(rename = "iat")]
    pub issued_at: u64,
}

/// Builds [`AssertionClaims`] out of client credentials.
pub struct AssertionBuilder<'a> {
    credentials: &'a ClientCredentialConfig,
}

impl<'a> AssertionBuilder<'a> {
    pub fn new(credentials: &'a ClientCredentialConfig) -> Self {
        Self { credentials }
    }

    /// Claims valid from `now` (seconds since epoch) for
    /// [`ASSERTION_LIFETIME`].
    pub fn build(&self, now: u64) -> Result<AssertionClaims, GatewayError> {
        let client_id = self.credentials.client_id()?;
        let token_endpoint = self.credentials.token_endpoint()?;
        let scope = self.credentials.scope()?;

        match Url::parse(token_endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => (),
            _ => {
                return Err(GatewayError::Configuration(format!(
                    "`token_endpoint` is not an http(s) URL: {token_endpoint}"
                )));
            },
        }

        Ok(AssertionClaims {
            issuer: client_id.to_owned(),
            subject: client_id.to_owned(),
            audience: token_endpoint.to_owned(),
            scope: scope.to_owned(),
            expires_at: now + ASSERTION_LIFETIME,
            issued_at: now,
        })
    }
}
