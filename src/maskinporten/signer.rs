//! Sign assertions with the client RSA key.

use std::fmt;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use secrecy::{ExposeSecret, SecretString};

use super::{AssertionClaims, ClientCredentialConfig};
use crate::error::GatewayError;

/// Algorithm mandated by Maskinporten.
pub const ALGORITHM: Algorithm = Algorithm::RS256;

/// Compact JWS (`header.claims.signature`). Built for a single exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedAssertion(String);

impl SignedAssertion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignedAssertion([REDACTED])")
    }
}

/// Signs [`AssertionClaims`] with RS256.
pub struct AssertionSigner<'a> {
    private_key: &'a SecretString,
    key_id: Option<&'a str>,
}

impl<'a> AssertionSigner<'a> {
    /// Create a new [`AssertionSigner`].
    ///
    /// An absent key is a configuration error; a present but unusable one
    /// only fails on [`AssertionSigner::sign`].
    pub fn new(credentials: &'a ClientCredentialConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            private_key: credentials.private_key()?,
            key_id: credentials.key_id(),
        })
    }

    pub fn sign(
        &self,
        claims: &AssertionClaims,
    ) -> Result<SignedAssertion, GatewayError> {
        let key = EncodingKey::from_rsa_pem(
            self.private_key.expose_secret().as_bytes(),
        )
        .map_err(GatewayError::Signing)?;

        let mut header = Header::new(ALGORITHM);
        header.kid = self.key_id.map(str::to_owned);

        encode(&header, claims, &key)
            .map(SignedAssertion)
            .map_err(GatewayError::Signing)
    }
}
