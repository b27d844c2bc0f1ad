//! Maskinporten client: JWT-bearer assertions exchanged for access tokens.
//!
//! Each exchange builds and signs a new assertion, valid for two minutes, then
//! posts it once to the token endpoint.

mod assertion;
mod credentials;
mod exchange;
mod signer;

pub use assertion::{ASSERTION_LIFETIME, AssertionBuilder, AssertionClaims};
pub use credentials::ClientCredentialConfig;
pub use exchange::{AccessToken, GRANT_TYPE, TokenExchanger};
pub use signer::{ALGORITHM, AssertionSigner, SignedAssertion};
