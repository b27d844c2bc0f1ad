//! Client credentials used to obtain Maskinporten tokens.

use std::time::Duration;

use secrecy::SecretString;

use crate::config::Maskinporten;
use crate::error::GatewayError;

const DEFAULT_TIMEOUT: u64 = 10;

/// Immutable credentials of the Maskinporten client.
///
/// Fields may be missing: the check is deferred to the first exchange, so a
/// process without credentials still serves the public routes.
#[derive(Debug, Clone)]
pub struct ClientCredentialConfig {
    client_id: Option<String>,
    key_id: Option<String>,
    private_key: Option<SecretString>,
    token_endpoint: Option<String>,
    scope: Option<String>,
    timeout: Duration,
}

impl Default for ClientCredentialConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            key_id: None,
            private_key: None,
            token_endpoint: None,
            scope: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT),
        }
    }
}

impl From<Option<&Maskinporten>> for ClientCredentialConfig {
    fn from(config: Option<&Maskinporten>) -> Self {
        let Some(config) = config else {
            return Self::default();
        };

        Self {
            client_id: config.client_id.clone(),
            key_id: config.key_id.clone(),
            private_key: config.private_key_pem.clone(),
            token_endpoint: config.token_endpoint.clone(),
            scope: config.scope.clone(),
            timeout: Duration::from_secs(
                config
                    .timeout
                    .filter(|timeout| *timeout > 0)
                    .unwrap_or(DEFAULT_TIMEOUT),
            ),
        }
    }
}

fn required<'a>(
    value: &'a Option<String>,
    name: &str,
) -> Result<&'a str, GatewayError> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(GatewayError::Configuration(format!("missing `{name}`"))),
    }
}

impl ClientCredentialConfig {
    /// Create a new [`ClientCredentialConfig`] with every required field set.
    pub fn new(
        client_id: impl Into<String>,
        private_key_pem: impl Into<String>,
        token_endpoint: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            client_id: Some(client_id.into()),
            private_key: Some(SecretString::new(private_key_pem.into())),
            token_endpoint: Some(token_endpoint.into()),
            scope: Some(scope.into()),
            ..Default::default()
        }
    }

    /// Set `kid` header of signed assertions.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Set token exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client_id(&self) -> Result<&str, GatewayError> {
        required(&self.client_id, "client_id")
    }

    pub fn token_endpoint(&self) -> Result<&str, GatewayError> {
        required(&self.token_endpoint, "token_endpoint")
    }

    pub fn scope(&self) -> Result<&str, GatewayError> {
        required(&self.scope, "scope")
    }

    pub fn private_key(&self) -> Result<&SecretString, GatewayError> {
        self.private_key.as_ref().ok_or_else(|| {
            GatewayError::Configuration("missing `private_key_pem`".into())
        })
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref().filter(|kid| !kid.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Names of the required fields that are absent or blank.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_id().is_err() {
            missing.push("client_id");
        }
        if self.private_key().is_err() {
            missing.push("private_key_pem");
        }
        if self.token_endpoint().is_err() {
            missing.push("token_endpoint");
        }
        if self.scope().is_err() {
            missing.push("scope");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}
