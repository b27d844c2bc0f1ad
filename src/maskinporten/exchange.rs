//! JWT-bearer grant: trade a signed assertion for an access token.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use reqwest::redirect::Policy;
use serde::Deserialize;

use super::{AssertionBuilder, AssertionSigner, ClientCredentialConfig};
use crate::clock::Clock;
use crate::error::GatewayError;

pub const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const MAX_ERROR_BODY: usize = 200;

/// Bearer token returned by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
}

/// Body of a rejected token request (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthError {
    error: String,
    error_description: Option<String>,
}

fn rejection_message(body: &[u8]) -> String {
    if let Ok(err) = serde_json::from_slice::<OAuthError>(body) {
        return match err.error_description {
            Some(description) => format!("{}: {description}", err.error),
            None => err.error,
        };
    }

    String::from_utf8_lossy(body)
        .trim()
        .chars()
        .take(MAX_ERROR_BODY)
        .collect()
}

/// Obtains a fresh access token for every call. Nothing is cached.
pub struct TokenExchanger {
    credentials: Arc<ClientCredentialConfig>,
    clock: Arc<dyn Clock>,
    client: reqwest::Client,
}

impl TokenExchanger {
    /// Create a new [`TokenExchanger`].
    ///
    /// Its HTTP client never follows redirects.
    pub fn new(
        credentials: Arc<ClientCredentialConfig>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            credentials,
            clock,
            client,
        })
    }

    pub fn credentials(&self) -> &ClientCredentialConfig {
        &self.credentials
    }

    /// Build, sign and exchange a new assertion.
    ///
    /// Configuration and signing errors are raised before any network
    /// activity. The request is attempted once.
    pub async fn exchange(&self) -> Result<AccessToken, GatewayError> {
        let start = Instant::now();
        let result = self.try_exchange().await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        metrics::counter!("token_exchanges_total", "outcome" => outcome).increment(1);
        metrics::histogram!("token_exchange_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn try_exchange(&self) -> Result<AccessToken, GatewayError> {
        let claims =
            AssertionBuilder::new(&self.credentials).build(self.clock.now())?;
        let assertion = AssertionSigner::new(&self.credentials)?.sign(&claims)?;
        let endpoint = self.credentials.token_endpoint()?;

        tracing::debug!(%endpoint, expires_at = claims.expires_at, "exchanging assertion");

        let response = self
            .client
            .post(endpoint)
            .timeout(self.credentials.timeout())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(GatewayError::Transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(GatewayError::Transport)?;

        if !status.is_success() {
            return Err(GatewayError::TokenExchange {
                status: status.as_u16(),
                message: rejection_message(&body),
            });
        }

        let token = serde_json::from_slice::<TokenResponse>(&body)
            .map_err(|err| GatewayError::TokenResponse(err.to_string()))?;

        match token.access_token {
            Some(access_token) if !access_token.is_empty() => {
                tracing::info!(
                    expires_in = ?token.expires_in,
                    scope = ?token.scope,
                    "maskinporten token obtained"
                );
                Ok(AccessToken(access_token))
            },
            _ => Err(GatewayError::TokenResponse(
                "missing `access_token` field".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jsonwebtoken::{DecodingKey, Validation, decode};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::*;
    use crate::clock::{FixedClock, SystemClock};
    use crate::fixtures::{PRIVATE_KEY, PUBLIC_KEY};
    use crate::maskinporten::AssertionClaims;

    const SCOPE: &str = "brreg:regnskap";

    fn exchanger(credentials: ClientCredentialConfig) -> TokenExchanger {
        TokenExchanger::new(Arc::new(credentials), Arc::new(SystemClock)).unwrap()
    }

    fn credentials(server: &MockServer, pem: &str) -> ClientCredentialConfig {
        ClientCredentialConfig::new(
            "client-1",
            pem,
            format!("{}/token", server.uri()),
            SCOPE,
        )
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
            ))
            .and(body_string_contains("assertion="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "abc123",
                "token_type": "Bearer",
                "expires_in": 119,
                "scope": SCOPE,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = exchanger(credentials(&server, PRIVATE_KEY))
            .exchange()
            .await
            .unwrap();
        assert_eq!(token, AccessToken::new("abc123"));
    }

    #[tokio::test]
    async fn test_assertion_sent_is_verifiable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "abc123"})),
            )
            .mount(&server)
            .await;

        let exchanger = TokenExchanger::new(
            Arc::new(credentials(&server, PRIVATE_KEY)),
            Arc::new(FixedClock::new(1_000)),
        )
        .unwrap();
        exchanger.exchange().await.unwrap();

        let requests: Vec<Request> = server.received_requests().await.unwrap();
        let form: Vec<(String, String)> =
            url::form_urlencoded::parse(&requests[0].body).into_owned().collect();
        let assertion = form
            .iter()
            .find(|(key, _)| key == "assertion")
            .map(|(_, value)| value.clone())
            .unwrap();

        let mut validation = Validation::new(jsonwebtoken::Algorithm::RS256);
        validation.set_audience(&[format!("{}/token", server.uri())]);
        validation.validate_exp = false;
        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
        let claims = decode::<AssertionClaims>(&assertion, &key, &validation)
            .unwrap()
            .claims;

        assert_eq!(claims.issued_at, 1_000);
        assert_eq!(claims.expires_at, 1_120);
        assert_eq!(claims.issuer, "client-1");
        assert_eq!(claims.scope, SCOPE);
    }

    #[tokio::test]
    async fn test_exchange_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid assertion. Client authentication failed.",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = exchanger(credentials(&server, PRIVATE_KEY))
            .exchange()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "TokenExchangeError");
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_exchange_missing_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"token_type": "Bearer", "expires_in": 120})),
            )
            .mount(&server)
            .await;

        let err = exchanger(credentials(&server, PRIVATE_KEY))
            .exchange()
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::TokenResponse(_)));
    }

    #[tokio::test]
    async fn test_exchange_invalid_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let err = exchanger(credentials(&server, PRIVATE_KEY))
            .exchange()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TokenResponseError");
    }

    #[tokio::test]
    async fn test_malformed_key_never_reaches_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let exchanger = exchanger(credentials(&server, "not a pem"));
        for _ in 0..3 {
            let err = exchanger.exchange().await.unwrap_err();
            assert_eq!(err.kind(), "SigningError");
        }
    }

    #[tokio::test]
    async fn test_missing_configuration() {
        let err = exchanger(ClientCredentialConfig::from(None))
            .exchange()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let credentials = ClientCredentialConfig::new(
            "client-1",
            PRIVATE_KEY,
            format!("http://{addr}/token"),
            SCOPE,
        );
        let err = exchanger(credentials).exchange().await.unwrap_err();
        assert_eq!(err.kind(), "TransportError");
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "abc123"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let credentials = credentials(&server, PRIVATE_KEY)
            .with_timeout(Duration::from_millis(200));
        let err = exchanger(credentials).exchange().await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(ref e) if e.is_timeout()));
    }

    #[test]
    fn test_rejection_message() {
        assert_eq!(rejection_message(br#"{"error":"invalid_scope"}"#), "invalid_scope");
        assert_eq!(rejection_message(b"  Bad Request \n"), "Bad Request");
        assert_eq!(rejection_message(&[b'x'; 500]).len(), MAX_ERROR_BODY);
    }

    #[test]
    fn test_debug_is_redacted() {
        assert_eq!(
            format!("{:?}", AccessToken::new("abc123")),
            "AccessToken([REDACTED])"
        );
    }
}
