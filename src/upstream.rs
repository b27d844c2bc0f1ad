//! Calls to the Brønnøysund registry.
//!
//! JSON bodies are checked for well-formedness, then relayed byte for byte.

use std::time::{Duration, Instant};

use reqwest::header::ACCEPT;
use serde_json::value::RawValue;
use url::Url;

use crate::error::GatewayError;
use crate::maskinporten::AccessToken;

/// Single-attempt GET of registry resources, with or without a bearer token.
#[derive(Clone, Debug)]
pub struct AuthorizedFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl AuthorizedFetcher {
    /// Create a new [`AuthorizedFetcher`].
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            timeout,
        })
    }

    /// GET `url` authorized by `token`. `query` is forwarded verbatim.
    pub async fn fetch(
        &self,
        url: Url,
        token: &AccessToken,
        query: Option<&str>,
    ) -> Result<Box<RawValue>, GatewayError> {
        self.get_json(url, query, Some(token)).await
    }

    /// GET a public resource.
    pub async fn fetch_public(
        &self,
        url: Url,
        query: Option<&str>,
    ) -> Result<Box<RawValue>, GatewayError> {
        self.get_json(url, query, None).await
    }

    async fn get_json(
        &self,
        mut url: Url,
        query: Option<&str>,
        token: Option<&AccessToken>,
    ) -> Result<Box<RawValue>, GatewayError> {
        url.set_query(query.filter(|q| !q.is_empty()));

        let start = Instant::now();
        let result = self.send(&url, token).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(_) => "failure",
        };
        metrics::counter!("upstream_requests_total", "outcome" => outcome).increment(1);
        tracing::debug!(
            %url,
            authorized = token.is_some(),
            outcome,
            latency = ?start.elapsed(),
            "upstream request finished"
        );

        result
    }

    async fn send(
        &self,
        url: &Url,
        token: Option<&AccessToken>,
    ) -> Result<Box<RawValue>, GatewayError> {
        let mut request = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }

        let response = request.send().await.map_err(|err| GatewayError::Upstream {
            status: None,
            message: err.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream {
                status: Some(status.as_u16()),
                message: format!("HTTP {} on {url}", status.as_u16()),
            });
        }

        let invalid = |err: &dyn std::fmt::Display| GatewayError::Upstream {
            status: Some(status.as_u16()),
            message: format!("invalid JSON on {url}: {err}"),
        };
        let body = response.bytes().await.map_err(|err| invalid(&err))?;

        serde_json::from_slice::<Box<RawValue>>(&body).map_err(|err| invalid(&err))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fetcher() -> AuthorizedFetcher {
        AuthorizedFetcher::new(Duration::from_secs(5)).unwrap()
    }

    fn url(server: &MockServer, path: &str) -> Url {
        Url::parse(&format!("{}{path}", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_authorized_pass_through() {
        let server = MockServer::start().await;
        let body = json!({"orgnr": "999", "data": []});
        Mock::given(method("GET"))
            .and(path("/regnskap/999/historikk"))
            .and(header("authorization", "Bearer abc123"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let json = fetcher()
            .fetch(
                url(&server, "/regnskap/999/historikk"),
                &AccessToken::new("abc123"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(json.get()).unwrap(), body);
    }

    #[tokio::test]
    async fn test_key_order_is_preserved() {
        let server = MockServer::start().await;
        let raw = r#"{"zeta":1,"alpha":{"b":2,"a":1}}"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(raw, "application/json"))
            .mount(&server)
            .await;

        let json = fetcher()
            .fetch_public(url(&server, "/enheter"), None)
            .await
            .unwrap();
        assert_eq!(json.get(), raw);
    }

    #[tokio::test]
    async fn test_numbers_are_relayed_verbatim() {
        let server = MockServer::start().await;
        let raw = r#"{"sumDriftsinntekter":1.10,"egenkapital":123456789012345678901,"e":1e2}"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(raw, "application/json"))
            .mount(&server)
            .await;

        let json = fetcher()
            .fetch(url(&server, "/regnskap/999"), &AccessToken::new("abc123"), None)
            .await
            .unwrap();
        assert_eq!(serde_json::to_string(&json).unwrap(), raw);
    }

    #[tokio::test]
    async fn test_query_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/enheter"))
            .and(query_param("navn", "æøå as"))
            .and(query_param("size", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"page": {}})))
            .expect(1)
            .mount(&server)
            .await;

        fetcher()
            .fetch_public(url(&server, "/enheter"), Some("navn=%C3%A6%C3%B8%C3%A5+as&size=20"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_public_call_has_no_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        fetcher()
            .fetch_public(url(&server, "/regnskap/999"), None)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch(url(&server, "/regnskap/999"), &AccessToken::new("abc123"), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "UpstreamError");
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().starts_with("HTTP 503 on "));
    }

    #[tokio::test]
    async fn test_non_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_public(url(&server, "/enheter"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(200));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/enheter")).unwrap();
        let err = fetcher().fetch_public(url, None).await.unwrap_err();

        assert!(matches!(err, GatewayError::Upstream { status: None, .. }));
    }
}
