//! brreg-proxy is a credentialed gateway to the Brønnøysund registers.
//!
//! Protected resources are fetched with a Maskinporten access token obtained
//! through the JWT-bearer grant, once per request.

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod maskinporten;
mod middleware;
mod router;
pub mod telemetry;
pub mod upstream;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::clock::SystemClock;
use crate::maskinporten::{ClientCredentialConfig, TokenExchanger};
use crate::upstream::AuthorizedFetcher;


/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    credentials: Option<(&str, &str)>,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use base64ct::{Base64, Encoding};
    use tower::util::ServiceExt;

    let mut request = Request::builder().method(method).uri(path);
    if let Some((username, password)) = credentials {
        let encoded = Base64::encode_string(format!("{username}:{password}").as_bytes());
        request = request.header(header::AUTHORIZATION, format!("Basic {encoded}"));
    }

    app.oneshot(request.body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub exchanger: Arc<TokenExchanger>,
    pub fetcher: AuthorizedFetcher,
    pub metrics: Option<PrometheusHandle>,
}

fn cors(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .vary([header::AUTHORIZATION]);

    match HeaderValue::from_str(origin) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::error!(%origin, "invalid CORS origin, cross-origin requests are denied");
            cors
        },
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            Duration::from_secs(state.config.timeout),
        ))
        // Add CORS preflight support.
        .layer(cors(&state.config.cors_origin));

    let mut router = Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .nest("/api", router::api(state.clone()));

    // `GET /metrics` only when a recorder is installed.
    if let Some(handle) = state.metrics.clone() {
        router = router.route("/metrics", get(move || std::future::ready(handle.render())));
    }

    if let Some(dir) = &state.config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
///
/// Incomplete Maskinporten credentials are not fatal: public routes keep
/// working and the protected route answers with a configuration error.
pub fn initialize_state(
    config: Arc<config::Configuration>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, reqwest::Error> {
    let credentials = ClientCredentialConfig::from(config.maskinporten.as_ref());
    let missing = credentials.missing();
    if !missing.is_empty() {
        tracing::warn!(
            ?missing,
            "maskinporten is not fully configured, `/api/regnskap/{{orgnr}}/historikk` will answer 501"
        );
    }

    if config.auth.is_default() {
        tracing::warn!("default basic credentials in use, set `PROXY_USER` and `PROXY_PASS`");
    }

    let exchanger = TokenExchanger::new(Arc::new(credentials), Arc::new(SystemClock))?;
    let fetcher =
        AuthorizedFetcher::new(Duration::from_secs(config.upstream.timeout))?;

    Ok(AppState {
        config,
        exchanger: Arc::new(exchanger),
        fetcher,
        metrics,
    })
}
