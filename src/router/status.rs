//! Public server status, for front-end identification.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

/// Structured status.
#[derive(Serialize)]
pub struct Status {
    version: String,
    name: String,
    maskinporten: bool,
}

/// Public server status. Never reveals credentials.
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        version: state.config.version().to_owned(),
        name: state.config.name.clone(),
        maskinporten: state.exchanger.credentials().is_complete(),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use http_body_util::BodyExt;

    use crate::config::Configuration;
    use crate::*;

    #[tokio::test]
    async fn test_status_handler() {
        let app = app(router::state(Configuration::default()));
        let response = make_request(app, Method::GET, "/status.json", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["name"], "brreg-proxy");
        assert_eq!(status["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(status["maskinporten"], false);
    }
}
