//! Error handler for brreg-proxy.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

const BASIC_REALM: &str = r#"Basic realm="Access""#;

/// Failures of the token exchange and of the forwarded registry calls.
///
/// None of them is retried. The kind names are stable and end up in the
/// `kind` field of the error envelope.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("maskinporten is not configured: {0}")]
    Configuration(String),

    #[error("cannot sign assertion: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("token endpoint answered HTTP {status}: {message}")]
    TokenExchange { status: u16, message: String },

    #[error("invalid token response: {0}")]
    TokenResponse(String),

    #[error("token endpoint unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("{message}")]
    Upstream { status: Option<u16>, message: String },
}

impl GatewayError {
    /// Machine-readable kind of the error.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "ConfigurationError",
            GatewayError::Signing(_) => "SigningError",
            GatewayError::TokenExchange { .. } => "TokenExchangeError",
            GatewayError::TokenResponse(_) => "TokenResponseError",
            GatewayError::Transport(_) => "TransportError",
            GatewayError::Upstream { .. } => "UpstreamError",
        }
    }

    /// HTTP status answered by the remote party, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::TokenExchange { status, .. } => Some(*status),
            GatewayError::Upstream { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether the failure happened while authenticating to the identity
    /// provider, as opposed to the registry rejecting the request itself.
    pub fn is_authentication(&self) -> bool {
        !matches!(self, GatewayError::Upstream { .. })
    }
}

/// Kind of the [`GatewayError`] behind a response, kept in its extensions
/// for telemetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GatewayFailure(pub &'static str);

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("authentication required")]
    Unauthorized,
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    kind: Option<String>,
    upstream_status: Option<u16>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Describe which stage of the gateway failed.
    pub fn gateway(mut self, err: &GatewayError) -> Self {
        self.kind = Some(err.kind().to_owned());
        self.upstream_status = err.status();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            kind: None,
            upstream_status: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect()
}

fn gateway_response(err: &GatewayError) -> ResponseError {
    let response = ResponseError::default()
        .gateway(err)
        .details(&err.to_string());

    match err {
        GatewayError::Configuration(_) => response
            .title("Maskinporten not configured.")
            .status(StatusCode::NOT_IMPLEMENTED),
        GatewayError::Upstream { .. } => response
            .title("The data provider rejected the request.")
            .status(StatusCode::BAD_GATEWAY),
        _ => response
            .title("Cannot authenticate to the data provider.")
            .status(StatusCode::BAD_GATEWAY),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = match &self {
            ServerError::Gateway(err) => {
                tracing::warn!(kind = err.kind(), status = ?err.status(), %err, "gateway request failed");
                let mut response = gateway_response(err)
                    .into_response()
                    .unwrap_or_else(|_| internal_server_error());
                response.extensions_mut().insert(GatewayFailure(err.kind()));
                return response;
            },

            ServerError::Validation(validation_errors) => ResponseError::default()
                .title("There were validation errors with your request.")
                .details(&self.to_string())
                .status(StatusCode::BAD_REQUEST)
                .errors(validation_errors),

            ServerError::Unauthorized => return unauthorized(),

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, BASIC_REALM)],
        "Authentication required.",
    )
        .into_response()
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "kind": null,
                "upstream_status": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
