//! Configuration manager for brreg-proxy.
//!
//! Values come from `config.yaml` first, then from the environment. Nothing in
//! the request path reads the environment: the result is frozen in an `Arc`
//! once at startup.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_NAME: &str = "brreg-proxy";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_CREDENTIALS: &str = "oslotom";
const DEFAULT_REQUEST_TIMEOUT: u64 = 45;

const ENHETER_URL: &str = "https://data.brreg.no/enhetsregisteret/api/enheter";
const REGNSKAP_URL: &str =
    "https://data.brreg.no/regnskapsregisteret/api/regnskap";
const UPSTREAM_TIMEOUT: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Instance name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Only origin allowed by CORS.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Directory served for paths no route matches.
    pub static_dir: Option<PathBuf>,
    /// Whole inbound request deadline, in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout: u64,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Credentials guarding `/api`.
    #[serde(default)]
    pub auth: BasicAuth,
    /// Registry endpoints.
    #[serde(default)]
    pub upstream: Upstream,
    /// Related to Maskinporten client configuration.
    pub maskinporten: Option<Maskinporten>,
    /// Related to logs, traces and metrics export.
    #[serde(default)]
    pub telemetry: Telemetry,
}

fn default_name() -> String {
    DEFAULT_NAME.to_owned()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cors_origin() -> String {
    DEFAULT_CORS_ORIGIN.to_owned()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: DEFAULT_PORT,
            cors_origin: default_cors_origin(),
            static_dir: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            auth: BasicAuth::default(),
            upstream: Upstream::default(),
            maskinporten: None,
            telemetry: Telemetry::default(),
        }
    }
}

/// HTTP Basic credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BasicAuth {
    pub username: String,
    pub password: SecretString,
}

impl Default for BasicAuth {
    fn default() -> Self {
        Self {
            username: DEFAULT_CREDENTIALS.to_owned(),
            password: SecretString::new(DEFAULT_CREDENTIALS.to_owned()),
        }
    }
}

impl BasicAuth {
    /// Whether the well-known fallback credentials are still in use.
    pub fn is_default(&self) -> bool {
        use secrecy::ExposeSecret;

        self.username == DEFAULT_CREDENTIALS
            && self.password.expose_secret() == DEFAULT_CREDENTIALS
    }
}

/// Brønnøysund registry endpoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Upstream {
    /// Entity register search.
    pub enheter_url: String,
    /// Public annual accounts.
    pub regnskap_url: String,
    /// Accounting history, protected by Maskinporten.
    /// `/{orgnr}/historikk` is appended.
    pub historikk_url: String,
    /// Timeout of a registry call, in seconds.
    pub timeout: u64,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            enheter_url: ENHETER_URL.to_owned(),
            regnskap_url: REGNSKAP_URL.to_owned(),
            historikk_url: REGNSKAP_URL.to_owned(),
            timeout: UPSTREAM_TIMEOUT,
        }
    }
}

/// Maskinporten client configuration.
///
/// Every field is optional here; completeness is checked when a token is
/// first requested.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Maskinporten {
    /// Client identifier issued by Maskinporten.
    pub client_id: Option<String>,
    /// `kid` of the registered public key.
    pub key_id: Option<String>,
    /// PKCS8 PEM private key.
    pub private_key_pem: Option<SecretString>,
    /// File holding the PKCS8 PEM private key.
    pub private_key_path: Option<PathBuf>,
    /// Token endpoint, also used as assertion audience.
    pub token_endpoint: Option<String>,
    /// Space-delimited scopes.
    pub scope: Option<String>,
    /// Timeout of the token exchange, in seconds.
    pub timeout: Option<u64>,
}

/// Telemetry configuration.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// Expose Prometheus metrics on `/metrics`.
    pub metrics: bool,
    /// OTLP gRPC collector for traces and logs.
    pub otlp_endpoint: Option<String>,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Self {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => config.path(self.path),
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        }
    }

    /// Overrides values with environment variables.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`.
    pub fn merge_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        if let Some(username) = lookup("PROXY_USER") {
            self.auth.username = username;
        }
        if let Some(password) = lookup("PROXY_PASS") {
            self.auth.password = SecretString::new(password);
        }
        if let Some(origin) = lookup("CORS_ORIGIN") {
            self.cors_origin = origin;
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            self.static_dir = Some(dir.into());
        }
        if let Some(endpoint) = lookup("OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(endpoint);
        }

        let had_section = self.maskinporten.is_some();
        let mut maskinporten = self.maskinporten.take().unwrap_or_default();
        let mut touched = false;
        let mut set = |key: &str, field: &mut Option<String>| {
            if let Some(value) = lookup(key) {
                *field = Some(value);
                touched = true;
            }
        };
        set("MASKINPORTEN_CLIENT_ID", &mut maskinporten.client_id);
        set("MASKINPORTEN_KEY_ID", &mut maskinporten.key_id);
        set("MASKINPORTEN_TOKEN_ENDPOINT", &mut maskinporten.token_endpoint);
        set("MASKINPORTEN_SCOPE", &mut maskinporten.scope);

        if let Some(pem) = lookup("MASKINPORTEN_PRIVATE_KEY") {
            // `.env` files usually carry the PEM on a single line.
            maskinporten.private_key_pem =
                Some(SecretString::new(pem.replace("\\n", "\n")));
            touched = true;
        }
        if let Some(path) = lookup("MASKINPORTEN_PRIVATE_KEY_PATH") {
            maskinporten.private_key_path = Some(path.into());
            touched = true;
        }

        if had_section || touched {
            self.maskinporten = Some(maskinporten);
        }

        self
    }

    /// Normalizes URLs and loads key files.
    pub fn build(mut self) -> Result<Arc<Self>, url::ParseError> {
        self.version = VERSION.to_owned();

        // A zero timeout fails every call at once.
        if self.timeout == 0 {
            tracing::warn!(default = DEFAULT_REQUEST_TIMEOUT, "`timeout` cannot be 0");
            self.timeout = DEFAULT_REQUEST_TIMEOUT;
        }
        if self.upstream.timeout == 0 {
            tracing::warn!(default = UPSTREAM_TIMEOUT, "`upstream.timeout` cannot be 0");
            self.upstream.timeout = UPSTREAM_TIMEOUT;
        }

        self.upstream.enheter_url = Self::normalize_url(&self.upstream.enheter_url)?;
        self.upstream.regnskap_url =
            Self::normalize_url(&self.upstream.regnskap_url)?;
        self.upstream.historikk_url =
            Self::normalize_url(&self.upstream.historikk_url)?;

        if let Some(maskinporten) = self.maskinporten.as_mut() {
            maskinporten.load_private_key();
        }

        Ok(Arc::new(self))
    }

    /// Application version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self {
            path: self.path.clone(),
            ..Default::default()
        }
    }
}

impl Maskinporten {
    /// Read `private_key_path` unless an inline key is already present.
    fn load_private_key(&mut self) {
        if self.private_key_pem.is_some() {
            return;
        }

        let Some(path) = &self.private_key_path else {
            return;
        };

        match std::fs::read_to_string(path) {
            Ok(pem) => self.private_key_pem = Some(SecretString::new(pem)),
            Err(err) => {
                tracing::error!(error = %err, path = %path.display(), "cannot read maskinporten private key")
            },
        }
    }
}
