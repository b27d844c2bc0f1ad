//! brreg-proxy server.
//!
//! # Environment variables
//!
//! | Variable                        | Default        | Description                     |
//! |---------------------------------|----------------|---------------------------------|
//! | `CONFIG_PATH`                   | `config.yaml`  | YAML configuration file         |
//! | `PORT`                          | `3001`         | TCP port to listen on           |
//! | `PROXY_USER`, `PROXY_PASS`      | `oslotom`      | Basic credentials for `/api`    |
//! | `CORS_ORIGIN`                   | `http://localhost:3000` | Allowed origin         |
//! | `MASKINPORTEN_*`                | unset          | Maskinporten client             |
//! | `RUST_LOG`                      | `info`         | Log filter                      |

use std::path::PathBuf;
use std::sync::Arc;

use brreg_proxy::config::Configuration;
use brreg_proxy::{app, initialize_state, telemetry};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, reload};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file.
    #[arg(long, short, env = "CONFIG_PATH", default_value = "config.yaml")]
    config: PathBuf,
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "cannot listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    // OTLP logs are plugged in once the configuration is known.
    let (otlp, otlp_handle) = reload::Layer::new(None::<telemetry::LogBridge>);
    tracing_subscriber::registry()
        .with(otlp)
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Configuration::default()
        .path(args.config)
        .read()
        .merge_env(|key| std::env::var(key).ok())
        .build()?;

    let tracer = match &config.telemetry.otlp_endpoint {
        Some(endpoint) => {
            otlp_handle.reload(Some(telemetry::setup_logging(endpoint)?))?;
            Some(telemetry::setup_tracer(endpoint)?)
        },
        None => None,
    };

    let metrics = if config.telemetry.metrics {
        Some(telemetry::setup_metrics_recorder()?)
    } else {
        None
    };

    let state = initialize_state(Arc::clone(&config), metrics)?;
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;

    tracing::info!(
        port = config.port,
        version = config.version(),
        cors_origin = %config.cors_origin,
        "server started"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(provider) = tracer {
        if let Err(err) = provider.shutdown() {
            tracing::error!(?err, "cannot flush traces");
        }
    }

    Ok(())
}
