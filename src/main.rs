mod advisory;
mod config;
mod engine;
mod health;
mod http;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::advisory::{CommandAdvisor, HttpAdvisor};
use crate::config::Config;
use crate::metrics::MetricsRegistry;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "repodrive", about = "Remote Git workflow and deployment agent")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/repodrive/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers.  Engine instances are
/// NOT part of it: each request binds a fresh engine to its target so that
/// concurrent callers on different repositories stay fully independent.
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: MetricsRegistry,
    pub http_client: reqwest::Client,
    /// Command-risk advisory; `None` means arbitrary command sequences are
    /// refused (fail closed).
    pub advisor: Option<Arc<dyn CommandAdvisor>>,
    /// Resolved API bearer token for the repository routes.
    pub api_token: Option<String>,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: Arc<AppState>) -> Result<()> {
    let listen_addr: std::net::SocketAddr = state
        .config
        .server
        .listen
        .parse()
        .context("invalid listen address")?;

    let app = http::handler::create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;
    let config = Arc::new(config);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting repodrive");

    // ---- Advisory ----
    let advisor: Option<Arc<dyn CommandAdvisor>> = match config.advisory.as_ref() {
        Some(advisory_config) => {
            let advisor = HttpAdvisor::from_config(advisory_config)
                .context("failed to build command advisory client")?;
            tracing::info!(base_url = %advisory_config.base_url, "command advisory enabled");
            Some(Arc::new(advisor))
        }
        None => {
            tracing::warn!("no command advisory configured; run-commands will be refused");
            None
        }
    };

    // ---- API token ----
    let api_token = match config.auth.api_token_env.as_deref() {
        Some(env_name) => {
            let token = std::env::var(env_name)
                .with_context(|| format!("API token environment variable {env_name} is not set"))?;
            Some(token)
        }
        None => {
            tracing::warn!("no API token configured; repository routes are open");
            None
        }
    };

    // ---- Infrastructure clients ----
    let http_client = reqwest::Client::builder()
        .user_agent("repodrive/0.1")
        .build()
        .context("failed to build reqwest client")?;

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- App state ----
    let state = Arc::new(AppState {
        config,
        metrics,
        http_client,
        advisor,
        api_token,
    });

    // ---- Serve ----
    run_http_server(state).await?;

    tracing::info!("repodrive shut down cleanly");
    Ok(())
}
