mod auth;
mod authority;
mod config;
mod health;
mod http;
mod metrics;
mod publish;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::auth::gateway::AuthGateway;
use crate::authority::http::HttpAuthority;
use crate::config::Config;
use crate::metrics::MetricsRegistry;
use crate::publish::Publisher;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "metricsgw", about = "Authenticating ingest gateway for hosted metrics")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/metricsgw/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Authority-backed credential and instance resolution.
    pub gateway: Arc<AuthGateway>,
    /// Destination for accepted metric batches.
    pub publisher: Arc<dyn Publisher>,
    pub metrics: MetricsRegistry,
    pub http_client: reqwest::Client,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let app = http::handler::create_router(Arc::new(state.clone()));

    let listen_addr: std::net::SocketAddr = state
        .config
        .http
        .listen
        .parse()
        .context("invalid listen address")?;

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

    tracing::info!(config_path = %cli.config, "starting metricsgw");

    // ---- Admin key ----
    // Read from the environment, never from the config file, so the secret
    // stays out of files shipped with the deployment.
    let admin_key = std::env::var(&config.auth.admin_key_env).ok();
    match admin_key.as_deref() {
        Some(key) if !key.is_empty() => {
            tracing::info!(env = %config.auth.admin_key_env, "static admin key enabled")
        }
        _ => tracing::warn!(
            env = %config.auth.admin_key_env,
            "admin key not set, static admin authentication disabled"
        ),
    }

    // ---- HTTP client ----
    // Shared by the authority client and the health probe. The timeout is
    // the only deadline anywhere on the authority path.
    let http_client = reqwest::Client::builder()
        .user_agent("metricsgw/0.1")
        .timeout(Duration::from_secs(config.authority.timeout_secs))
        .build()
        .context("failed to build reqwest client")?;

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Auth gateway ----
    let authority = Arc::new(HttpAuthority::new(&config.authority, http_client.clone()));
    let gateway = Arc::new(AuthGateway::new(
        authority,
        admin_key,
        &config.auth,
        metrics.clone(),
    ));
    tracing::info!(
        authority = %config.authority.base_url,
        identity_ttl = config.auth.identity_cache_ttl,
        instance_ttl = config.auth.instance_cache_ttl,
        "auth gateway initialised"
    );

    // ---- Publisher ----
    let publisher: Arc<dyn Publisher> = Arc::from(publish::build_publisher(&config));
    tracing::info!(kind = publisher.kind(), "publisher initialised");

    // ---- App state ----
    let state = AppState {
        config: Arc::clone(&config),
        gateway,
        publisher,
        metrics,
        http_client,
    };

    // ---- Serve ----
    run_http_server(state).await?;

    tracing::info!("metricsgw shut down cleanly");
    Ok(())
}
