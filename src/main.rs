//! Process entrypoint: CLI parsing, config load, tracing bootstrap, and the
//! axum serve loop with graceful shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use urlcast_proxy::config::Config;
use urlcast_proxy::http_client::ClientFactory;
use urlcast_proxy::proxy_pool::ProxyPool;
use urlcast_proxy::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "urlcast-proxy", about = "Reverse proxy that decodes path-encoded target URLs")]
struct Cli {
    /// Path to a TOML config file, overlaid by environment variables.
    #[arg(long)]
    config: Option<String>,

    /// Overrides the configured listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_file = cli.config.clone().unwrap_or_else(|| "config.toml".to_string());
    let mut config = Config::load_from_file(&config_file).context("failed to load configuration")?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    init_tracing(&config.log_level);

    info!("starting urlcast-proxy on port {}", config.port);

    let proxy_pool = Arc::new(ProxyPool::new(config.use_proxy));
    let client_factory = ClientFactory::new();

    if config.use_proxy && !config.proxy_list.is_empty() {
        let working = proxy_pool.validate(&config.proxy_list, &config, &client_factory).await;
        if working.is_empty() {
            warn!("no proxies passed validation; continuing in direct mode");
        }
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        client_factory,
        proxy_pool,
    };

    let app = web::build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c, shutting down"),
        Err(e) => error!("failed to install ctrl-c handler: {}", e),
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level.to_ascii_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
