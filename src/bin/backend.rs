#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use videodex::{
    api::{AppState, router},
    config::{CorsPolicy, load_server_config},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the video catalog and page scraping API.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        help = "KEY=value env file read before the process environment"
    )]
    config: Option<PathBuf>,
    #[arg(long = "port", value_name = "PORT", help = "Override PORT (default 3001)")]
    port: Option<u16>,
    #[arg(long = "host", value_name = "ADDR", help = "Override LISTEN_HOST (default 0.0.0.0)")]
    host: Option<String>,
    #[arg(
        long = "data-file",
        value_name = "PATH",
        help = "Override DATA_FILE (default ./data.json)"
    )]
    data_file: Option<PathBuf>,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_server_config(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(data_file) = cli.data_file {
        config.data_file = data_file;
    }

    let addr = config.socket_addr()?;
    let app = router(AppState::from_config(&config), &config.cors);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        data_file = %config.data_file.display(),
        browser = %config.scrape.browser_bin.display(),
        max_concurrent_scrapes = config.scrape.max_concurrent,
        any_origin = matches!(config.cors, CorsPolicy::AnyOrigin),
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}
