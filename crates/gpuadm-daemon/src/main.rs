//! gpuadm daemon
//!
//! Serves the admission filter to the cluster scheduler.

use anyhow::Context;
use clap::Parser;
use gpuadm_api::create_router;
use gpuadm_core::{AdmissionConfig, LogFormat};
use gpuadm_scheduler::{AdmissionFilter, ShareAllocator};
use gpuadm_store::{http::ResourceNames, HttpWorkloadStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// gpuadmd - admission filter for fractional GPU workloads
#[derive(Parser, Debug)]
#[command(name = "gpuadmd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the API server
    #[arg(long)]
    port: Option<u16>,

    /// Base URL of the cluster API server
    #[arg(long)]
    api_url: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Load the config file, then let explicit flags override it
    fn into_config(self) -> anyhow::Result<AdmissionConfig> {
        let mut config = match &self.config {
            Some(path) => AdmissionConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => AdmissionConfig::default(),
        };

        if let Some(address) = self.address {
            config.api.address = address;
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(api_url) = self.api_url {
            config.store.api_url = api_url;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(config: &AdmissionConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to set subscriber: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config);

    info!("Starting gpuadm daemon v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(HttpWorkloadStore::new(
        &config.store,
        ResourceNames::from(&config.admission),
    )?);
    let allocator = Arc::new(ShareAllocator::new(config.admission.annotation_keys()));
    let filter = Arc::new(AdmissionFilter::from_config(store, allocator, &config));

    let shutdown = CancellationToken::new();
    let router = create_router(filter, shutdown.clone());

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("invalid listen address")?;

    info!(
        api_url = %config.store.api_url,
        annotation_domain = %config.admission.annotation_domain,
        retry_interval_ms = config.commit.retry_interval_ms,
        retry_timeout_ms = config.commit.retry_timeout_ms,
        "Admission filter configured"
    );
    info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    let signal = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
            signal.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
