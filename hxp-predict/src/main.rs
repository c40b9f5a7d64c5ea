//! Sedation Hypoxemia Risk Prediction service (hxp-predict) - Main entry point
//!
//! Serves `POST /predict` over a pre-trained classifier artifact.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hxp_common::config::{ConfigOverrides, LoadMode, ServiceConfig};
use hxp_common::schema::sedation_schema;
use hxp_predict::acquire::ArtifactAcquirer;
use hxp_predict::{build_router, AppState, ModelGateway};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for hxp-predict
#[derive(Parser, Debug)]
#[command(name = "hxp-predict")]
#[command(about = "Sedation hypoxemia risk prediction service")]
#[command(version)]
struct Args {
    /// Path to TOML config file (overrides HXP_CONFIG and default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Local model artifact path
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Remote URL to fetch the artifact from when the local copy is unusable
    #[arg(long)]
    model_url: Option<String>,

    /// Defer the model load until the first prediction request
    #[arg(long)]
    lazy: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            host: self.host.clone(),
            port: self.port,
            model_path: self.model_path.clone(),
            model_url: self.model_url.clone(),
            load_mode: self.lazy.then_some(LoadMode::Lazy),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first: it carries the default log level
    let config =
        ServiceConfig::resolve(&args.overrides()).context("Failed to resolve configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("hxp_predict={0},hxp_common={0},tower_http=info", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting hxp-predict v{} (schema {})",
        env!("CARGO_PKG_VERSION"),
        sedation_schema().version()
    );
    match &config.config_file {
        Some(path) => info!("Config file: {}", path.display()),
        None => warn!("No config file found, using defaults and environment"),
    }
    info!(
        path = %config.model.path.display(),
        remote = config.model.remote_url.as_deref().unwrap_or("none"),
        pinned = config.model.sha256.is_some(),
        load_mode = ?config.model.load_mode,
        label_policy = ?config.label_policy,
        "Model source"
    );

    let acquirer = ArtifactAcquirer::new(config.model.clone())
        .context("Failed to initialize artifact acquirer")?;
    let gateway = Arc::new(ModelGateway::new(sedation_schema(), acquirer));

    if config.model.load_mode == LoadMode::Eager {
        // Listener comes up immediately; requests during the load get MODEL_UNAVAILABLE
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.ensure_loaded().await });
    }

    let app = build_router(AppState::new(gateway, config.label_policy));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
