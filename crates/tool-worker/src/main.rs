//! Tool worker binary.
//!
//! Runs one image tool behind a NATS JetStream request queue.

use anyhow::Result;
use clap::Parser;
use image_tools::ToolKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use tool_worker::{Worker, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "tool-worker", version, about = "Image tool worker")]
struct Cli {
    /// Tool to serve: ocr, brightness, autocrop or scale
    #[arg(long, env = "TOOL")]
    tool: ToolKind,

    /// Log output format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: String,
}

// The connection loop runs on this single thread; tool work goes to the
// blocking pool.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_format);

    let config = WorkerConfig::from_env(cli.tool)?;
    tracing::info!(
        worker_id = %config.worker_id,
        tool = %config.tool,
        queue = %config.topology.queue,
        pool_size = config.pool_size,
        "Worker configuration loaded"
    );

    let worker = Worker::new(config);
    if let Err(e) = worker.run(shutdown_signal()).await {
        tracing::error!(error = %e, "Worker error");
        return Err(e.into());
    }

    tracing::info!("Worker stopped");
    Ok(())
}

fn init_tracing(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tool_worker=debug".into());

    let layer = if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
}

/// Resolves on CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
