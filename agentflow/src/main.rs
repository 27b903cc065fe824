//! agentflow - job distribution service
//!
//! Hosts in-process SQS-style queues over HTTP and provisions the job queue
//! used by the job workflow.

mod config;
mod router;

use agentflow_sqs::{JobQueueManager, QueueRegistry, SqsState};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "agentflow")]
#[command(about = "Job distribution service with SQS-style queues", long_about = None)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "AGENTFLOW_PORT")]
    port: Option<u16>,

    /// Host to bind to (overrides the config file)
    #[arg(long, env = "AGENTFLOW_HOST")]
    host: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long, env = "AGENTFLOW_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AGENTFLOW_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "agentflow={level},agentflow_sqs={level},tower_http=debug",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load(args.config.as_deref())?;
    let port = args.port.unwrap_or(config.server.port);
    let host = args.host.unwrap_or(config.server.host);

    info!("Starting agentflow...");
    info!("  Queue base URL: {}", config.queue.base_url);
    info!(
        "  Retention sweep: every {}s",
        config.queue.retention_sweep_interval_secs
    );

    let registry = Arc::new(QueueRegistry::new(config.queue.base_url));
    registry.spawn_sweeper(Duration::from_secs(config.queue.retention_sweep_interval_secs));

    // The job workflow cannot run without its queue
    let job_queue = Arc::new(JobQueueManager::with_receive_wait(
        registry.clone(),
        config.queue.job_queue_wait_time_secs,
    ));
    job_queue.initialize()?;

    let state = Arc::new(SqsState::new(registry.clone(), job_queue));
    let app = router::create_router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown();
    info!("agentflow stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}
