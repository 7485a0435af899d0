use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::airlines_repo::AirlinesRepository;
use crate::db::PgPool;
use crate::job_queue::JobQueue;
use crate::scheduler::Scheduler;
use crate::scrape_config::ScraperConfig;

use super::build_workflow;

/// Run the scheduler daemon until SIGINT/SIGTERM, then drain active jobs.
pub async fn handle_run(pool: PgPool, config: ScraperConfig) -> Result<()> {
    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics exposed on http://{}/metrics", addr);
    }

    let workflow = build_workflow(&pool, &config)?;
    let queue = JobQueue::new(pool.clone());
    let airlines = AirlinesRepository::new(pool);
    let scheduler = Scheduler::new(config, queue, airlines, workflow);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    scheduler.run(shutdown).await
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::error!("Unable to listen for SIGTERM: {}", e);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down");
        }
        shutdown.cancel();
    });
}
