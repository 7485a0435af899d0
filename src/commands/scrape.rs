use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::db::PgPool;
use crate::fleet_update::FleetUpdateOptions;
use crate::scrape_config::ScraperConfig;

use super::build_workflow;

/// One-shot fleet update for a single airline, printing the result summary.
/// Ctrl+C cancels at the next batch boundary.
pub async fn handle_scrape(
    pool: PgPool,
    config: ScraperConfig,
    airline: &str,
    force: bool,
    dry_run: bool,
) -> Result<()> {
    let workflow = build_workflow(&pool, &config)?;
    let opts = FleetUpdateOptions {
        force_full_scrape: force,
        dry_run,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl+C: cancelling at the next batch boundary");
            cancel.cancel();
        });
    }

    let result = workflow.run_full_update(airline, opts, cancel).await?;
    info!(
        "Update for {} finished in {} ms: {} found, {} added, {} updated, {} skipped, {} errors",
        airline,
        result.duration_ms,
        result.aircraft_found,
        result.aircraft_added,
        result.aircraft_updated,
        result.aircraft_skipped,
        result.errors
    );

    let rendered =
        serde_json::to_string_pretty(&result).context("Failed to render update result")?;
    println!("{}", rendered);
    Ok(())
}
