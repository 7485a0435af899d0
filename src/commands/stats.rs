use anyhow::{Context, Result};

use crate::db::PgPool;
use crate::monitoring_repo::MonitoringRepository;

/// Print a one-shot monitoring snapshot.
pub async fn handle_stats(pool: PgPool) -> Result<()> {
    let monitoring = MonitoringRepository::new(pool);
    let snapshot = monitoring.snapshot().await?;
    let rendered =
        serde_json::to_string_pretty(&snapshot).context("Failed to render snapshot")?;
    println!("{}", rendered);
    Ok(())
}
