use anyhow::{Context, Result};

use crate::db::PgPool;
use crate::job_queue::JobQueue;

/// Inspect or maintain the job queue.
pub async fn handle_jobs(
    pool: PgPool,
    status: Option<&str>,
    cancel: Option<&str>,
    cleanup_days: Option<i64>,
) -> Result<()> {
    let queue = JobQueue::new(pool);

    if let Some(job_id) = status {
        match queue.get_status(job_id).await? {
            Some(job) => {
                let rendered =
                    serde_json::to_string_pretty(&job).context("Failed to render job")?;
                println!("{}", rendered);
            }
            None => println!("No job with id {}", job_id),
        }
        return Ok(());
    }

    if let Some(job_id) = cancel {
        queue.cancel(job_id).await?;
        println!("Cancelled {}", job_id);
        return Ok(());
    }

    if let Some(days) = cleanup_days {
        let deleted = queue.cleanup_old_jobs(days).await?;
        println!("Deleted {} jobs older than {} days", deleted, days);
        return Ok(());
    }

    let stats = queue.stats().await?;
    let rendered =
        serde_json::to_string_pretty(&stats).context("Failed to render queue stats")?;
    println!("{}", rendered);
    Ok(())
}
