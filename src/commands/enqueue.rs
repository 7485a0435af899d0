use anyhow::Result;

use crate::db::PgPool;
use crate::job_queue::{CreateJobOptions, JobQueue};
use crate::scrape_config::ScraperConfig;
use crate::scraping_jobs::{JobPriority, JobType};

/// Create a pending job for an airline and print its id.
pub async fn handle_enqueue(
    pool: PgPool,
    config: ScraperConfig,
    airline: &str,
    priority: JobPriority,
    job_type: JobType,
) -> Result<()> {
    let queue = JobQueue::new(pool);
    let job_id = queue
        .create(
            airline,
            CreateJobOptions {
                job_type,
                priority,
                max_retries: config.max_retries,
                retry_delay_minutes: config.retry_delay_minutes,
                scheduled_at: None,
            },
        )
        .await?;
    println!("{}", job_id);
    Ok(())
}
