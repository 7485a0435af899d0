use std::str::FromStr;

use anyhow::{Context, Result};
use cron::Schedule;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::airlines_repo::AirlinesRepository;
use crate::error::should_retry;
use crate::fleet_update::{FleetUpdateOptions, FleetUpdateResult, FleetUpdateWorkflow};
use crate::job_queue::{CreateJobOptions, JobQueue};
use crate::scrape_config::ScraperConfig;
use crate::scraping_jobs::{JobCounters, JobPriority, ScrapingJobModel};

/// Airlines are re-scraped once their last update is older than this.
const RESCRAPE_AFTER_DAYS: i64 = 7;

/// Upper bound on jobs enqueued per cron tick.
const MAX_ENQUEUES_PER_TICK: i64 = 100;

/// The `cron` crate wants a seconds field; the configured expressions use
/// the classic five-field form.
pub fn normalize_cron(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    }
}

impl From<&FleetUpdateResult> for JobCounters {
    fn from(result: &FleetUpdateResult) -> Self {
        Self {
            discovered: result.aircraft_found as i32,
            new: result.aircraft_added as i32,
            updated: result.aircraft_updated as i32,
            errors: result.errors as i32,
        }
    }
}

/// Polls the job queue, runs up to `max_concurrent_jobs` workflows at a
/// time, and enqueues due airlines on a cron schedule.
pub struct Scheduler {
    config: ScraperConfig,
    queue: JobQueue,
    airlines: AirlinesRepository,
    workflow: FleetUpdateWorkflow,
}

impl Scheduler {
    pub fn new(
        config: ScraperConfig,
        queue: JobQueue,
        airlines: AirlinesRepository,
        workflow: FleetUpdateWorkflow,
    ) -> Self {
        Self {
            config,
            queue,
            airlines,
            workflow,
        }
    }

    /// Run until `shutdown` fires, then drain active jobs and return.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        // Jobs stranded in `running` by a dead worker get one more attempt.
        let reclaimed = self.queue.reclaim_orphaned(self.config.reclaim_after).await?;
        if reclaimed > 0 {
            info!("Reclaimed {} orphaned jobs on startup", reclaimed);
        }

        let cron_task = if self.config.schedule_enabled {
            Some(self.spawn_cron_task(shutdown.clone())?)
        } else {
            info!("Cron scheduling disabled");
            None
        };

        let mut active: JoinSet<()> = JoinSet::new();
        info!(
            "Scheduler running: up to {} concurrent jobs, polling every {:?}",
            self.config.max_concurrent_jobs, self.config.poll_interval
        );

        loop {
            while let Some(joined) = active.try_join_next() {
                if let Err(e) = joined {
                    error!("Job task panicked: {}", e);
                }
            }
            metrics::gauge!("scraper.scheduler.active_jobs").set(active.len() as f64);

            if shutdown.is_cancelled() {
                break;
            }

            if active.len() >= self.config.max_concurrent_jobs {
                tokio::select! {
                    _ = active.join_next() => {}
                    _ = shutdown.cancelled() => {}
                }
                continue;
            }

            match self.queue.lease().await {
                Ok(Some(job)) => {
                    info!(
                        "Leased job {} ({} priority {:?})",
                        job.job_id, job.airline_code, job.priority
                    );
                    let queue = self.queue.clone();
                    let workflow = self.workflow.clone();
                    active.spawn(async move {
                        run_job(queue, workflow, job).await;
                    });
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.cancelled() => {}
                    }
                }
                Err(e) => {
                    error!("Lease failed: {:#}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.cancelled() => {}
                    }
                }
            }
        }

        if !active.is_empty() {
            info!("Shutdown: waiting for {} active jobs to settle", active.len());
        }
        while let Some(joined) = active.join_next().await {
            if let Err(e) = joined {
                error!("Job task panicked during shutdown: {}", e);
            }
        }
        if let Some(cron) = cron_task {
            cron.abort();
        }
        info!("Scheduler stopped");
        Ok(())
    }

    fn spawn_cron_task(
        &self,
        shutdown: CancellationToken,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let expression = normalize_cron(&self.config.schedule_cron);
        let schedule = Schedule::from_str(&expression)
            .with_context(|| format!("Invalid cron expression {:?}", expression))?;
        let timezone = self.config.timezone;
        let queue = self.queue.clone();
        let airlines = self.airlines.clone();
        let create_opts = CreateJobOptions {
            max_retries: self.config.max_retries,
            retry_delay_minutes: self.config.retry_delay_minutes,
            ..CreateJobOptions::default()
        };

        info!(
            "Cron scheduling enabled: {:?} in {}",
            self.config.schedule_cron, timezone
        );

        Ok(tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(timezone).next() else {
                    warn!("Cron schedule has no upcoming fire times, stopping cron task");
                    return;
                };
                let wait = (next.with_timezone(&chrono::Utc) - chrono::Utc::now())
                    .to_std()
                    .unwrap_or_default();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.cancelled() => return,
                }

                if let Err(e) = enqueue_due_airlines(&airlines, &queue, &create_opts).await {
                    error!("Cron enqueue sweep failed: {:#}", e);
                }
            }
        }))
    }
}

/// Enqueue a pending job for every scrape-enabled airline that is due and
/// has nothing in flight. Never-scraped airlines get high priority.
pub async fn enqueue_due_airlines(
    airlines: &AirlinesRepository,
    queue: &JobQueue,
    base_opts: &CreateJobOptions,
) -> Result<usize> {
    let due = airlines
        .due_for_scrape(
            chrono::Duration::days(RESCRAPE_AFTER_DAYS),
            MAX_ENQUEUES_PER_TICK,
        )
        .await?;

    let mut enqueued = 0usize;
    for airline in due {
        if queue.has_active_job(&airline.iata_code).await? {
            continue;
        }
        let opts = CreateJobOptions {
            priority: if airline.last_scraped_at.is_none() {
                JobPriority::High
            } else {
                JobPriority::Normal
            },
            ..base_opts.clone()
        };
        match queue.create(&airline.iata_code, opts).await {
            Ok(job_id) => {
                enqueued += 1;
                info!("Cron enqueued {} for {}", job_id, airline.iata_code);
            }
            Err(e) => warn!("Cron enqueue failed for {}: {:#}", airline.iata_code, e),
        }
    }

    if enqueued > 0 {
        info!("Cron sweep enqueued {} jobs", enqueued);
        metrics::counter!("scraper.scheduler.cron_enqueued").increment(enqueued as u64);
    }
    Ok(enqueued)
}

/// Execute one leased job end to end: start, run the workflow, then record
/// completion or classify the failure for retry.
async fn run_job(queue: JobQueue, workflow: FleetUpdateWorkflow, job: ScrapingJobModel) {
    if let Err(e) = queue.start(&job.job_id).await {
        error!("Failed to start job {}: {:#}", job.job_id, e);
        return;
    }

    let outcome = workflow
        .run_full_update(
            &job.airline_code,
            FleetUpdateOptions::default(),
            CancellationToken::new(),
        )
        .await;

    match outcome {
        Ok(result) => {
            if let Err(e) = queue.complete(&job.job_id, JobCounters::from(&result)).await {
                error!("Failed to record completion of {}: {:#}", job.job_id, e);
            }
        }
        Err(e) => {
            let retryable = should_retry(&e);
            if let Err(record_err) = queue
                .fail(&job.job_id, &format!("{:#}", e), retryable)
                .await
            {
                error!(
                    "Failed to record failure of {}: {:#}",
                    job.job_id, record_err
                );
            }
        }
    }
}
