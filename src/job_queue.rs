use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Integer, Timestamptz};
use tracing::{info, warn};

use crate::db::functions::upper;
use crate::db::{PgPool, PgPooledConnection};
use crate::error::ScrapeError;
use crate::schema::{airlines, scraping_jobs};
use crate::scraping_jobs::{
    JobCounters, JobPriority, JobRetryState, JobStatus, JobType, NewScrapingJob, ScrapingJobModel,
};

/// How long a leased-but-not-yet-started job stays invisible to other
/// leasers. Covers the gap between `lease` and `start`; a leaser that dies
/// inside it simply returns the job to the eligible pool two minutes later.
const LEASE_CLAIM_SECS: i64 = 120;

/// Pending jobs eligible for lease, best first. Priority is ordered with a
/// SQL CASE so the queue never relies on in-memory ordering.
const LEASE_QUERY: &str = "\
    SELECT * FROM scraping_jobs \
    WHERE status = 'pending' \
      AND COALESCE((result_summary->>'scheduled_at')::timestamptz, created_at) <= NOW() \
    ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'normal' THEN 1 ELSE 2 END, \
             created_at ASC \
    LIMIT 1 \
    FOR UPDATE SKIP LOCKED";

#[derive(Debug, Clone)]
pub struct CreateJobOptions {
    pub job_type: JobType,
    pub priority: JobPriority,
    pub max_retries: i32,
    pub retry_delay_minutes: i64,
    pub scheduled_at: Option<chrono::DateTime<Utc>>,
}

impl Default for CreateJobOptions {
    fn default() -> Self {
        Self {
            job_type: JobType::FullFleetUpdate,
            priority: JobPriority::Normal,
            max_retries: 3,
            retry_delay_minutes: 30,
            scheduled_at: None,
        }
    }
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed_24h: i64,
    pub failed_24h: i64,
    pub total_7d: i64,
}

/// Persistent job queue backed by the `scraping_jobs` table.
///
/// Multiple scheduler processes may poll the same queue; `lease` uses
/// `FOR UPDATE SKIP LOCKED` so a pending job is handed to exactly one of
/// them.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn get_connection(&self) -> Result<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get database connection: {}", e))
    }

    /// Create a pending job for an airline. The airline must exist.
    pub async fn create(&self, airline_code: &str, opts: CreateJobOptions) -> Result<String> {
        let needle = airline_code.trim().to_uppercase();
        let mut conn = self.get_connection()?;

        let airline: Option<(String, String)> = airlines::table
            .filter(
                upper(airlines::iata_code)
                    .eq(needle.clone())
                    .or(upper(airlines::icao_code).eq(needle.clone())),
            )
            .select((airlines::iata_code, airlines::name))
            .first(&mut conn)
            .optional()
            .with_context(|| format!("Failed to resolve airline {}", airline_code))?;

        let Some((iata_code, airline_name)) = airline else {
            return Err(ScrapeError::UnknownAirline(airline_code.to_string()).into());
        };

        let retry_state = JobRetryState {
            max_retries: opts.max_retries,
            retry_delay_minutes: opts.retry_delay_minutes,
            retry_count: 0,
            scheduled_at: opts.scheduled_at,
            last_error: None,
        };

        // The job id embeds a millisecond timestamp; back-to-back creates
        // for the same airline can collide, so retry on a fresh timestamp.
        let mut attempt = 0;
        loop {
            let job_id = format!(
                "job_{}_{}",
                iata_code.to_uppercase(),
                Utc::now().timestamp_millis()
            );
            let new_job = NewScrapingJob {
                job_id: job_id.clone(),
                airline_code: iata_code.to_uppercase(),
                airline_name: Some(airline_name.clone()),
                job_type: opts.job_type,
                status: JobStatus::Pending,
                priority: opts.priority,
                result_summary: Some(retry_state.to_value()),
            };

            match diesel::insert_into(scraping_jobs::table)
                .values(&new_job)
                .execute(&mut conn)
            {
                Ok(_) => {
                    metrics::counter!("scraper.queue.jobs_created").increment(1);
                    info!("Created job {} for airline {}", job_id, airline_code);
                    return Ok(job_id);
                }
                Err(diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                )) if attempt < 3 => {
                    attempt += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create job {}", job_id));
                }
            }
        }
    }

    /// Lease the next eligible pending job, or None when the queue is idle.
    ///
    /// The winning row's eligibility is pushed [`LEASE_CLAIM_SECS`] into the
    /// future inside the same transaction, so the job cannot be handed out
    /// twice even after the row lock is released. `lease` does not mark the
    /// job running; [`start`](Self::start) does.
    pub async fn lease(&self) -> Result<Option<ScrapingJobModel>> {
        let mut conn = self.get_connection()?;

        let leased = conn
            .transaction::<Option<ScrapingJobModel>, diesel::result::Error, _>(|conn| {
                let job: Option<ScrapingJobModel> =
                    diesel::sql_query(LEASE_QUERY).get_result(conn).optional()?;

                let Some(job) = job else {
                    return Ok(None);
                };

                let mut state = job.retry_state();
                state.scheduled_at = Some(Utc::now() + Duration::seconds(LEASE_CLAIM_SECS));
                diesel::update(scraping_jobs::table.find(job.id))
                    .set(scraping_jobs::result_summary.eq(state.to_value()))
                    .execute(conn)?;

                Ok(Some(job))
            })
            .context("Failed to lease job")?;

        if leased.is_some() {
            metrics::counter!("scraper.queue.jobs_leased").increment(1);
        }
        Ok(leased)
    }

    /// Transition a leased job to running.
    pub async fn start(&self, job_id: &str) -> Result<()> {
        let mut conn = self.get_connection()?;
        let updated = diesel::update(
            scraping_jobs::table
                .filter(scraping_jobs::job_id.eq(job_id))
                .filter(scraping_jobs::status.eq(JobStatus::Pending)),
        )
        .set((
            scraping_jobs::status.eq(JobStatus::Running),
            scraping_jobs::started_at.eq(Utc::now()),
            scraping_jobs::updated_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .with_context(|| format!("Failed to start job {}", job_id))?;

        if updated == 0 {
            warn!("start: job {} was not pending", job_id);
        }
        Ok(())
    }

    /// Mark a running job completed with its result counters.
    pub async fn complete(&self, job_id: &str, counters: JobCounters) -> Result<()> {
        let now = Utc::now();
        let mut conn = self.get_connection()?;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let job: ScrapingJobModel = scraping_jobs::table
                .filter(scraping_jobs::job_id.eq(job_id))
                .select(ScrapingJobModel::as_select())
                .for_update()
                .first(conn)?;

            // A job cancelled while running stays cancelled
            if job.status == JobStatus::Cancelled {
                return Ok(());
            }

            let duration_seconds = job
                .started_at
                .map(|started| (now - started).num_seconds().max(0) as i32);

            diesel::update(scraping_jobs::table.find(job.id))
                .set((
                    scraping_jobs::status.eq(JobStatus::Completed),
                    scraping_jobs::completed_at.eq(now),
                    scraping_jobs::duration_seconds.eq(duration_seconds),
                    scraping_jobs::discovered_count.eq(counters.discovered),
                    scraping_jobs::new_count.eq(counters.new),
                    scraping_jobs::updated_count.eq(counters.updated),
                    scraping_jobs::error_count.eq(counters.errors),
                    scraping_jobs::progress.eq(Some(100)),
                    scraping_jobs::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)?;
            Ok(())
        })
        .with_context(|| format!("Failed to complete job {}", job_id))?;

        metrics::counter!("scraper.queue.jobs_completed").increment(1);
        info!(
            "Job {} completed: {} discovered, {} new, {} updated, {} errors",
            job_id, counters.discovered, counters.new, counters.updated, counters.errors
        );
        Ok(())
    }

    /// Record a job failure. Retryable failures below the retry budget go
    /// back to pending with their eligibility shifted by the retry delay;
    /// everything else goes terminal.
    pub async fn fail(&self, job_id: &str, error: &str, should_retry: bool) -> Result<()> {
        let now = Utc::now();
        let mut conn = self.get_connection()?;

        let retried = conn
            .transaction::<Option<bool>, diesel::result::Error, _>(|conn| {
                let job: ScrapingJobModel = scraping_jobs::table
                    .filter(scraping_jobs::job_id.eq(job_id))
                    .select(ScrapingJobModel::as_select())
                    .for_update()
                    .first(conn)?;

                // A job cancelled while running stays cancelled
                if job.status == JobStatus::Cancelled {
                    return Ok(None);
                }

                let mut state = job.retry_state();

                if should_retry && state.retry_count + 1 < state.max_retries {
                    state.retry_count += 1;
                    state.scheduled_at =
                        Some(now + Duration::minutes(state.retry_delay_minutes));
                    state.last_error = Some(error.to_string());

                    diesel::update(scraping_jobs::table.find(job.id))
                        .set((
                            scraping_jobs::status.eq(JobStatus::Pending),
                            scraping_jobs::started_at.eq(None::<chrono::DateTime<Utc>>),
                            scraping_jobs::result_summary.eq(state.to_value()),
                            scraping_jobs::updated_at.eq(diesel::dsl::now),
                        ))
                        .execute(conn)?;
                    Ok(Some(true))
                } else {
                    state.last_error = Some(error.to_string());
                    diesel::update(scraping_jobs::table.find(job.id))
                        .set((
                            scraping_jobs::status.eq(JobStatus::Failed),
                            scraping_jobs::completed_at.eq(now),
                            scraping_jobs::error_message.eq(error),
                            scraping_jobs::error_count.eq(job.error_count + 1),
                            scraping_jobs::result_summary.eq(state.to_value()),
                            scraping_jobs::updated_at.eq(diesel::dsl::now),
                        ))
                        .execute(conn)?;
                    Ok(Some(false))
                }
            })
            .with_context(|| format!("Failed to record failure for job {}", job_id))?;

        match retried {
            Some(true) => {
                metrics::counter!("scraper.queue.jobs_retried").increment(1);
                info!("Job {} failed, scheduled for retry: {}", job_id, error);
            }
            Some(false) => {
                metrics::counter!("scraper.queue.jobs_failed").increment(1);
                warn!("Job {} failed terminally: {}", job_id, error);
            }
            None => info!("Job {} was cancelled, ignoring failure report", job_id),
        }
        Ok(())
    }

    /// Cancel a pending or running job.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let mut conn = self.get_connection()?;
        let updated = diesel::update(
            scraping_jobs::table
                .filter(scraping_jobs::job_id.eq(job_id))
                .filter(scraping_jobs::status.eq_any([JobStatus::Pending, JobStatus::Running])),
        )
        .set((
            scraping_jobs::status.eq(JobStatus::Cancelled),
            scraping_jobs::completed_at.eq(Utc::now()),
            scraping_jobs::updated_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .with_context(|| format!("Failed to cancel job {}", job_id))?;

        if updated == 0 {
            anyhow::bail!("Job {} is not pending or running", job_id);
        }
        info!("Cancelled job {}", job_id);
        Ok(())
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Option<ScrapingJobModel>> {
        let mut conn = self.get_connection()?;
        let job = scraping_jobs::table
            .filter(scraping_jobs::job_id.eq(job_id))
            .select(ScrapingJobModel::as_select())
            .first(&mut conn)
            .optional()
            .with_context(|| format!("Failed to query job {}", job_id))?;
        Ok(job)
    }

    /// Whether the airline already has a job in flight (pending or running).
    pub async fn has_active_job(&self, airline_code: &str) -> Result<bool> {
        let needle = airline_code.trim().to_uppercase();
        let mut conn = self.get_connection()?;
        let count: i64 = scraping_jobs::table
            .filter(upper(scraping_jobs::airline_code).eq(needle))
            .filter(scraping_jobs::status.eq_any([JobStatus::Pending, JobStatus::Running]))
            .count()
            .get_result(&mut conn)
            .context("Failed to count active jobs")?;
        Ok(count > 0)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let now = Utc::now();
        let mut conn = self.get_connection()?;

        let pending: i64 = scraping_jobs::table
            .filter(scraping_jobs::status.eq(JobStatus::Pending))
            .count()
            .get_result(&mut conn)?;
        let running: i64 = scraping_jobs::table
            .filter(scraping_jobs::status.eq(JobStatus::Running))
            .count()
            .get_result(&mut conn)?;
        let completed_24h: i64 = scraping_jobs::table
            .filter(scraping_jobs::status.eq(JobStatus::Completed))
            .filter(scraping_jobs::completed_at.gt(now - Duration::hours(24)))
            .count()
            .get_result(&mut conn)?;
        let failed_24h: i64 = scraping_jobs::table
            .filter(scraping_jobs::status.eq(JobStatus::Failed))
            .filter(scraping_jobs::completed_at.gt(now - Duration::hours(24)))
            .count()
            .get_result(&mut conn)?;
        let total_7d: i64 = scraping_jobs::table
            .filter(scraping_jobs::created_at.gt(now - Duration::days(7)))
            .count()
            .get_result(&mut conn)?;

        Ok(QueueStats {
            pending,
            running,
            completed_24h,
            failed_24h,
            total_7d,
        })
    }

    /// Delete terminal jobs older than the given number of days.
    pub async fn cleanup_old_jobs(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut conn = self.get_connection()?;
        let deleted = diesel::delete(
            scraping_jobs::table
                .filter(scraping_jobs::status.eq_any([
                    JobStatus::Completed,
                    JobStatus::Failed,
                    JobStatus::Cancelled,
                ]))
                .filter(scraping_jobs::created_at.lt(cutoff)),
        )
        .execute(&mut conn)
        .context("Failed to clean up old jobs")?;

        if deleted > 0 {
            info!("Cleaned up {} old jobs", deleted);
        }
        Ok(deleted)
    }

    /// Reclaim jobs stranded in `running` by a dead worker: back to pending
    /// for one more attempt, with the retry counter bumped. Jobs that have
    /// already spent their retry budget go terminal instead.
    pub async fn reclaim_orphaned(&self, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let mut conn = self.get_connection()?;

        let exhausted = diesel::sql_query(
            "UPDATE scraping_jobs \
             SET status = 'failed', \
                 completed_at = NOW(), \
                 error_message = 'Reclaimed from dead worker with no retries left', \
                 updated_at = NOW() \
             WHERE status = 'running' \
               AND started_at < $1 \
               AND COALESCE((result_summary->>'retry_count')::int, 0) \
                   >= COALESCE((result_summary->>'max_retries')::int, 3)",
        )
        .bind::<Timestamptz, _>(cutoff)
        .execute(&mut conn)
        .context("Failed to fail exhausted orphaned jobs")?;

        let reclaimed = diesel::sql_query(
            "UPDATE scraping_jobs \
             SET status = 'pending', \
                 started_at = NULL, \
                 result_summary = jsonb_set( \
                     COALESCE(result_summary, '{}'::jsonb), \
                     '{retry_count}', \
                     to_jsonb(COALESCE((result_summary->>'retry_count')::int, 0) + $2)), \
                 updated_at = NOW() \
             WHERE status = 'running' \
               AND started_at < $1",
        )
        .bind::<Timestamptz, _>(cutoff)
        .bind::<Integer, _>(1)
        .execute(&mut conn)
        .context("Failed to reclaim orphaned jobs")?;

        if reclaimed > 0 || exhausted > 0 {
            warn!(
                "Reclaimed {} orphaned running jobs ({} had no retries left)",
                reclaimed, exhausted
            );
            metrics::counter!("scraper.queue.jobs_reclaimed").increment(reclaimed as u64);
        }
        Ok(reclaimed)
    }
}
