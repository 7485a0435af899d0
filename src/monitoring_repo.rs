use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable};

use crate::db::{PgPool, PgPooledConnection};
use crate::job_queue::JobQueue;
use crate::monitoring::{AirlineCoverage, DataQualityBuckets, MonitoringSnapshot};
use crate::schema::{airlines, scraping_jobs};
use crate::scraping_jobs::ScrapingJobModel;

const RECENT_JOBS_LIMIT: i64 = 20;
const STALE_COVERAGE_DAYS: i64 = 30;

#[derive(QueryableByName)]
struct QualityRow {
    #[diesel(sql_type = BigInt)]
    high: i64,
    #[diesel(sql_type = BigInt)]
    medium: i64,
    #[diesel(sql_type = BigInt)]
    low: i64,
    #[diesel(sql_type = BigInt)]
    unscored: i64,
}

#[derive(QueryableByName)]
struct AvgDurationRow {
    #[diesel(sql_type = Nullable<diesel::sql_types::Double>)]
    avg_duration: Option<f64>,
}

/// Read-only aggregations over the engine's tables. Never writes.
#[derive(Clone)]
pub struct MonitoringRepository {
    pool: PgPool,
    queue: JobQueue,
}

impl MonitoringRepository {
    pub fn new(pool: PgPool) -> Self {
        let queue = JobQueue::new(pool.clone());
        Self { pool, queue }
    }

    fn get_connection(&self) -> Result<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get database connection: {}", e))
    }

    pub async fn snapshot(&self) -> Result<MonitoringSnapshot> {
        Ok(MonitoringSnapshot {
            queue: self.queue.stats().await?,
            recent_jobs: self.recent_jobs().await?,
            coverage: self.airline_coverage().await?,
            data_quality: self.data_quality().await?,
            avg_job_duration_seconds: self.avg_job_duration().await?,
        })
    }

    pub async fn recent_jobs(&self) -> Result<Vec<ScrapingJobModel>> {
        let mut conn = self.get_connection()?;
        let jobs = scraping_jobs::table
            .order(scraping_jobs::created_at.desc())
            .limit(RECENT_JOBS_LIMIT)
            .select(ScrapingJobModel::as_select())
            .load(&mut conn)
            .context("Failed to query recent jobs")?;
        Ok(jobs)
    }

    pub async fn airline_coverage(&self) -> Result<AirlineCoverage> {
        let stale_cutoff = Utc::now() - Duration::days(STALE_COVERAGE_DAYS);
        let mut conn = self.get_connection()?;

        let total_enabled: i64 = airlines::table
            .filter(airlines::scrape_enabled.eq(true))
            .count()
            .get_result(&mut conn)?;
        let never_scraped: i64 = airlines::table
            .filter(airlines::scrape_enabled.eq(true))
            .filter(airlines::last_scraped_at.is_null())
            .count()
            .get_result(&mut conn)?;
        let stale_over_30d: i64 = airlines::table
            .filter(airlines::scrape_enabled.eq(true))
            .filter(airlines::last_scraped_at.lt(stale_cutoff))
            .count()
            .get_result(&mut conn)?;

        Ok(AirlineCoverage {
            total_enabled,
            scraped: total_enabled - never_scraped,
            never_scraped,
            stale_over_30d,
        })
    }

    pub async fn data_quality(&self) -> Result<DataQualityBuckets> {
        let mut conn = self.get_connection()?;
        let row: QualityRow = diesel::sql_query(
            "SELECT \
                 COUNT(*) FILTER (WHERE (metadata->>'confidence_score')::float8 >= 0.7) AS high, \
                 COUNT(*) FILTER (WHERE (metadata->>'confidence_score')::float8 >= 0.4 \
                                    AND (metadata->>'confidence_score')::float8 < 0.7) AS medium, \
                 COUNT(*) FILTER (WHERE (metadata->>'confidence_score')::float8 < 0.4) AS low, \
                 COUNT(*) FILTER (WHERE metadata->>'confidence_score' IS NULL) AS unscored \
             FROM aircraft",
        )
        .get_result(&mut conn)
        .context("Failed to query data quality buckets")?;

        Ok(DataQualityBuckets {
            high: row.high,
            medium: row.medium,
            low: row.low,
            unscored: row.unscored,
        })
    }

    pub async fn avg_job_duration(&self) -> Result<Option<f64>> {
        let mut conn = self.get_connection()?;
        let row: AvgDurationRow = diesel::sql_query(
            "SELECT AVG(duration_seconds)::float8 AS avg_duration \
             FROM scraping_jobs WHERE status = 'completed'",
        )
        .get_result(&mut conn)
        .context("Failed to query average job duration")?;
        Ok(row.avg_duration)
    }
}
