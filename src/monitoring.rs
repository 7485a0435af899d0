use serde::Serialize;

use crate::job_queue::QueueStats;
use crate::scraping_jobs::ScrapingJobModel;

/// How much of the enabled airline catalog has been scraped.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AirlineCoverage {
    pub total_enabled: i64,
    pub scraped: i64,
    pub never_scraped: i64,
    pub stale_over_30d: i64,
}

/// Aircraft bucketed by stored confidence score.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DataQualityBuckets {
    /// confidence >= 0.7
    pub high: i64,
    /// 0.4 <= confidence < 0.7
    pub medium: i64,
    /// confidence < 0.4
    pub low: i64,
    /// no engine metadata recorded
    pub unscored: i64,
}

/// One read-only snapshot of engine health.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSnapshot {
    pub queue: QueueStats,
    pub recent_jobs: Vec<ScrapingJobModel>,
    pub coverage: AirlineCoverage,
    pub data_quality: DataQualityBuckets,
    pub avg_job_duration_seconds: Option<f64>,
}
