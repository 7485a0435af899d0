use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, DbEnum, Serialize, Deserialize)]
#[db_enum(existing_type_path = "crate::schema::sql_types::JobStatus")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, DbEnum, Serialize, Deserialize)]
#[db_enum(existing_type_path = "crate::schema::sql_types::JobType")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    FullFleetUpdate,
    AircraftDetails,
    Validation,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, DbEnum, Serialize, Deserialize)]
#[db_enum(existing_type_path = "crate::schema::sql_types::JobPriority")]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

fn default_max_retries() -> i32 {
    3
}

fn default_retry_delay_minutes() -> i64 {
    30
}

/// Retry state carried in the `result_summary` JSONB column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRetryState {
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_retry_delay_minutes")]
    pub retry_delay_minutes: i64,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for JobRetryState {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_minutes: default_retry_delay_minutes(),
            retry_count: 0,
            scheduled_at: None,
            last_error: None,
        }
    }
}

impl JobRetryState {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Result counters reported when a job completes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobCounters {
    pub discovered: i32,
    pub new: i32,
    pub updated: i32,
    pub errors: i32,
}

#[derive(
    Debug, Clone, Queryable, Selectable, Identifiable, QueryableByName, Serialize, Deserialize,
)]
#[diesel(table_name = crate::schema::scraping_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ScrapingJobModel {
    pub id: uuid::Uuid,
    pub job_id: String,
    pub airline_code: String,
    pub airline_name: Option<String>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i32>,
    pub discovered_count: i32,
    pub new_count: i32,
    pub updated_count: i32,
    pub error_count: i32,
    pub progress: Option<i32>,
    pub error_message: Option<String>,
    pub result_summary: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScrapingJobModel {
    /// Parse the retry state out of `result_summary`, with defaults for
    /// anything missing or malformed.
    pub fn retry_state(&self) -> JobRetryState {
        self.result_summary
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// The earliest instant the job is eligible for lease.
    pub fn effective_scheduled_at(&self) -> DateTime<Utc> {
        self.retry_state().scheduled_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::scraping_jobs)]
pub struct NewScrapingJob {
    pub job_id: String,
    pub airline_code: String,
    pub airline_name: Option<String>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub result_summary: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_state_round_trips_through_json() {
        let state = JobRetryState {
            max_retries: 5,
            retry_delay_minutes: 10,
            retry_count: 2,
            scheduled_at: Some(Utc::now()),
            last_error: Some("connection reset".to_string()),
        };
        let parsed: JobRetryState = serde_json::from_value(state.to_value()).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn retry_state_defaults_for_missing_fields() {
        let parsed: JobRetryState = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(parsed.max_retries, 3);
        assert_eq!(parsed.retry_delay_minutes, 30);
        assert_eq!(parsed.retry_count, 0);
        assert!(parsed.scheduled_at.is_none());
    }
}
