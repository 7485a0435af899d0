use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use tracing::warn;

/// Engine configuration, read from `SCRAPER_*` environment variables with
/// the documented defaults. CLI flags may override individual fields.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Maximum concurrently running jobs per process.
    pub max_concurrent_jobs: usize,
    /// Idle wait between queue polls.
    pub poll_interval: Duration,
    /// Per-job fan-out width inside the details and validation phases.
    pub workflow_concurrency: usize,
    /// Whether the cron branch runs at all.
    pub schedule_enabled: bool,
    /// Cron expression for the re-scrape sweep.
    pub schedule_cron: String,
    /// Timezone the cron expression is evaluated in.
    pub timezone: Tz,
    /// Sleep between fan-out batches.
    pub rate_limit: Duration,
    pub max_retries: i32,
    pub retry_delay_minutes: i64,
    /// Timeout for a single page fetch or extraction.
    pub source_timeout: Duration,
    /// Running jobs older than this are reclaimed on startup.
    pub reclaim_after: chrono::Duration,
    /// Prometheus exposition address, if metrics are wanted.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            poll_interval: Duration::from_millis(5000),
            workflow_concurrency: 5,
            schedule_enabled: false,
            schedule_cron: "0 2 * * *".to_string(),
            timezone: chrono_tz::UTC,
            rate_limit: Duration::from_millis(2000),
            max_retries: 3,
            retry_delay_minutes: 30,
            source_timeout: Duration::from_millis(30_000),
            reclaim_after: chrono::Duration::minutes(60),
            metrics_addr: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl ScraperConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let timezone = match std::env::var("SCRAPER_TIMEZONE") {
            Ok(raw) => match raw.trim().parse::<Tz>() {
                Ok(tz) => tz,
                Err(_) => {
                    warn!("Ignoring unknown SCRAPER_TIMEZONE={:?}, using UTC", raw);
                    chrono_tz::UTC
                }
            },
            Err(_) => defaults.timezone,
        };
        let metrics_addr = std::env::var("SCRAPER_METRICS_ADDR")
            .ok()
            .and_then(|raw| match raw.trim().parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!("Ignoring unparseable SCRAPER_METRICS_ADDR={:?}", raw);
                    None
                }
            });

        Self {
            max_concurrent_jobs: env_parse(
                "SCRAPER_CONCURRENT_LIMIT",
                defaults.max_concurrent_jobs,
            ),
            poll_interval: Duration::from_millis(env_parse(
                "SCRAPER_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            workflow_concurrency: env_parse(
                "SCRAPER_WORKFLOW_CONCURRENCY",
                defaults.workflow_concurrency,
            )
            .max(1),
            schedule_enabled: env_bool("SCRAPER_SCHEDULE_ENABLED", defaults.schedule_enabled),
            schedule_cron: std::env::var("SCRAPER_SCHEDULE_CRON")
                .unwrap_or(defaults.schedule_cron),
            timezone,
            rate_limit: Duration::from_millis(env_parse(
                "SCRAPER_RATE_LIMIT_MS",
                defaults.rate_limit.as_millis() as u64,
            )),
            max_retries: env_parse("SCRAPER_MAX_RETRIES", defaults.max_retries),
            retry_delay_minutes: env_parse(
                "SCRAPER_RETRY_DELAY_MINUTES",
                defaults.retry_delay_minutes,
            ),
            source_timeout: Duration::from_millis(env_parse(
                "SCRAPER_SOURCE_TIMEOUT_MS",
                defaults.source_timeout.as_millis() as u64,
            )),
            reclaim_after: chrono::Duration::minutes(env_parse(
                "SCRAPER_RECLAIM_AFTER_MINUTES",
                defaults.reclaim_after.num_minutes(),
            )),
            metrics_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_scraper_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("SCRAPER_") {
                unsafe {
                    std::env::remove_var(&key);
                }
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_match_documented_values() {
        clear_scraper_env();
        let config = ScraperConfig::from_env();
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(5000));
        assert_eq!(config.workflow_concurrency, 5);
        assert!(!config.schedule_enabled);
        assert_eq!(config.schedule_cron, "0 2 * * *");
        assert_eq!(config.timezone, chrono_tz::UTC);
        assert_eq!(config.rate_limit, Duration::from_millis(2000));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_minutes, 30);
        assert_eq!(config.reclaim_after, chrono::Duration::minutes(60));
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    #[serial]
    fn environment_overrides_are_honoured() {
        clear_scraper_env();
        unsafe {
            std::env::set_var("SCRAPER_CONCURRENT_LIMIT", "7");
            std::env::set_var("SCRAPER_POLL_INTERVAL_MS", "250");
            std::env::set_var("SCRAPER_SCHEDULE_ENABLED", "true");
            std::env::set_var("SCRAPER_TIMEZONE", "Europe/Brussels");
            std::env::set_var("SCRAPER_MAX_RETRIES", "5");
        }
        let config = ScraperConfig::from_env();
        assert_eq!(config.max_concurrent_jobs, 7);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(config.schedule_enabled);
        assert_eq!(config.timezone, chrono_tz::Europe::Brussels);
        assert_eq!(config.max_retries, 5);
        clear_scraper_env();
    }

    #[test]
    #[serial]
    fn garbage_values_fall_back_to_defaults() {
        clear_scraper_env();
        unsafe {
            std::env::set_var("SCRAPER_CONCURRENT_LIMIT", "a lot");
            std::env::set_var("SCRAPER_TIMEZONE", "Mars/Olympus_Mons");
        }
        let config = ScraperConfig::from_env();
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.timezone, chrono_tz::UTC);
        clear_scraper_env();
    }
}
