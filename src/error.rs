use thiserror::Error;

/// Domain errors raised by the scraping engine.
///
/// The scheduler classifies job failures by variant rather than by matching
/// on message text, so every operation that can sink a job wraps its failure
/// in one of these before it crosses the workflow boundary.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Airline not found: {0}")]
    UnknownAirline(String),

    #[error("Aircraft type not found: {0}")]
    UnknownAircraftType(String),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    /// Page fetch or extraction failure. Swallowed per-source; only surfaces
    /// when a whole phase had nothing to work with.
    #[error("Source error: {0}")]
    TransientSource(String),

    #[error("Database error: {0}")]
    TransientDatabase(String),
}

impl ScrapeError {
    /// Input errors cannot succeed on a later attempt; everything else can.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ScrapeError::UnknownAirline(_)
                | ScrapeError::UnknownAircraftType(_)
                | ScrapeError::InvalidRegistration(_)
        )
    }
}

/// Retry classification for a job-level failure.
///
/// Unknown error types default to retryable: a bug or an infrastructure
/// hiccup deserves another attempt before the job goes terminal.
pub fn should_retry(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ScrapeError>()
        .map(ScrapeError::is_retryable)
        .unwrap_or(true)
}
