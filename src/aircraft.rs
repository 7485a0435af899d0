use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Operational status of an airframe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, DbEnum, Serialize, Deserialize)]
#[db_enum(existing_type_path = "crate::schema::sql_types::AircraftStatus")]
#[serde(rename_all = "lowercase")]
pub enum AircraftStatus {
    Active,
    Stored,
    Maintenance,
    Retired,
    Scrapped,
    #[default]
    Unknown,
}

impl FromStr for AircraftStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(AircraftStatus::Active),
            "stored" => Ok(AircraftStatus::Stored),
            "maintenance" => Ok(AircraftStatus::Maintenance),
            "retired" => Ok(AircraftStatus::Retired),
            "scrapped" => Ok(AircraftStatus::Scrapped),
            "unknown" => Ok(AircraftStatus::Unknown),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for AircraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AircraftStatus::Active => "active",
            AircraftStatus::Stored => "stored",
            AircraftStatus::Maintenance => "maintenance",
            AircraftStatus::Retired => "retired",
            AircraftStatus::Scrapped => "scrapped",
            AircraftStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// National registration formats accepted for tail numbers: US (N-numbers),
/// hyphenated prefix-suffix forms, two-letter prefixes with digits, and
/// Chinese B-registrations.
static REGISTRATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^N[0-9]{1,5}[A-Z]{0,2}$",
        r"^[A-Z]{1,2}-[A-Z]{3,4}$",
        r"^[A-Z]{2}-[A-Z]{3}$",
        r"^[A-Z]{2}[0-9]{3,4}$",
        r"^B-[0-9A-Z]{4}$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("registration pattern must compile"))
    .collect()
});

/// Canonical form used for storage and lookups.
pub fn normalize_registration(registration: &str) -> String {
    registration.trim().to_uppercase()
}

/// Whether a registration matches at least one national format.
pub fn registration_is_valid(registration: &str) -> bool {
    let normalized = normalize_registration(registration);
    !normalized.is_empty()
        && REGISTRATION_PATTERNS
            .iter()
            .any(|p| p.is_match(&normalized))
}

/// Engine-owned portion of the `metadata` JSONB column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftMetadata {
    pub confidence_score: f64,
    pub data_sources: Vec<String>,
    pub extracted_at: DateTime<Utc>,
}

impl AircraftMetadata {
    pub fn new(
        confidence_score: f64,
        data_sources: Vec<String>,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        let mut deduped: Vec<String> = Vec::with_capacity(data_sources.len());
        for source in data_sources {
            if !deduped.contains(&source) {
                deduped.push(source);
            }
        }
        Self {
            confidence_score: confidence_score.clamp(0.0, 1.0),
            data_sources: deduped,
            extracted_at,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match serde_json::from_value(value.clone()) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Malformed aircraft metadata, ignoring: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::aircraft)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AircraftModel {
    pub id: uuid::Uuid,
    pub registration: String,
    pub current_airline_id: Option<uuid::Uuid>,
    pub aircraft_type_id: Option<uuid::Uuid>,
    pub manufacturer_serial_number: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub age_years: Option<f64>,
    pub status: AircraftStatus,
    pub last_seen_date: Option<NaiveDate>,
    pub metadata: Option<serde_json::Value>,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AircraftModel {
    pub fn engine_metadata(&self) -> Option<AircraftMetadata> {
        self.metadata.as_ref().and_then(AircraftMetadata::from_value)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::aircraft)]
pub struct NewAircraft {
    pub registration: String,
    pub current_airline_id: Option<uuid::Uuid>,
    pub aircraft_type_id: Option<uuid::Uuid>,
    pub manufacturer_serial_number: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub age_years: Option<f64>,
    pub status: AircraftStatus,
    pub last_seen_date: Option<NaiveDate>,
    pub metadata: Option<serde_json::Value>,
    pub last_scraped_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn us_registrations_match() {
        for reg in ["N1", "N12345", "N123AB", "N1ZZ", "n501dn"] {
            assert!(registration_is_valid(reg), "{reg} should be valid");
        }
    }

    #[test]
    fn international_registrations_match() {
        for reg in ["G-ABCD", "D-AIMA", "PH-BHA", "VH-OQA", "JA8089", "B-18901", "B-2480"] {
            assert!(registration_is_valid(reg), "{reg} should be valid");
        }
    }

    #[test]
    fn junk_registrations_do_not_match() {
        for reg in ["", "  ", "N", "1234567890X", "G_ABCD", "TOOLONGREG99", "B-18"] {
            assert!(!registration_is_valid(reg), "{reg} should be invalid");
        }
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Active".parse::<AircraftStatus>(), Ok(AircraftStatus::Active));
        assert_eq!("STORED".parse::<AircraftStatus>(), Ok(AircraftStatus::Stored));
        assert!("in service".parse::<AircraftStatus>().is_err());
    }

    #[test]
    fn metadata_round_trips_and_dedupes_sources() {
        let metadata = AircraftMetadata::new(
            0.85,
            vec![
                "planespotters".to_string(),
                "airfleets".to_string(),
                "planespotters".to_string(),
            ],
            Utc::now(),
        );
        assert_eq!(metadata.data_sources.len(), 2);

        let parsed = AircraftMetadata::from_value(&metadata.to_value()).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn metadata_confidence_is_clamped() {
        assert_eq!(AircraftMetadata::new(1.7, vec![], Utc::now()).confidence_score, 1.0);
        assert_eq!(AircraftMetadata::new(-0.2, vec![], Utc::now()).confidence_score, 0.0);
    }
}
