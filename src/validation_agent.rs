use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::aircraft::registration_is_valid;
use crate::aircraft_types::AircraftTypeModel;
use crate::aircraft_types_repo::AircraftTypesRepository;
use crate::details_agent::AircraftDetails;
use crate::extractor::{ExtractOptions, Extractor};

/// Earliest plausible delivery date: powered flight begins.
const EARLIEST_DELIVERY_YEAR: i32 = 1903;

/// Fields that count towards record completeness.
const ESSENTIAL_FIELD_COUNT: f64 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_value: Option<serde_json::Value>,
}

impl ValidationIssue {
    fn new(field: &str, severity: IssueSeverity, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            severity,
            message: message.into(),
            suggested_value: None,
        }
    }

    fn with_suggestion(mut self, suggested: serde_json::Value) -> Self {
        self.suggested_value = Some(suggested);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub confidence_score: f64,
    pub issues: Vec<ValidationIssue>,
    pub recommended_values: HashMap<String, serde_json::Value>,
    pub summary: String,
    pub validated_at: DateTime<Utc>,
}

/// Format-level checks on a candidate record.
pub fn format_checks(candidate: &AircraftDetails, today: NaiveDate) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if !registration_is_valid(&candidate.registration) {
        issues.push(ValidationIssue::new(
            "registration",
            IssueSeverity::Error,
            format!(
                "Registration {:?} does not match any national format",
                candidate.registration
            ),
        ));
    }

    if let Some(delivery) = candidate.delivery_date {
        if delivery > today {
            issues.push(ValidationIssue::new(
                "delivery_date",
                IssueSeverity::Warning,
                format!("Delivery date {} is in the future", delivery),
            ));
        }
        if delivery.year() < EARLIEST_DELIVERY_YEAR {
            issues.push(ValidationIssue::new(
                "delivery_date",
                IssueSeverity::Error,
                format!("Delivery date {} predates powered flight", delivery),
            ));
        }
    }

    if let Some(seats) = &candidate.seat_configuration {
        if let (Some(sum), Some(total)) = (seats.cabin_sum(), seats.total) {
            if sum != total {
                issues.push(
                    ValidationIssue::new(
                        "total_seats",
                        IssueSeverity::Warning,
                        format!("Cabin counts sum to {} but total_seats is {}", sum, total),
                    )
                    .with_suggestion(json!(sum)),
                );
            }
        }
        if seats.total.is_some_and(|t| t > 1000) {
            issues.push(ValidationIssue::new(
                "total_seats",
                IssueSeverity::Warning,
                "Total seats exceeds any aircraft in service",
            ));
        }
    }

    issues
}

/// Internal-consistency checks.
pub fn logic_checks(candidate: &AircraftDetails, today: NaiveDate) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if let (Some(last_flight), Some(delivery)) =
        (candidate.last_flight_date, candidate.delivery_date)
    {
        if last_flight < delivery {
            issues.push(ValidationIssue::new(
                "last_flight_date",
                IssueSeverity::Error,
                format!("Last flight {} predates delivery {}", last_flight, delivery),
            ));
        }
    }

    if let (Some(age), Some(delivery)) = (candidate.age_years, candidate.delivery_date) {
        let expected = (today.year() - delivery.year()) as f64;
        if (age - expected).abs() > 1.0 {
            issues.push(
                ValidationIssue::new(
                    "age_years",
                    IssueSeverity::Warning,
                    format!("Reported age {} does not match delivery year ({})", age, expected),
                )
                .with_suggestion(json!(expected)),
            );
        }
    }

    if let Some(status) = &candidate.status {
        if candidate.parsed_status().is_none() {
            issues.push(
                ValidationIssue::new(
                    "status",
                    IssueSeverity::Warning,
                    format!("Status {:?} is not a recognised value", status),
                )
                .with_suggestion(json!("unknown")),
            );
        }
    }

    issues
}

/// Checks against the previously stored record.
pub fn cross_reference_checks(
    candidate: &AircraftDetails,
    existing: &AircraftDetails,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if let (Some(new_msn), Some(old_msn)) = (&candidate.msn, &existing.msn) {
        if new_msn != old_msn {
            issues.push(
                ValidationIssue::new(
                    "msn",
                    IssueSeverity::Error,
                    format!(
                        "Serial number changed from {:?} to {:?}; serial numbers are immutable",
                        old_msn, new_msn
                    ),
                )
                .with_suggestion(json!(old_msn)),
            );
        }
    }

    if let (Some(new_delivery), Some(old_delivery)) =
        (candidate.delivery_date, existing.delivery_date)
    {
        if new_delivery != old_delivery {
            issues.push(ValidationIssue::new(
                "delivery_date",
                IssueSeverity::Warning,
                format!("Delivery date changed from {} to {}", old_delivery, new_delivery),
            ));
        }
    }

    if existing.confidence_score - candidate.confidence_score > 0.2 {
        issues.push(ValidationIssue::new(
            "confidence_score",
            IssueSeverity::Info,
            format!(
                "Confidence dropped from {:.2} to {:.2}",
                existing.confidence_score, candidate.confidence_score
            ),
        ));
    }

    issues
}

/// Checks against the aircraft-type specification, when one was resolved.
pub fn type_spec_checks(
    candidate: &AircraftDetails,
    type_spec: Option<&AircraftTypeModel>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let Some(type_code) = &candidate.aircraft_type else {
        return issues;
    };

    let Some(spec) = type_spec else {
        issues.push(ValidationIssue::new(
            "aircraft_type",
            IssueSeverity::Warning,
            format!("Aircraft type {:?} is not in the reference catalog", type_code),
        ));
        return issues;
    };

    if let Some(manufacturer) = &candidate.manufacturer {
        if !manufacturer.eq_ignore_ascii_case(&spec.manufacturer) {
            issues.push(
                ValidationIssue::new(
                    "manufacturer",
                    IssueSeverity::Warning,
                    format!(
                        "Manufacturer {:?} disagrees with type {} ({})",
                        manufacturer, type_code, spec.manufacturer
                    ),
                )
                .with_suggestion(json!(spec.manufacturer)),
            );
        }
    }

    if let Some(total) = candidate.seat_configuration.as_ref().and_then(|s| s.total) {
        if let (Some(typical), Some(max)) = (spec.typical_seats, spec.max_seats) {
            let low = 0.7 * typical as f64;
            let high = 1.1 * max as f64;
            let total = total as f64;
            if total < low || total > high {
                issues.push(ValidationIssue::new(
                    "total_seats",
                    IssueSeverity::Warning,
                    format!(
                        "Seat total {} is outside the plausible range [{:.0}, {:.0}] for {}",
                        total, low, high, type_code
                    ),
                ));
            }
        }
    }

    issues
}

/// Fraction of essential fields the candidate actually carries.
pub fn completeness(candidate: &AircraftDetails) -> f64 {
    let mut populated = 0usize;
    if !candidate.registration.is_empty() {
        populated += 1;
    }
    if candidate.aircraft_type.is_some() {
        populated += 1;
    }
    if candidate.manufacturer.is_some() {
        populated += 1;
    }
    if candidate.model.is_some() {
        populated += 1;
    }
    if candidate.msn.is_some() {
        populated += 1;
    }
    if candidate.delivery_date.is_some() {
        populated += 1;
    }
    if candidate
        .seat_configuration
        .as_ref()
        .is_some_and(|s| !s.is_empty())
    {
        populated += 1;
    }
    populated as f64 / ESSENTIAL_FIELD_COUNT
}

/// Fold accumulated issues into the final verdict.
pub fn compose_result(candidate: &AircraftDetails, issues: Vec<ValidationIssue>) -> ValidationResult {
    let errors = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Error)
        .count();
    let warnings = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Warning)
        .count();
    let infos = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Info)
        .count();

    let mut recommended_values = HashMap::new();
    for issue in &issues {
        if issue.severity == IssueSeverity::Info {
            continue;
        }
        if let Some(suggested) = &issue.suggested_value {
            recommended_values.insert(issue.field.clone(), suggested.clone());
        }
    }

    let confidence_score = (candidate.confidence_score
        - 0.2 * errors as f64
        - 0.1 * warnings as f64
        - 0.05 * infos as f64
        + 0.2 * completeness(candidate))
    .clamp(0.0, 1.0);

    let summary = if issues.is_empty() {
        format!("Valid record, confidence {:.2}", confidence_score)
    } else {
        format!(
            "{} error(s), {} warning(s), {} info(s), confidence {:.2}",
            errors, warnings, infos, confidence_score
        )
    };

    ValidationResult {
        is_valid: errors == 0,
        confidence_score,
        issues,
        recommended_values,
        summary,
        validated_at: Utc::now(),
    }
}

/// Overlay the validator's recommended values onto a candidate, producing
/// the effective record that gets persisted.
pub fn apply_recommended_values(
    details: &mut AircraftDetails,
    recommended: &HashMap<String, serde_json::Value>,
) {
    for (field, value) in recommended {
        match (field.as_str(), value) {
            ("msn", serde_json::Value::String(msn)) => details.msn = Some(msn.clone()),
            ("manufacturer", serde_json::Value::String(m)) => {
                details.manufacturer = Some(m.clone())
            }
            ("status", serde_json::Value::String(status)) => {
                details.status = Some(status.clone())
            }
            ("age_years", serde_json::Value::Number(age)) => {
                details.age_years = age.as_f64();
            }
            ("total_seats", serde_json::Value::Number(total)) => {
                if let (Some(seats), Some(total)) = (
                    details.seat_configuration.as_mut(),
                    total.as_i64().map(|t| t as i32),
                ) {
                    seats.total = Some(total);
                }
            }
            _ => debug!("No overlay rule for recommended field {}", field),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SemanticIssuesPayload {
    #[serde(default)]
    issues: Vec<SemanticIssue>,
}

#[derive(Debug, Deserialize)]
struct SemanticIssue {
    field: String,
    severity: String,
    message: String,
}

/// Validates candidate records with rule checks, a cross-reference pass and
/// a best-effort semantic pass through the extractor.
#[derive(Clone)]
pub struct ValidationAgent {
    types: AircraftTypesRepository,
    extractor: Arc<dyn Extractor>,
}

impl ValidationAgent {
    pub fn new(types: AircraftTypesRepository, extractor: Arc<dyn Extractor>) -> Self {
        Self { types, extractor }
    }

    #[tracing::instrument(skip_all, fields(registration = %candidate.registration))]
    pub async fn validate(
        &self,
        candidate: &AircraftDetails,
        existing: Option<&AircraftDetails>,
    ) -> Result<ValidationResult> {
        let today = Utc::now().date_naive();
        let mut issues = format_checks(candidate, today);
        issues.extend(logic_checks(candidate, today));

        if let Some(existing) = existing {
            issues.extend(cross_reference_checks(candidate, existing));
        }

        let type_spec = match &candidate.aircraft_type {
            Some(code) => self.types.find_by_code(code).await?,
            None => None,
        };
        issues.extend(type_spec_checks(candidate, type_spec.as_ref()));

        issues.extend(self.semantic_issues(candidate).await);

        metrics::counter!("scraper.validations").increment(1);
        Ok(compose_result(candidate, issues))
    }

    /// Ask the extractor to sanity-check the candidate. Failures are silent:
    /// a broken semantic pass contributes no issues.
    async fn semantic_issues(&self, candidate: &AircraftDetails) -> Vec<ValidationIssue> {
        let payload = match serde_json::to_string(candidate) {
            Ok(payload) => payload,
            Err(_) => return Vec::new(),
        };
        let prompt = format!(
            "Review this aircraft record for factual inconsistencies (impossible \
             type/manufacturer pairings, implausible dates, contradictory fields). Respond \
             with only JSON: {{\"issues\": [{{\"field\": string, \"severity\": \
             \"error\"|\"warning\"|\"info\", \"message\": string}}]}}. An empty list means \
             the record looks consistent.\n\n{}",
            payload
        );

        let value = match self
            .extractor
            .extract_json(&prompt, &ExtractOptions::default())
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Semantic validation pass failed for {}: {:#}",
                    candidate.registration, e
                );
                return Vec::new();
            }
        };

        let parsed: SemanticIssuesPayload = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(_) => return Vec::new(),
        };

        parsed
            .issues
            .into_iter()
            .map(|issue| ValidationIssue {
                field: issue.field,
                severity: match issue.severity.to_lowercase().as_str() {
                    "error" => IssueSeverity::Error,
                    "warning" => IssueSeverity::Warning,
                    _ => IssueSeverity::Info,
                },
                message: issue.message,
                suggested_value: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aircraft_configurations::SeatConfiguration;

    fn candidate(registration: &str) -> AircraftDetails {
        AircraftDetails::empty(registration)
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    #[test]
    fn bad_registration_is_an_error() {
        let issues = format_checks(&candidate("!!bogus!!"), today());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Error);
        assert_eq!(issues[0].field, "registration");

        assert!(format_checks(&candidate("N123AB"), today()).is_empty());
    }

    #[test]
    fn future_delivery_warns_and_ancient_delivery_errors() {
        let mut c = candidate("N123AB");
        c.delivery_date = Some(today() + chrono::Duration::days(30));
        let issues = format_checks(&c, today());
        assert!(issues.iter().any(|i| i.severity == IssueSeverity::Warning));

        c.delivery_date = NaiveDate::from_ymd_opt(1899, 1, 1);
        let issues = format_checks(&c, today());
        assert!(issues.iter().any(|i| i.severity == IssueSeverity::Error));
    }

    #[test]
    fn seat_sum_mismatch_suggests_corrected_total() {
        let mut c = candidate("N123AB");
        c.seat_configuration = Some(SeatConfiguration {
            business: Some(16),
            economy: Some(150),
            total: Some(180),
            ..SeatConfiguration::default()
        });
        let issues = format_checks(&c, today());
        let issue = issues.iter().find(|i| i.field == "total_seats").unwrap();
        assert_eq!(issue.severity, IssueSeverity::Warning);
        assert_eq!(issue.suggested_value, Some(json!(166)));
    }

    #[test]
    fn absurd_seat_total_warns() {
        let mut c = candidate("N123AB");
        c.seat_configuration = Some(SeatConfiguration {
            total: Some(1200),
            ..SeatConfiguration::default()
        });
        let issues = format_checks(&c, today());
        assert!(issues.iter().any(|i| i.field == "total_seats"));
    }

    #[test]
    fn last_flight_before_delivery_is_an_error() {
        let mut c = candidate("N123AB");
        c.delivery_date = NaiveDate::from_ymd_opt(2020, 1, 1);
        c.last_flight_date = NaiveDate::from_ymd_opt(2019, 6, 1);
        let issues = logic_checks(&c, today());
        assert!(issues.iter().any(|i| i.severity == IssueSeverity::Error));
    }

    #[test]
    fn age_mismatch_warns_with_correction() {
        let mut c = candidate("N123AB");
        c.delivery_date = NaiveDate::from_ymd_opt(2015, 6, 1);
        c.age_years = Some(25.0);
        let issues = logic_checks(&c, today());
        let issue = issues.iter().find(|i| i.field == "age_years").unwrap();
        let expected = (today().year() - 2015) as f64;
        assert_eq!(issue.suggested_value, Some(json!(expected)));
    }

    #[test]
    fn unknown_status_warns_suggesting_unknown() {
        let mut c = candidate("N123AB");
        c.status = Some("flying around".to_string());
        let issues = logic_checks(&c, today());
        let issue = issues.iter().find(|i| i.field == "status").unwrap();
        assert_eq!(issue.suggested_value, Some(json!("unknown")));
    }

    #[test]
    fn msn_change_is_an_error_suggesting_existing() {
        let mut existing = candidate("N1ZZ");
        existing.msn = Some("A".to_string());
        let mut c = candidate("N1ZZ");
        c.msn = Some("C".to_string());

        let issues = cross_reference_checks(&c, &existing);
        let issue = issues.iter().find(|i| i.field == "msn").unwrap();
        assert_eq!(issue.severity, IssueSeverity::Error);
        assert_eq!(issue.suggested_value, Some(json!("A")));
    }

    #[test]
    fn confidence_drop_is_informational() {
        let mut existing = candidate("N1ZZ");
        existing.confidence_score = 0.9;
        let mut c = candidate("N1ZZ");
        c.confidence_score = 0.5;
        let issues = cross_reference_checks(&c, &existing);
        assert!(issues.iter().any(|i| i.severity == IssueSeverity::Info));

        c.confidence_score = 0.8;
        assert!(
            cross_reference_checks(&c, &existing)
                .iter()
                .all(|i| i.field != "confidence_score")
        );
    }

    fn boeing_738() -> AircraftTypeModel {
        AircraftTypeModel {
            id: uuid::Uuid::new_v4(),
            iata_code: Some("738".to_string()),
            icao_code: Some("B738".to_string()),
            manufacturer: "Boeing".to_string(),
            model: "737-800".to_string(),
            typical_seats: Some(162),
            max_seats: Some(189),
            range_km: Some(5436),
            engine_type: Some("turbofan".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn manufacturer_mismatch_suggests_spec_manufacturer() {
        let mut c = candidate("N123AB");
        c.aircraft_type = Some("738".to_string());
        c.manufacturer = Some("Airbus".to_string());
        let issues = type_spec_checks(&c, Some(&boeing_738()));
        let issue = issues.iter().find(|i| i.field == "manufacturer").unwrap();
        assert_eq!(issue.suggested_value, Some(json!("Boeing")));
    }

    #[test]
    fn seat_total_outside_type_range_warns() {
        let mut c = candidate("N123AB");
        c.aircraft_type = Some("738".to_string());
        c.seat_configuration = Some(SeatConfiguration {
            total: Some(400),
            ..SeatConfiguration::default()
        });
        let issues = type_spec_checks(&c, Some(&boeing_738()));
        assert!(issues.iter().any(|i| i.field == "total_seats"));

        // 162*0.7 = 113.4, 189*1.1 = 207.9
        c.seat_configuration = Some(SeatConfiguration {
            total: Some(170),
            ..SeatConfiguration::default()
        });
        assert!(type_spec_checks(&c, Some(&boeing_738())).is_empty());
    }

    #[test]
    fn unknown_type_warns() {
        let mut c = candidate("N123AB");
        c.aircraft_type = Some("Z99".to_string());
        let issues = type_spec_checks(&c, None);
        assert_eq!(issues[0].field, "aircraft_type");
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
    }

    #[test]
    fn composition_derives_validity_and_confidence() {
        let mut c = candidate("N123AB");
        c.aircraft_type = Some("738".to_string());
        c.manufacturer = Some("Boeing".to_string());
        c.model = Some("737-800".to_string());
        c.msn = Some("30241".to_string());
        c.delivery_date = NaiveDate::from_ymd_opt(2015, 6, 1);
        c.confidence_score = 0.8;

        // completeness = 6/7 with no seat data
        let result = compose_result(&c, vec![]);
        assert!(result.is_valid);
        let expected = 0.8 + 0.2 * (6.0 / 7.0);
        assert!((result.confidence_score - expected).abs() < 1e-9);

        let issues = vec![
            ValidationIssue::new("msn", IssueSeverity::Error, "changed")
                .with_suggestion(json!("A")),
            ValidationIssue::new("age_years", IssueSeverity::Warning, "off"),
            ValidationIssue::new("confidence_score", IssueSeverity::Info, "dropped"),
        ];
        let result = compose_result(&c, issues);
        assert!(!result.is_valid);
        let expected: f64 = (0.8 - 0.2 - 0.1 - 0.05 + 0.2 * (6.0_f64 / 7.0)).clamp(0.0, 1.0);
        assert!((result.confidence_score - expected).abs() < 1e-9);
        assert_eq!(result.recommended_values.get("msn"), Some(&json!("A")));
        // Info-severity suggestions are never recommended
        assert!(!result.recommended_values.contains_key("confidence_score"));
    }

    #[test]
    fn confidence_is_clamped_to_unit_interval() {
        let mut c = candidate("N123AB");
        c.confidence_score = 0.05;
        let issues = vec![
            ValidationIssue::new("a", IssueSeverity::Error, "x"),
            ValidationIssue::new("b", IssueSeverity::Error, "y"),
        ];
        let result = compose_result(&c, issues);
        assert_eq!(result.confidence_score, 0.0);
    }

    #[test]
    fn overlay_applies_recommended_values() {
        let mut c = candidate("N1ZZ");
        c.msn = Some("C".to_string());
        c.status = Some("flying".to_string());
        c.seat_configuration = Some(SeatConfiguration {
            business: Some(16),
            economy: Some(150),
            total: Some(180),
            ..SeatConfiguration::default()
        });

        let mut recommended = HashMap::new();
        recommended.insert("msn".to_string(), json!("A"));
        recommended.insert("status".to_string(), json!("unknown"));
        recommended.insert("total_seats".to_string(), json!(166));
        recommended.insert("age_years".to_string(), json!(10.0));

        apply_recommended_values(&mut c, &recommended);
        assert_eq!(c.msn.as_deref(), Some("A"));
        assert_eq!(c.status.as_deref(), Some("unknown"));
        assert_eq!(c.seat_configuration.as_ref().unwrap().total, Some(166));
        assert_eq!(c.age_years, Some(10.0));
    }
}
