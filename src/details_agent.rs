use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aircraft::{AircraftStatus, normalize_registration};
use crate::aircraft_configurations::SeatConfiguration;
use crate::aircraft_repo::{AircraftRepository, AircraftWithDetails};
use crate::discovery_agent::truncate_html;
use crate::error::ScrapeError;
use crate::extractor::{ExtractOptions, Extractor};
use crate::page_loader::PageLoader;

/// HTML budget per detail page handed to the extractor.
const HTML_EXCERPT_BYTES: usize = 8 * 1024;

/// Per-registration detail sources, in priority order.
const DETAIL_SOURCE_TEMPLATES: &[(&str, &str)] = &[
    (
        "planespotters",
        "https://www.planespotters.net/search?q={registration}",
    ),
    (
        "flightradar24",
        "https://www.flightradar24.com/data/aircraft/{registration}",
    ),
    (
        "airfleets",
        "https://www.airfleets.net/recherche/?key={registration}",
    ),
];

/// Fully merged record for one airframe, as produced by the details phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AircraftDetails {
    pub registration: String,
    pub aircraft_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub msn: Option<String>,
    pub seat_configuration: Option<SeatConfiguration>,
    pub delivery_date: Option<NaiveDate>,
    pub age_years: Option<f64>,
    pub status: Option<String>,
    pub current_location: Option<String>,
    pub last_flight_date: Option<NaiveDate>,
    pub engines: Option<String>,
    pub confidence_score: f64,
    pub data_sources: Vec<String>,
    pub extracted_at: DateTime<Utc>,
}

impl AircraftDetails {
    pub fn empty(registration: &str) -> Self {
        Self {
            registration: normalize_registration(registration),
            aircraft_type: None,
            manufacturer: None,
            model: None,
            msn: None,
            seat_configuration: None,
            delivery_date: None,
            age_years: None,
            status: None,
            current_location: None,
            last_flight_date: None,
            engines: None,
            confidence_score: 0.0,
            data_sources: Vec::new(),
            extracted_at: Utc::now(),
        }
    }

    /// Parsed status, if the raw string names a known one.
    pub fn parsed_status(&self) -> Option<AircraftStatus> {
        self.status.as_deref().and_then(|s| s.parse().ok())
    }
}

/// One source's (or the database seed's) contribution to a record. All
/// fields optional; sources report whatever they happen to know.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailPartial {
    pub aircraft_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub msn: Option<String>,
    pub seat_configuration: Option<SeatConfiguration>,
    pub delivery_date: Option<NaiveDate>,
    pub age_years: Option<f64>,
    pub status: Option<String>,
    pub current_location: Option<String>,
    pub last_flight_date: Option<NaiveDate>,
    pub engines: Option<String>,
}

impl DetailPartial {
    pub fn is_empty(&self) -> bool {
        self.aircraft_type.is_none()
            && self.manufacturer.is_none()
            && self.model.is_none()
            && self.msn.is_none()
            && self
                .seat_configuration
                .as_ref()
                .is_none_or(SeatConfiguration::is_empty)
            && self.delivery_date.is_none()
            && self.age_years.is_none()
            && self.status.is_none()
            && self.current_location.is_none()
            && self.last_flight_date.is_none()
            && self.engines.is_none()
    }
}

/// Wire format returned by the extractor for a detail page. Dates arrive as
/// strings and are parsed leniently; a malformed date degrades that field to
/// absent rather than failing the source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDetailPartial {
    pub aircraft_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub msn: Option<String>,
    pub seat_configuration: Option<SeatConfiguration>,
    pub delivery_date: Option<String>,
    pub age_years: Option<f64>,
    pub status: Option<String>,
    pub current_location: Option<String>,
    pub last_flight_date: Option<String>,
    pub engines: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s.to_lowercase() != "null" && s != "-")
}

/// Parse dates the way scraped pages write them.
pub fn parse_lenient_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d %b %Y", "%b %Y", "%Y"] {
        match format {
            "%b %Y" => {
                if let Ok(date) = NaiveDate::parse_from_str(&format!("1 {}", raw), "%d %b %Y") {
                    return Some(date);
                }
            }
            "%Y" => {
                if let Ok(year) = raw.parse::<i32>() {
                    if (1903..=2100).contains(&year) {
                        return NaiveDate::from_ymd_opt(year, 1, 1);
                    }
                }
            }
            _ => {
                if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
                    return Some(date);
                }
            }
        }
    }
    None
}

impl RawDetailPartial {
    pub fn normalize(self) -> DetailPartial {
        let delivery_date = self.delivery_date.as_deref().and_then(|raw| {
            let parsed = parse_lenient_date(raw);
            if parsed.is_none() {
                debug!("Unparseable delivery date {:?}", raw);
            }
            parsed
        });
        let last_flight_date = self.last_flight_date.as_deref().and_then(parse_lenient_date);
        DetailPartial {
            aircraft_type: clean(self.aircraft_type),
            manufacturer: clean(self.manufacturer),
            model: clean(self.model),
            msn: clean(self.msn),
            seat_configuration: self.seat_configuration.filter(|s| !s.is_empty()),
            delivery_date,
            age_years: self.age_years,
            status: clean(self.status),
            current_location: clean(self.current_location),
            last_flight_date,
            engines: clean(self.engines),
        }
    }
}

/// Merge a database seed and per-source partials into one record.
///
/// Scalars: first non-null wins, existing first, then partials in source
/// priority order. The serial number is the exception: a source-reported
/// value surfaces in the merged record (falling back to the seed) so that
/// validation can flag a conflict with the stored serial; stickiness is
/// enforced downstream by the validation overlay and the repository.
/// Status: any non-unknown partial beats the seed. Seats: the richest
/// partial wins. Last flight: most recent across everything. Age: derived
/// from the delivery date when nothing reported it.
pub fn merge_details(
    registration: &str,
    existing: Option<&DetailPartial>,
    partials: &[DetailPartial],
) -> AircraftDetails {
    let mut merged = AircraftDetails::empty(registration);

    let mut in_order: Vec<&DetailPartial> = Vec::with_capacity(partials.len() + 1);
    if let Some(seed) = existing {
        in_order.push(seed);
    }
    in_order.extend(partials.iter());

    for partial in &in_order {
        merged.aircraft_type = merged.aircraft_type.or_else(|| partial.aircraft_type.clone());
        merged.manufacturer = merged.manufacturer.or_else(|| partial.manufacturer.clone());
        merged.model = merged.model.or_else(|| partial.model.clone());
        merged.delivery_date = merged.delivery_date.or(partial.delivery_date);
        merged.current_location = merged
            .current_location
            .or_else(|| partial.current_location.clone());
        merged.engines = merged.engines.or_else(|| partial.engines.clone());
    }

    merged.msn = partials
        .iter()
        .find_map(|p| p.msn.clone())
        .or_else(|| existing.and_then(|e| e.msn.clone()));

    // Status: a live source claiming anything other than unknown overrides
    // the stored value.
    let source_status = partials.iter().find_map(|p| {
        p.status
            .as_ref()
            .filter(|s| !s.eq_ignore_ascii_case("unknown"))
            .cloned()
    });
    merged.status = source_status
        .or_else(|| existing.and_then(|e| e.status.clone()))
        .or_else(|| Some(AircraftStatus::Unknown.to_string()));

    merged.seat_configuration = in_order
        .iter()
        .filter_map(|p| p.seat_configuration.as_ref())
        .max_by_key(|s| s.populated_fields())
        .cloned();

    merged.last_flight_date = in_order.iter().filter_map(|p| p.last_flight_date).max();

    merged.age_years = in_order.iter().find_map(|p| p.age_years).or_else(|| {
        merged
            .delivery_date
            .map(|delivery| (Utc::now().year() - delivery.year()) as f64)
    });

    merged
}

/// Confidence in a merged record: source agreement plus field completeness.
pub fn details_confidence(source_count: usize, merged: &AircraftDetails) -> f64 {
    let mut confidence = 0.15 * source_count.min(2) as f64;
    if merged.aircraft_type.is_some() {
        confidence += 0.15;
    }
    if merged.manufacturer.is_some() {
        confidence += 0.1;
    }
    if merged.model.is_some() {
        confidence += 0.1;
    }
    if merged.msn.is_some() {
        confidence += 0.15;
    }
    if merged.delivery_date.is_some() {
        confidence += 0.1;
    }
    if merged
        .seat_configuration
        .as_ref()
        .is_some_and(|s| !s.is_empty())
    {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

/// Seed partial built from the stored record, including its joined type
/// spec and current configuration.
pub fn seed_from_existing(existing: &AircraftWithDetails) -> DetailPartial {
    let type_code = existing.aircraft_type.as_ref().and_then(|t| {
        t.iata_code
            .clone()
            .or_else(|| t.icao_code.clone())
    });
    DetailPartial {
        aircraft_type: type_code,
        manufacturer: existing
            .aircraft_type
            .as_ref()
            .map(|t| t.manufacturer.clone()),
        model: existing.aircraft_type.as_ref().map(|t| t.model.clone()),
        msn: existing.aircraft.manufacturer_serial_number.clone(),
        seat_configuration: existing
            .current_configuration
            .as_ref()
            .map(|c| c.to_seat_configuration()),
        delivery_date: existing.aircraft.delivery_date,
        age_years: existing.aircraft.age_years,
        status: Some(existing.aircraft.status.to_string()),
        current_location: None,
        last_flight_date: existing.aircraft.last_seen_date,
        engines: existing
            .aircraft_type
            .as_ref()
            .and_then(|t| t.engine_type.clone()),
    }
}

/// Produces one merged detail record per registration by scraping the
/// fixed tracking-database sources and folding in the stored record.
#[derive(Clone)]
pub struct DetailsAgent {
    aircraft: AircraftRepository,
    page_loader: Arc<dyn PageLoader>,
    extractor: Arc<dyn Extractor>,
}

impl DetailsAgent {
    pub fn new(
        aircraft: AircraftRepository,
        page_loader: Arc<dyn PageLoader>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            aircraft,
            page_loader,
            extractor,
        }
    }

    #[tracing::instrument(skip(self), fields(%registration))]
    pub async fn get_details(
        &self,
        registration: &str,
        airline_code: Option<&str>,
    ) -> Result<AircraftDetails> {
        let registration = normalize_registration(registration);
        if registration.is_empty() {
            return Err(ScrapeError::InvalidRegistration(String::new()).into());
        }

        let existing = self.aircraft.find_by_registration(&registration).await?;
        let seed = existing.as_ref().map(seed_from_existing);
        let seed_sources = existing
            .as_ref()
            .and_then(|e| e.aircraft.engine_metadata())
            .map(|m| m.data_sources)
            .unwrap_or_default();

        let mut partials = Vec::new();
        let mut sources = Vec::new();
        for (name, template) in DETAIL_SOURCE_TEMPLATES {
            match self.scrape_source(&registration, airline_code, template).await {
                Ok(Some(partial)) => {
                    partials.push(partial);
                    sources.push(name.to_string());
                }
                Ok(None) => debug!("Source {} had nothing for {}", name, registration),
                Err(e) => warn!("Source {} failed for {}: {:#}", name, registration, e),
            }
        }

        let mut merged = merge_details(&registration, seed.as_ref(), &partials);
        merged.confidence_score = details_confidence(partials.len(), &merged);
        merged.data_sources = seed_sources;
        merged.data_sources.extend(sources);
        merged.extracted_at = Utc::now();

        metrics::counter!("scraper.details_merged").increment(1);
        Ok(merged)
    }

    async fn scrape_source(
        &self,
        registration: &str,
        airline_code: Option<&str>,
        template: &str,
    ) -> Result<Option<DetailPartial>> {
        let url = template.replace("{registration}", registration);
        let page = self.page_loader.fetch(&url).await?;

        if let Some(title) = &page.title {
            let lower = title.to_lowercase();
            if lower.contains("not found") || lower.contains("404") {
                return Ok(None);
            }
        }

        let excerpt = truncate_html(&page.html, HTML_EXCERPT_BYTES);
        let airline_hint = airline_code
            .map(|c| format!(" operated by {}", c))
            .unwrap_or_default();
        let prompt = format!(
            "The following HTML describes the aircraft registered {}{}. Respond with only \
             JSON: {{\"aircraft_type\": string|null, \"manufacturer\": string|null, \
             \"model\": string|null, \"msn\": string|null, \"seat_configuration\": \
             {{\"first\": int|null, \"business\": int|null, \"premium_economy\": int|null, \
             \"economy\": int|null, \"total\": int|null}}|null, \"delivery_date\": \
             \"YYYY-MM-DD\"|null, \"age_years\": number|null, \"status\": string|null, \
             \"current_location\": string|null, \"last_flight_date\": \"YYYY-MM-DD\"|null, \
             \"engines\": string|null}}. Use null for anything the page does not state.\n\n{}",
            registration, airline_hint, excerpt
        );

        let payload = self
            .extractor
            .extract_json(&prompt, &ExtractOptions::default())
            .await?;
        let raw: RawDetailPartial = serde_json::from_value(payload)?;
        let partial = raw.normalize();
        Ok((!partial.is_empty()).then_some(partial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(msn: Option<&str>, model: Option<&str>) -> DetailPartial {
        DetailPartial {
            msn: msn.map(String::from),
            model: model.map(String::from),
            ..DetailPartial::default()
        }
    }

    #[test]
    fn scalars_take_first_non_null_in_order() {
        let merged = merge_details(
            "N1ZZ",
            None,
            &[partial(None, Some("737-800")), partial(Some("30241"), Some("737-900"))],
        );
        assert_eq!(merged.model.as_deref(), Some("737-800"));
        assert_eq!(merged.msn.as_deref(), Some("30241"));
    }

    #[test]
    fn seed_msn_fills_gaps_but_source_conflicts_surface() {
        let seed = partial(Some("A"), None);

        // No source reports a serial: the stored one carries over.
        let merged = merge_details("N1ZZ", Some(&seed), &[partial(None, None)]);
        assert_eq!(merged.msn.as_deref(), Some("A"));

        // A source disagrees: its value surfaces so validation can flag it
        // against the stored serial.
        let merged = merge_details("N1ZZ", Some(&seed), &[partial(Some("C"), None)]);
        assert_eq!(merged.msn.as_deref(), Some("C"));
    }

    #[test]
    fn non_unknown_source_status_overrides_seed() {
        let seed = DetailPartial {
            status: Some("active".to_string()),
            ..DetailPartial::default()
        };
        let stored = DetailPartial {
            status: Some("stored".to_string()),
            ..DetailPartial::default()
        };
        let merged = merge_details("N1ZZ", Some(&seed), &[stored]);
        assert_eq!(merged.status.as_deref(), Some("stored"));

        let unknown = DetailPartial {
            status: Some("unknown".to_string()),
            ..DetailPartial::default()
        };
        let merged = merge_details("N1ZZ", Some(&seed), &[unknown]);
        assert_eq!(merged.status.as_deref(), Some("active"));

        let merged = merge_details("N1ZZ", None, &[]);
        assert_eq!(merged.status.as_deref(), Some("unknown"));
    }

    #[test]
    fn richest_seat_configuration_wins() {
        let sparse = DetailPartial {
            seat_configuration: Some(SeatConfiguration {
                total: Some(189),
                ..SeatConfiguration::default()
            }),
            ..DetailPartial::default()
        };
        let rich = DetailPartial {
            seat_configuration: Some(SeatConfiguration {
                business: Some(16),
                economy: Some(150),
                total: Some(166),
                ..SeatConfiguration::default()
            }),
            ..DetailPartial::default()
        };
        let merged = merge_details("N1ZZ", None, &[sparse, rich]);
        assert_eq!(merged.seat_configuration.unwrap().business, Some(16));
    }

    #[test]
    fn most_recent_last_flight_wins() {
        let older = DetailPartial {
            last_flight_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..DetailPartial::default()
        };
        let newer = DetailPartial {
            last_flight_date: NaiveDate::from_ymd_opt(2025, 1, 15),
            ..DetailPartial::default()
        };
        let merged = merge_details("N1ZZ", None, &[older, newer]);
        assert_eq!(merged.last_flight_date, NaiveDate::from_ymd_opt(2025, 1, 15));
    }

    #[test]
    fn age_is_derived_from_delivery_when_missing() {
        let with_delivery = DetailPartial {
            delivery_date: NaiveDate::from_ymd_opt(2015, 6, 1),
            ..DetailPartial::default()
        };
        let merged = merge_details("N1ZZ", None, &[with_delivery]);
        let expected = (Utc::now().year() - 2015) as f64;
        assert_eq!(merged.age_years, Some(expected));
    }

    #[test]
    fn confidence_counts_sources_and_fields() {
        let mut merged = AircraftDetails::empty("N1ZZ");
        assert_eq!(details_confidence(0, &merged), 0.0);

        merged.aircraft_type = Some("738".to_string());
        merged.manufacturer = Some("Boeing".to_string());
        merged.model = Some("737-800".to_string());
        merged.msn = Some("30241".to_string());
        let confidence = details_confidence(1, &merged);
        assert!((confidence - 0.65).abs() < 1e-9);

        // Source bonus is capped at two sources
        let capped = details_confidence(5, &merged);
        assert!((capped - 0.8).abs() < 1e-9);
    }

    #[test]
    fn zero_source_zero_seed_record_is_flagged_empty() {
        let merged = merge_details("N1ZZ", None, &[]);
        assert_eq!(merged.registration, "N1ZZ");
        assert!(merged.msn.is_none());
        assert_eq!(details_confidence(0, &merged), 0.0);
    }

    #[test]
    fn lenient_dates_parse_common_formats() {
        assert_eq!(parse_lenient_date("2015-06-01"), NaiveDate::from_ymd_opt(2015, 6, 1));
        assert_eq!(parse_lenient_date("2015/06/01"), NaiveDate::from_ymd_opt(2015, 6, 1));
        assert_eq!(parse_lenient_date("1 Jun 2015"), NaiveDate::from_ymd_opt(2015, 6, 1));
        assert_eq!(parse_lenient_date("Jun 2015"), NaiveDate::from_ymd_opt(2015, 6, 1));
        assert_eq!(parse_lenient_date("2015"), NaiveDate::from_ymd_opt(2015, 1, 1));
        assert_eq!(parse_lenient_date("yesterday"), None);
    }

    #[test]
    fn normalize_discards_placeholder_strings() {
        let raw = RawDetailPartial {
            manufacturer: Some("  ".to_string()),
            model: Some("null".to_string()),
            msn: Some("30241".to_string()),
            delivery_date: Some("not a date".to_string()),
            ..RawDetailPartial::default()
        };
        let partial = raw.normalize();
        assert!(partial.manufacturer.is_none());
        assert!(partial.model.is_none());
        assert_eq!(partial.msn.as_deref(), Some("30241"));
        assert!(partial.delivery_date.is_none());
    }
}
