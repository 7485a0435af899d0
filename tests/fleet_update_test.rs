//! End-to-end workflow tests: discovery through persistence against an
//! isolated database, with stubbed page loading and extraction.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::TestDatabase;
use fleetscan::aircraft_repo::AircraftRepository;
use fleetscan::aircraft_types::NewAircraftType;
use fleetscan::aircraft_types_repo::AircraftTypesRepository;
use fleetscan::airlines::NewAirline;
use fleetscan::airlines_repo::AirlinesRepository;
use fleetscan::db::PgPool;
use fleetscan::details_agent::DetailsAgent;
use fleetscan::discovery_agent::DiscoveryAgent;
use fleetscan::error::should_retry;
use fleetscan::extractor::{ExtractOptions, Extractor};
use fleetscan::fleet_update::{FleetUpdateOptions, FleetUpdateWorkflow, WorkflowConfig};
use fleetscan::page_loader::{PageFetch, PageLoader};
use fleetscan::validation_agent::ValidationAgent;

const FLEET_PAGE: &str = "<html><head><title>Fleet</title></head><body>\
    <table><tr><td>N1ZZ</td></tr><tr><td>N2ZZ</td></tr></table></body></html>";

/// Serves the same canned page for every URL.
struct StubPageLoader;

#[async_trait]
impl PageLoader for StubPageLoader {
    async fn fetch(&self, url: &str) -> Result<PageFetch> {
        Ok(PageFetch {
            html: FLEET_PAGE.to_string(),
            final_url: url.to_string(),
            http_status: 200,
            title: Some("Fleet".to_string()),
        })
    }
}

/// Answers discovery, details and semantic-validation prompts from a fixed
/// script. Details payloads are keyed by registration.
struct StubExtractor {
    registrations: Vec<String>,
    details: Mutex<HashMap<String, serde_json::Value>>,
}

impl StubExtractor {
    fn new(registrations: &[&str]) -> Self {
        Self {
            registrations: registrations.iter().map(|r| r.to_string()).collect(),
            details: Mutex::new(HashMap::new()),
        }
    }

    fn set_details(&self, registration: &str, payload: serde_json::Value) {
        self.details
            .lock()
            .unwrap()
            .insert(registration.to_string(), payload);
    }
}

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract_json(&self, prompt: &str, _opts: &ExtractOptions) -> Result<serde_json::Value> {
        if prompt.starts_with("Review this aircraft record") {
            return Ok(json!({"issues": []}));
        }
        if prompt.contains("aircraft registration (tail number)") {
            return Ok(json!({"registrations": self.registrations}));
        }
        let details = self.details.lock().unwrap();
        for (registration, payload) in details.iter() {
            if prompt.contains(&format!("aircraft registered {}", registration)) {
                return Ok(payload.clone());
            }
        }
        Ok(json!({}))
    }
}

struct Harness {
    workflow: FleetUpdateWorkflow,
    extractor: Arc<StubExtractor>,
    airlines: AirlinesRepository,
    aircraft: AircraftRepository,
}

async fn build_harness(pool: &PgPool, registrations: &[&str]) -> Harness {
    let airlines = AirlinesRepository::new(pool.clone());
    let aircraft = AircraftRepository::new(pool.clone());
    let types = AircraftTypesRepository::new(pool.clone());

    airlines
        .insert(NewAirline {
            iata_code: "ZZ".to_string(),
            icao_code: "ZZZ".to_string(),
            name: "Zenith Zephyr".to_string(),
            country: Some("US".to_string()),
            hub_airport: Some("ZZN".to_string()),
            website_url: Some("https://zenithzephyr.example/fleet".to_string()),
            scrape_enabled: true,
            scrape_source_urls: None,
            fleet_size_estimate: None,
        })
        .await
        .expect("seed airline");

    types
        .insert(NewAircraftType {
            iata_code: Some("738".to_string()),
            icao_code: Some("B738".to_string()),
            manufacturer: "Boeing".to_string(),
            model: "737-800".to_string(),
            typical_seats: Some(162),
            max_seats: Some(189),
            range_km: Some(5436),
            engine_type: Some("turbofan".to_string()),
        })
        .await
        .expect("seed aircraft type");

    let page_loader: Arc<dyn PageLoader> = Arc::new(StubPageLoader);
    let extractor = Arc::new(StubExtractor::new(registrations));
    let extractor_dyn: Arc<dyn Extractor> = extractor.clone();

    let workflow = FleetUpdateWorkflow::new(
        airlines.clone(),
        aircraft.clone(),
        types.clone(),
        DiscoveryAgent::new(airlines.clone(), page_loader.clone(), extractor_dyn.clone()),
        DetailsAgent::new(aircraft.clone(), page_loader, extractor_dyn.clone()),
        ValidationAgent::new(types, extractor_dyn),
        WorkflowConfig {
            concurrency: 5,
            rate_limit: Duration::ZERO,
        },
    );

    Harness {
        workflow,
        extractor,
        airlines,
        aircraft,
    }
}

fn boeing_details(msn: &str) -> serde_json::Value {
    json!({
        "aircraft_type": "738",
        "manufacturer": "Boeing",
        "model": "737-800",
        "msn": msn,
        "status": "active"
    })
}

#[tokio::test]
async fn fresh_airline_update_inserts_the_discovered_fleet() {
    let test_db = TestDatabase::new().await.expect("test database");
    let harness = build_harness(&test_db.pool(), &["N1ZZ", "N2ZZ"]).await;
    harness.extractor.set_details("N1ZZ", boeing_details("A"));
    harness.extractor.set_details("N2ZZ", boeing_details("B"));

    let result = harness
        .workflow
        .run_full_update("ZZ", FleetUpdateOptions::default(), CancellationToken::new())
        .await
        .expect("workflow run");

    assert_eq!(result.aircraft_found, 2);
    assert_eq!(result.aircraft_added, 2);
    assert_eq!(result.aircraft_updated, 0);
    assert_eq!(result.errors, 0);
    assert!(result.confidence_avg >= 0.6, "avg {}", result.confidence_avg);

    let airline = harness.airlines.get_by_code("ZZ").await.unwrap();
    assert!(airline.last_scraped_at.is_some());

    let stored = harness
        .aircraft
        .find_by_registration("n1zz")
        .await
        .unwrap()
        .expect("N1ZZ persisted");
    assert_eq!(
        stored.aircraft.manufacturer_serial_number.as_deref(),
        Some("A")
    );
    assert!(stored.aircraft_type.is_some());
    let metadata = stored.aircraft.engine_metadata().expect("metadata");
    assert!(metadata.confidence_score > 0.0);
    assert!(!metadata.data_sources.is_empty());
}

#[tokio::test]
async fn rerunning_with_unchanged_sources_is_idempotent() {
    let test_db = TestDatabase::new().await.expect("test database");
    let harness = build_harness(&test_db.pool(), &["N1ZZ", "N2ZZ"]).await;
    harness.extractor.set_details("N1ZZ", boeing_details("A"));
    harness.extractor.set_details("N2ZZ", boeing_details("B"));

    let first = harness
        .workflow
        .run_full_update("ZZ", FleetUpdateOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    let second = harness
        .workflow
        .run_full_update("ZZ", FleetUpdateOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.aircraft_found, 2);
    assert_eq!(second.aircraft_added, 0);
    assert_eq!(second.aircraft_updated, 2);
    assert_eq!(second.errors, 0);
    assert!(
        (first.confidence_avg - second.confidence_avg).abs() <= 0.01,
        "{} vs {}",
        first.confidence_avg,
        second.confidence_avg
    );

    let stored = harness
        .aircraft
        .find_by_registration("N1ZZ")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.aircraft.manufacturer_serial_number.as_deref(),
        Some("A")
    );
}

#[tokio::test]
async fn msn_change_is_rejected_and_the_stored_serial_kept() {
    let test_db = TestDatabase::new().await.expect("test database");
    let harness = build_harness(&test_db.pool(), &["N1ZZ"]).await;
    harness.extractor.set_details("N1ZZ", boeing_details("A"));

    let first = harness
        .workflow
        .run_full_update("ZZ", FleetUpdateOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.aircraft_added, 1);

    // A source now reports a different serial number
    harness.extractor.set_details("N1ZZ", boeing_details("C"));
    let second = harness
        .workflow
        .run_full_update("ZZ", FleetUpdateOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    // Validation issues are data, not workflow errors
    assert_eq!(second.errors, 0);
    assert_eq!(second.aircraft_updated, 1);
    let entry = &second.details.processing[0];
    assert!(!entry.is_valid);
    assert!(entry.confidence < first.details.processing[0].confidence);

    let stored = harness
        .aircraft
        .find_by_registration("N1ZZ")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.aircraft.manufacturer_serial_number.as_deref(),
        Some("A")
    );
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let test_db = TestDatabase::new().await.expect("test database");
    let harness = build_harness(&test_db.pool(), &["N1ZZ", "N2ZZ"]).await;
    harness.extractor.set_details("N1ZZ", boeing_details("A"));
    harness.extractor.set_details("N2ZZ", boeing_details("B"));

    let result = harness
        .workflow
        .run_full_update(
            "ZZ",
            FleetUpdateOptions {
                dry_run: true,
                ..FleetUpdateOptions::default()
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.aircraft_found, 2);
    assert_eq!(result.aircraft_added, 0);
    assert_eq!(result.aircraft_updated, 0);
    assert_eq!(result.aircraft_skipped, 2);

    let airline = harness.airlines.get_by_code("ZZ").await.unwrap();
    assert!(airline.last_scraped_at.is_none());
    assert!(
        harness
            .aircraft
            .find_by_registration("N1ZZ")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn empty_discovery_is_a_zeroed_result_not_an_error() {
    let test_db = TestDatabase::new().await.expect("test database");
    let harness = build_harness(&test_db.pool(), &[]).await;

    let result = harness
        .workflow
        .run_full_update("ZZ", FleetUpdateOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.aircraft_found, 0);
    assert_eq!(result.aircraft_added, 0);
    assert_eq!(result.errors, 0);
}

#[tokio::test]
async fn unknown_airline_fails_and_is_not_retryable() {
    let test_db = TestDatabase::new().await.expect("test database");
    let harness = build_harness(&test_db.pool(), &[]).await;

    let err = harness
        .workflow
        .run_full_update("XX", FleetUpdateOptions::default(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Airline not found"));
    assert!(!should_retry(&err));
}
