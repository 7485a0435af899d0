use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aircraft::{AircraftMetadata, NewAircraft};
use crate::aircraft_repo::{AircraftPatch, AircraftRepository, AircraftWithDetails};
use crate::aircraft_types_repo::AircraftTypesRepository;
use crate::airlines_repo::AirlinesRepository;
use crate::details_agent::{AircraftDetails, DetailsAgent, merge_details, seed_from_existing};
use crate::discovery_agent::{DiscoveryAgent, DiscoveryRequest, DiscoveryResult};
use crate::validation_agent::{ValidationAgent, ValidationResult, apply_recommended_values};

#[derive(Debug, Clone, Copy, Default)]
pub struct FleetUpdateOptions {
    pub force_full_scrape: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowConfig {
    /// Per-batch fan-out width during the details and validation phases.
    pub concurrency: usize,
    /// Sleep between batches.
    pub rate_limit: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistOutcome {
    Added,
    Updated,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedAircraft {
    pub registration: String,
    pub outcome: PersistOutcome,
    pub confidence: f64,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetUpdateDetails {
    pub discovery: DiscoveryResult,
    pub processing: Vec<ProcessedAircraft>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetUpdateResult {
    pub aircraft_found: usize,
    pub aircraft_added: usize,
    pub aircraft_updated: usize,
    pub aircraft_skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
    pub confidence_avg: f64,
    pub details: FleetUpdateDetails,
}

/// The stored record expressed in the details-phase vocabulary, for
/// cross-reference validation.
fn details_from_existing(existing: &AircraftWithDetails) -> AircraftDetails {
    let seed = seed_from_existing(existing);
    let mut details = merge_details(&existing.aircraft.registration, Some(&seed), &[]);
    if let Some(metadata) = existing.aircraft.engine_metadata() {
        details.confidence_score = metadata.confidence_score;
        details.data_sources = metadata.data_sources;
        details.extracted_at = metadata.extracted_at;
    }
    details
}

struct ValidatedAircraft {
    candidate: AircraftDetails,
    validation: ValidationResult,
    existing: Option<AircraftWithDetails>,
}

/// Four-phase fleet update: discovery, batched detail extraction, batched
/// validation, sequential persistence.
#[derive(Clone)]
pub struct FleetUpdateWorkflow {
    airlines: AirlinesRepository,
    aircraft: AircraftRepository,
    types: AircraftTypesRepository,
    discovery: DiscoveryAgent,
    details: DetailsAgent,
    validation: ValidationAgent,
    config: WorkflowConfig,
}

impl FleetUpdateWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        airlines: AirlinesRepository,
        aircraft: AircraftRepository,
        types: AircraftTypesRepository,
        discovery: DiscoveryAgent,
        details: DetailsAgent,
        validation: ValidationAgent,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            airlines,
            aircraft,
            types,
            discovery,
            details,
            validation,
            config,
        }
    }

    /// Run a full update for one airline. Cancellation is honoured at batch
    /// boundaries; per-aircraft work already committed stays committed.
    #[tracing::instrument(skip(self, opts, cancel), fields(%airline_code))]
    pub async fn run_full_update(
        &self,
        airline_code: &str,
        opts: FleetUpdateOptions,
        cancel: CancellationToken,
    ) -> Result<FleetUpdateResult> {
        let started = Instant::now();
        let airline = self.airlines.get_by_code(airline_code).await?;
        let mut errors: Vec<String> = Vec::new();

        // Phase 1: discovery
        let request = DiscoveryRequest {
            sources_override: None,
            force_full_scrape: opts.force_full_scrape,
        };
        let discovery = self.discovery.discover(airline_code, &request).await?;
        let registrations = discovery.registrations.clone();
        info!(
            "Discovery found {} registrations for {} via {:?}",
            registrations.len(),
            airline.iata_code,
            discovery.method
        );

        if registrations.is_empty() {
            return Ok(FleetUpdateResult {
                aircraft_found: 0,
                aircraft_added: 0,
                aircraft_updated: 0,
                aircraft_skipped: 0,
                errors: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                confidence_avg: 0.0,
                details: FleetUpdateDetails {
                    discovery,
                    processing: Vec::new(),
                    errors,
                },
            });
        }

        // Phase 2: details fan-out
        let batch_width = self.config.concurrency.max(1);
        let mut detailed: Vec<AircraftDetails> = Vec::with_capacity(registrations.len());
        for (index, batch) in registrations.chunks(batch_width).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.rate_limit).await;
            }
            if cancel.is_cancelled() {
                warn!("Update for {} cancelled during details phase", airline_code);
                break;
            }
            let futures = batch
                .iter()
                .map(|registration| {
                    self.details
                        .get_details(registration, Some(&airline.iata_code))
                })
                .collect::<Vec<_>>();
            for (registration, outcome) in batch.iter().zip(join_all(futures).await) {
                match outcome {
                    Ok(details) => detailed.push(details),
                    Err(e) => {
                        warn!("Details failed for {}: {:#}", registration, e);
                        errors.push(format!("details {}: {:#}", registration, e));
                    }
                }
            }
        }

        // Phase 3: validation fan-out, overlaying recommended values
        let mut validated: Vec<ValidatedAircraft> = Vec::with_capacity(detailed.len());
        for (index, batch) in detailed.chunks(batch_width).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.rate_limit).await;
            }
            if cancel.is_cancelled() {
                warn!("Update for {} cancelled during validation phase", airline_code);
                break;
            }
            let futures = batch
                .iter()
                .map(|candidate| self.validate_one(candidate))
                .collect::<Vec<_>>();
            for (candidate, outcome) in batch.iter().zip(join_all(futures).await) {
                match outcome {
                    Ok(validated_aircraft) => validated.push(validated_aircraft),
                    Err(e) => {
                        warn!("Validation failed for {}: {:#}", candidate.registration, e);
                        errors.push(format!("validation {}: {:#}", candidate.registration, e));
                    }
                }
            }
        }

        // Phase 4: sequential persistence, one transaction per aircraft
        let mut processing = Vec::with_capacity(validated.len());
        let mut added = 0usize;
        let mut updated = 0usize;
        let mut skipped = 0usize;
        let mut confidence_sum = 0.0;

        for entry in &validated {
            confidence_sum += entry.candidate.confidence_score;

            if opts.dry_run {
                skipped += 1;
                processing.push(ProcessedAircraft {
                    registration: entry.candidate.registration.clone(),
                    outcome: PersistOutcome::Skipped,
                    confidence: entry.candidate.confidence_score,
                    is_valid: entry.validation.is_valid,
                });
                continue;
            }

            if entry.candidate.registration.is_empty() {
                skipped += 1;
                continue;
            }

            if !entry.validation.is_valid {
                // Validation errors do not block persistence; the record is
                // written with its (reduced) confidence.
                debug!(
                    "Persisting {} despite validation errors: {}",
                    entry.candidate.registration, entry.validation.summary
                );
            }

            match self.persist_one(airline.id, entry).await {
                Ok(outcome) => {
                    match outcome {
                        PersistOutcome::Added => added += 1,
                        PersistOutcome::Updated => updated += 1,
                        PersistOutcome::Skipped => skipped += 1,
                    }
                    processing.push(ProcessedAircraft {
                        registration: entry.candidate.registration.clone(),
                        outcome,
                        confidence: entry.candidate.confidence_score,
                        is_valid: entry.validation.is_valid,
                    });
                }
                Err(e) => {
                    warn!("Persist failed for {}: {:#}", entry.candidate.registration, e);
                    errors.push(format!("persist {}: {:#}", entry.candidate.registration, e));
                }
            }
        }

        if !opts.dry_run {
            self.airlines.touch_scraped_at(airline_code).await?;
        }

        let confidence_avg = if validated.is_empty() {
            0.0
        } else {
            confidence_sum / validated.len() as f64
        };

        metrics::counter!("scraper.updates_completed").increment(1);
        metrics::histogram!("scraper.update_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(FleetUpdateResult {
            aircraft_found: registrations.len(),
            aircraft_added: added,
            aircraft_updated: updated,
            aircraft_skipped: skipped,
            errors: errors.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            confidence_avg,
            details: FleetUpdateDetails {
                discovery,
                processing,
                errors,
            },
        })
    }

    async fn validate_one(&self, candidate: &AircraftDetails) -> Result<ValidatedAircraft> {
        let existing = self
            .aircraft
            .find_by_registration(&candidate.registration)
            .await?;
        let existing_details = existing.as_ref().map(details_from_existing);

        let validation = self
            .validation
            .validate(candidate, existing_details.as_ref())
            .await?;

        let mut effective = candidate.clone();
        apply_recommended_values(&mut effective, &validation.recommended_values);
        effective.confidence_score = validation.confidence_score;

        Ok(ValidatedAircraft {
            candidate: effective,
            validation,
            existing,
        })
    }

    async fn persist_one(
        &self,
        airline_id: uuid::Uuid,
        entry: &ValidatedAircraft,
    ) -> Result<PersistOutcome> {
        let candidate = &entry.candidate;

        let aircraft_type_id = match &candidate.aircraft_type {
            Some(code) => self
                .types
                .find_by_code(code)
                .await?
                .map(|type_spec| type_spec.id),
            None => None,
        };

        let status = candidate.parsed_status().unwrap_or_default();
        let metadata = AircraftMetadata::new(
            candidate.confidence_score,
            candidate.data_sources.clone(),
            candidate.extracted_at,
        )
        .to_value();

        let aircraft_id = match &entry.existing {
            Some(existing) => {
                let patch = AircraftPatch {
                    current_airline_id: Some(airline_id),
                    aircraft_type_id,
                    manufacturer_serial_number: candidate.msn.clone(),
                    delivery_date: candidate.delivery_date,
                    age_years: candidate.age_years,
                    status,
                    last_seen_date: candidate.last_flight_date,
                    metadata: Some(metadata),
                };
                let id = self
                    .aircraft
                    .update_aircraft(&candidate.registration, patch)
                    .await
                    .with_context(|| format!("updating {}", candidate.registration))?;
                debug!("Updated aircraft {} ({})", candidate.registration, existing.aircraft.id);
                id
            }
            None => {
                let new_aircraft = NewAircraft {
                    registration: candidate.registration.clone(),
                    current_airline_id: Some(airline_id),
                    aircraft_type_id,
                    manufacturer_serial_number: candidate.msn.clone(),
                    delivery_date: candidate.delivery_date,
                    age_years: candidate.age_years,
                    status,
                    last_seen_date: candidate.last_flight_date,
                    metadata: Some(metadata),
                    last_scraped_at: None,
                };
                self.aircraft
                    .insert_aircraft(new_aircraft)
                    .await
                    .with_context(|| format!("inserting {}", candidate.registration))?
            }
        };

        if let Some(seats) = &candidate.seat_configuration {
            if !seats.is_empty() {
                self.aircraft
                    .replace_current_configuration(aircraft_id, seats)
                    .await?;
            }
        }

        Ok(match entry.existing {
            Some(_) => PersistOutcome::Updated,
            None => PersistOutcome::Added,
        })
    }
}
