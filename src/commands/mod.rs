use std::sync::Arc;

use anyhow::Result;

use crate::aircraft_repo::AircraftRepository;
use crate::aircraft_types_repo::AircraftTypesRepository;
use crate::airlines_repo::AirlinesRepository;
use crate::db::PgPool;
use crate::details_agent::DetailsAgent;
use crate::discovery_agent::DiscoveryAgent;
use crate::extractor::HttpExtractor;
use crate::fleet_update::{FleetUpdateWorkflow, WorkflowConfig};
use crate::page_loader::HttpPageLoader;
use crate::scrape_config::ScraperConfig;
use crate::validation_agent::ValidationAgent;

pub mod enqueue;
pub mod jobs;
pub mod run;
pub mod scrape;
pub mod stats;

pub use enqueue::handle_enqueue;
pub use jobs::handle_jobs;
pub use run::handle_run;
pub use scrape::handle_scrape;
pub use stats::handle_stats;

/// Wire the repositories and agents into a workflow with the production
/// page loader and extractor.
pub fn build_workflow(pool: &PgPool, config: &ScraperConfig) -> Result<FleetUpdateWorkflow> {
    let airlines = AirlinesRepository::new(pool.clone());
    let aircraft = AircraftRepository::new(pool.clone());
    let types = AircraftTypesRepository::new(pool.clone());

    let page_loader = Arc::new(HttpPageLoader::new(config.source_timeout, config.rate_limit)?);
    let extractor = Arc::new(HttpExtractor::from_env()?);

    let discovery = DiscoveryAgent::new(airlines.clone(), page_loader.clone(), extractor.clone());
    let details = DetailsAgent::new(aircraft.clone(), page_loader, extractor.clone());
    let validation = ValidationAgent::new(types.clone(), extractor);

    Ok(FleetUpdateWorkflow::new(
        airlines,
        aircraft,
        types,
        discovery,
        details,
        validation,
        WorkflowConfig {
            concurrency: config.workflow_concurrency,
            rate_limit: config.rate_limit,
        },
    ))
}
