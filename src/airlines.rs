use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where a configured scrape source URL came from, in decreasing order of
/// trust. `Official` is the airline's own site, `Database` a public fleet
/// database, `Tracker` a flight-tracking site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Official,
    Database,
    Tracker,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Official => write!(f, "official"),
            SourceType::Database => write!(f, "database"),
            SourceType::Tracker => write!(f, "tracker"),
        }
    }
}

/// One entry of the `scrape_source_urls` JSONB column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSourceUrl {
    pub url: String,
    pub source_type: SourceType,
    pub priority: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::airlines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AirlineModel {
    pub id: uuid::Uuid,
    pub iata_code: String,
    pub icao_code: String,
    pub name: String,
    pub country: Option<String>,
    pub hub_airport: Option<String>,
    pub website_url: Option<String>,
    pub scrape_enabled: bool,
    pub scrape_source_urls: Option<serde_json::Value>,
    pub scrape_schedule_cron: Option<String>,
    pub fleet_size_estimate: Option<i32>,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AirlineModel {
    /// Parse the stored source URL list, dropping malformed entries.
    pub fn source_urls(&self) -> Vec<ScrapeSourceUrl> {
        let Some(value) = &self.scrape_source_urls else {
            return Vec::new();
        };
        match serde_json::from_value::<Vec<ScrapeSourceUrl>>(value.clone()) {
            Ok(urls) => urls,
            Err(e) => {
                warn!(
                    "Airline {} has malformed scrape_source_urls, ignoring: {}",
                    self.iata_code, e
                );
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::airlines)]
pub struct NewAirline {
    pub iata_code: String,
    pub icao_code: String,
    pub name: String,
    pub country: Option<String>,
    pub hub_airport: Option<String>,
    pub website_url: Option<String>,
    pub scrape_enabled: bool,
    pub scrape_source_urls: Option<serde_json::Value>,
    pub fleet_size_estimate: Option<i32>,
}
