use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Reference specification for an airframe type (e.g. 738 / B738). Rows are
/// seeded externally and treated as immutable by the scraping engine.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::aircraft_types)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AircraftTypeModel {
    pub id: uuid::Uuid,
    pub iata_code: Option<String>,
    pub icao_code: Option<String>,
    pub manufacturer: String,
    pub model: String,
    pub typical_seats: Option<i32>,
    pub max_seats: Option<i32>,
    pub range_km: Option<i32>,
    pub engine_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::aircraft_types)]
pub struct NewAircraftType {
    pub iata_code: Option<String>,
    pub icao_code: Option<String>,
    pub manufacturer: String,
    pub model: String,
    pub typical_seats: Option<i32>,
    pub max_seats: Option<i32>,
    pub range_km: Option<i32>,
    pub engine_type: Option<String>,
}
