use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;

use crate::aircraft::{AircraftModel, AircraftStatus, NewAircraft, normalize_registration};
use crate::aircraft_configurations::{
    AircraftConfigurationModel, NewAircraftConfiguration, SeatConfiguration,
};
use crate::aircraft_types::AircraftTypeModel;
use crate::db::functions::upper;
use crate::db::{PgPool, PgPooledConnection};
use crate::schema::{aircraft, aircraft_configurations, aircraft_types};

/// An aircraft row joined with its type spec and current seating layout.
#[derive(Debug, Clone)]
pub struct AircraftWithDetails {
    pub aircraft: AircraftModel,
    pub aircraft_type: Option<AircraftTypeModel>,
    pub current_configuration: Option<AircraftConfigurationModel>,
}

/// Field-level update for an existing aircraft row. `None` leaves the stored
/// value in place; `status` always overwrites. The serial number is sticky:
/// once a row has one, later patches cannot change it.
#[derive(Debug, Clone, Default)]
pub struct AircraftPatch {
    pub current_airline_id: Option<uuid::Uuid>,
    pub aircraft_type_id: Option<uuid::Uuid>,
    pub manufacturer_serial_number: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub age_years: Option<f64>,
    pub status: AircraftStatus,
    pub last_seen_date: Option<NaiveDate>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct AircraftRepository {
    pool: PgPool,
}

impl AircraftRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn get_connection(&self) -> Result<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get database connection: {}", e))
    }

    /// Look up an aircraft by registration, case-insensitively, joined with
    /// its type spec and current configuration.
    pub async fn find_by_registration(
        &self,
        registration: &str,
    ) -> Result<Option<AircraftWithDetails>> {
        let needle = normalize_registration(registration);
        let mut conn = self.get_connection()?;

        let row: Option<(AircraftModel, Option<AircraftTypeModel>)> = aircraft::table
            .left_join(aircraft_types::table)
            .filter(upper(aircraft::registration).eq(&needle))
            .select((
                AircraftModel::as_select(),
                Option::<AircraftTypeModel>::as_select(),
            ))
            .first(&mut conn)
            .optional()
            .with_context(|| format!("Failed to query aircraft {}", needle))?;

        let Some((aircraft_row, aircraft_type)) = row else {
            return Ok(None);
        };

        let current_configuration = aircraft_configurations::table
            .filter(aircraft_configurations::aircraft_id.eq(aircraft_row.id))
            .filter(aircraft_configurations::is_current.eq(true))
            .select(AircraftConfigurationModel::as_select())
            .first(&mut conn)
            .optional()
            .context("Failed to query current configuration")?;

        Ok(Some(AircraftWithDetails {
            aircraft: aircraft_row,
            aircraft_type,
            current_configuration,
        }))
    }

    /// Insert a new aircraft. Fails atomically if the registration already
    /// exists (unique index on UPPER(registration)).
    pub async fn insert_aircraft(&self, mut new_aircraft: NewAircraft) -> Result<uuid::Uuid> {
        new_aircraft.registration = normalize_registration(&new_aircraft.registration);
        new_aircraft.last_scraped_at = Some(Utc::now());
        let mut conn = self.get_connection()?;
        let id = diesel::insert_into(aircraft::table)
            .values(&new_aircraft)
            .returning(aircraft::id)
            .get_result(&mut conn)
            .with_context(|| format!("Failed to insert aircraft {}", new_aircraft.registration))?;
        Ok(id)
    }

    /// Patch an existing aircraft row. Runs as a read-modify-write inside a
    /// transaction with the row locked, so concurrent updates to the same
    /// registration serialise.
    pub async fn update_aircraft(
        &self,
        registration: &str,
        patch: AircraftPatch,
    ) -> Result<uuid::Uuid> {
        let needle = normalize_registration(registration);
        let mut conn = self.get_connection()?;

        let id = conn
            .transaction::<uuid::Uuid, diesel::result::Error, _>(|conn| {
                let existing: AircraftModel = aircraft::table
                    .filter(upper(aircraft::registration).eq(&needle))
                    .select(AircraftModel::as_select())
                    .for_update()
                    .first(conn)?;

                // Serial numbers never change once set; delivery_date keeps
                // its stored value when the patch has none.
                let manufacturer_serial_number = existing
                    .manufacturer_serial_number
                    .clone()
                    .or(patch.manufacturer_serial_number);
                let delivery_date = patch.delivery_date.or(existing.delivery_date);

                diesel::update(aircraft::table.find(existing.id))
                    .set((
                        aircraft::current_airline_id
                            .eq(patch.current_airline_id.or(existing.current_airline_id)),
                        aircraft::aircraft_type_id
                            .eq(patch.aircraft_type_id.or(existing.aircraft_type_id)),
                        aircraft::manufacturer_serial_number.eq(manufacturer_serial_number),
                        aircraft::delivery_date.eq(delivery_date),
                        aircraft::age_years.eq(patch.age_years.or(existing.age_years)),
                        aircraft::status.eq(patch.status),
                        aircraft::last_seen_date
                            .eq(patch.last_seen_date.or(existing.last_seen_date)),
                        aircraft::metadata.eq(patch.metadata.or(existing.metadata)),
                        aircraft::last_scraped_at.eq(Utc::now()),
                        aircraft::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)?;

                Ok(existing.id)
            })
            .with_context(|| format!("Failed to update aircraft {}", needle))?;

        Ok(id)
    }

    /// Replace the current seating layout: clears prior `is_current` flags
    /// and inserts the new row atomically.
    pub async fn replace_current_configuration(
        &self,
        aircraft_id: uuid::Uuid,
        seats: &SeatConfiguration,
    ) -> Result<uuid::Uuid> {
        let mut conn = self.get_connection()?;
        let new_row = NewAircraftConfiguration::current(aircraft_id, seats);

        let id = conn
            .transaction::<uuid::Uuid, diesel::result::Error, _>(|conn| {
                diesel::update(
                    aircraft_configurations::table
                        .filter(aircraft_configurations::aircraft_id.eq(aircraft_id))
                        .filter(aircraft_configurations::is_current.eq(true)),
                )
                .set((
                    aircraft_configurations::is_current.eq(false),
                    aircraft_configurations::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)?;

                diesel::insert_into(aircraft_configurations::table)
                    .values(&new_row)
                    .returning(aircraft_configurations::id)
                    .get_result(conn)
            })
            .context("Failed to replace current configuration")?;

        Ok(id)
    }
}
