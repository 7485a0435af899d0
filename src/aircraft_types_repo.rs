use std::time::Duration;

use anyhow::{Context, Result};
use moka::future::Cache;

use diesel::prelude::*;

use crate::aircraft_types::{AircraftTypeModel, NewAircraftType};
use crate::db::functions::upper_nullable;
use crate::db::{PgPool, PgPooledConnection};
use crate::error::ScrapeError;
use crate::schema::aircraft_types;

/// Type specs are read-mostly, so lookups go through a small per-process
/// cache keyed on the upper-cased code.
#[derive(Clone)]
pub struct AircraftTypesRepository {
    pool: PgPool,
    by_code: Cache<String, Option<AircraftTypeModel>>,
}

impl AircraftTypesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            by_code: Cache::builder()
                .max_capacity(500)
                .time_to_live(Duration::from_secs(600))
                .build(),
        }
    }

    fn get_connection(&self) -> Result<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get database connection: {}", e))
    }

    /// Look up a type by IATA or ICAO type code, case-insensitively.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<AircraftTypeModel>> {
        let needle = code.trim().to_uppercase();
        if needle.is_empty() {
            return Ok(None);
        }
        if let Some(cached) = self.by_code.get(&needle).await {
            return Ok(cached);
        }

        let found = {
            let mut conn = self.get_connection()?;
            aircraft_types::table
                .filter(
                    upper_nullable(aircraft_types::iata_code)
                        .eq(needle.clone())
                        .or(upper_nullable(aircraft_types::icao_code).eq(needle.clone())),
                )
                .select(AircraftTypeModel::as_select())
                .first(&mut conn)
                .optional()
                .with_context(|| format!("Failed to query aircraft type {}", code))?
        };

        self.by_code.insert(needle, found.clone()).await;
        Ok(found)
    }

    /// Like [`find_by_code`](Self::find_by_code) but absence is an
    /// [`ScrapeError::UnknownAircraftType`]. The caller decides whether that
    /// skips the record or merely downgrades it.
    pub async fn get_by_code(&self, code: &str) -> Result<AircraftTypeModel> {
        self.find_by_code(code)
            .await?
            .ok_or_else(|| ScrapeError::UnknownAircraftType(code.to_string()).into())
    }

    pub async fn find_by_id(&self, id: uuid::Uuid) -> Result<Option<AircraftTypeModel>> {
        let mut conn = self.get_connection()?;
        let found = aircraft_types::table
            .find(id)
            .select(AircraftTypeModel::as_select())
            .first(&mut conn)
            .optional()
            .context("Failed to query aircraft type by id")?;
        Ok(found)
    }

    pub async fn insert(&self, aircraft_type: NewAircraftType) -> Result<AircraftTypeModel> {
        let mut conn = self.get_connection()?;
        let inserted = diesel::insert_into(aircraft_types::table)
            .values(&aircraft_type)
            .returning(AircraftTypeModel::as_returning())
            .get_result(&mut conn)
            .context("Failed to insert aircraft type")?;
        Ok(inserted)
    }
}
