use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;

use crate::airlines::{AirlineModel, NewAirline};
use crate::db::functions::upper;
use crate::db::{PgPool, PgPooledConnection};
use crate::error::ScrapeError;
use crate::schema::airlines;

#[derive(Clone)]
pub struct AirlinesRepository {
    pool: PgPool,
}

impl AirlinesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn get_connection(&self) -> Result<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get database connection: {}", e))
    }

    /// Look up an airline by IATA or ICAO code, case-insensitively.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<AirlineModel>> {
        let needle = code.trim().to_uppercase();
        let mut conn = self.get_connection()?;
        let airline = airlines::table
            .filter(
                upper(airlines::iata_code)
                    .eq(needle.clone())
                    .or(upper(airlines::icao_code).eq(needle)),
            )
            .select(AirlineModel::as_select())
            .first(&mut conn)
            .optional()
            .with_context(|| format!("Failed to query airline {}", code))?;
        Ok(airline)
    }

    /// Like [`find_by_code`](Self::find_by_code) but absence is an
    /// [`ScrapeError::UnknownAirline`].
    pub async fn get_by_code(&self, code: &str) -> Result<AirlineModel> {
        self.find_by_code(code)
            .await?
            .ok_or_else(|| ScrapeError::UnknownAirline(code.to_string()).into())
    }

    /// Airlines eligible for a scheduled re-scrape: scraping enabled and
    /// never scraped or last scraped longer than `stale_after` ago. Ordered
    /// so that never-scraped airlines come first.
    pub async fn due_for_scrape(
        &self,
        stale_after: Duration,
        limit: i64,
    ) -> Result<Vec<AirlineModel>> {
        let cutoff = Utc::now() - stale_after;
        let mut conn = self.get_connection()?;
        let due = airlines::table
            .filter(airlines::scrape_enabled.eq(true))
            .filter(
                airlines::last_scraped_at
                    .is_null()
                    .or(airlines::last_scraped_at.lt(cutoff)),
            )
            .order((
                airlines::last_scraped_at.asc().nulls_first(),
                airlines::iata_code.asc(),
            ))
            .limit(limit)
            .select(AirlineModel::as_select())
            .load(&mut conn)
            .context("Failed to query airlines due for scrape")?;
        Ok(due)
    }

    /// Record that a full update for the airline just finished.
    pub async fn touch_scraped_at(&self, code: &str) -> Result<()> {
        let needle = code.trim().to_uppercase();
        let mut conn = self.get_connection()?;
        diesel::update(
            airlines::table.filter(
                upper(airlines::iata_code)
                    .eq(needle.clone())
                    .or(upper(airlines::icao_code).eq(needle)),
            ),
        )
        .set((
            airlines::last_scraped_at.eq(Utc::now()),
            airlines::updated_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .with_context(|| format!("Failed to touch last_scraped_at for {}", code))?;
        Ok(())
    }

    pub async fn insert(&self, airline: NewAirline) -> Result<AirlineModel> {
        let mut conn = self.get_connection()?;
        let inserted = diesel::insert_into(airlines::table)
            .values(&airline)
            .returning(AirlineModel::as_returning())
            .get_result(&mut conn)
            .with_context(|| format!("Failed to insert airline {}", airline.iata_code))?;
        Ok(inserted)
    }
}
