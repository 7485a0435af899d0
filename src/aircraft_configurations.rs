use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-cabin seating layout as extracted from a source. All fields optional;
/// sources rarely report every cabin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeatConfiguration {
    pub first: Option<i32>,
    pub business: Option<i32>,
    pub premium_economy: Option<i32>,
    pub economy: Option<i32>,
    pub total: Option<i32>,
}

impl SeatConfiguration {
    /// Number of populated fields, used to pick the richest partial during
    /// merge.
    pub fn populated_fields(&self) -> usize {
        [
            self.first,
            self.business,
            self.premium_economy,
            self.economy,
            self.total,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.populated_fields() == 0
    }

    /// Sum over the cabins that are present, or None when no cabin count is.
    pub fn cabin_sum(&self) -> Option<i32> {
        let cabins = [
            self.first,
            self.business,
            self.premium_economy,
            self.economy,
        ];
        if cabins.iter().all(Option::is_none) {
            return None;
        }
        Some(cabins.iter().flatten().sum())
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::aircraft_configurations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AircraftConfigurationModel {
    pub id: uuid::Uuid,
    pub aircraft_id: uuid::Uuid,
    pub class_first: Option<i32>,
    pub class_business: Option<i32>,
    pub class_premium_economy: Option<i32>,
    pub class_economy: Option<i32>,
    pub total_seats: Option<i32>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AircraftConfigurationModel {
    pub fn to_seat_configuration(&self) -> SeatConfiguration {
        SeatConfiguration {
            first: self.class_first,
            business: self.class_business,
            premium_economy: self.class_premium_economy,
            economy: self.class_economy,
            total: self.total_seats,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::aircraft_configurations)]
pub struct NewAircraftConfiguration {
    pub aircraft_id: uuid::Uuid,
    pub class_first: Option<i32>,
    pub class_business: Option<i32>,
    pub class_premium_economy: Option<i32>,
    pub class_economy: Option<i32>,
    pub total_seats: Option<i32>,
    pub is_current: bool,
}

impl NewAircraftConfiguration {
    pub fn current(aircraft_id: uuid::Uuid, seats: &SeatConfiguration) -> Self {
        Self {
            aircraft_id,
            class_first: seats.first,
            class_business: seats.business,
            class_premium_economy: seats.premium_economy,
            class_economy: seats.economy,
            total_seats: seats.total,
            is_current: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cabin_sum_ignores_total() {
        let seats = SeatConfiguration {
            first: Some(8),
            business: Some(40),
            premium_economy: None,
            economy: Some(120),
            total: Some(999),
        };
        assert_eq!(seats.cabin_sum(), Some(168));
    }

    #[test]
    fn cabin_sum_is_none_without_cabins() {
        let seats = SeatConfiguration {
            total: Some(189),
            ..SeatConfiguration::default()
        };
        assert_eq!(seats.cabin_sum(), None);
        assert_eq!(seats.populated_fields(), 1);
    }

    #[test]
    fn empty_configuration_is_empty() {
        assert!(SeatConfiguration::default().is_empty());
    }
}
