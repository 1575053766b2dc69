//! Normalized shipment tracking shapes shared by every source.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Unified shipment tracking record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRecord {
    pub code: String,
    pub origin: String,
    pub destination: String,
    pub quantity: u32,
    pub description: String,
    /// Human-readable status label
    pub status: String,
    pub extra_services: Vec<ExtraService>,
    /// Chronological, oldest first
    pub events: Vec<TrackingEvent>,
}

impl ShipmentRecord {
    /// Drop events later than `now`
    pub fn visible_at(mut self, now: DateTime<Utc>) -> Self {
        self.events.retain(|event| event.time.with_timezone(&Utc) <= now);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraService {
    pub id: u32,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub time: DateTime<FixedOffset>,
    pub location: String,
    pub status: String,
    pub notes: String,
}
