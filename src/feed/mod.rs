//! GTFS-Realtime feed handling.
//!
//! Fetches a protobuf `FeedMessage` from an endpoint, flattens its entities
//! into typed rows (one row per entity), and converts the result to and from
//! Parquet for persistence.

pub mod client;
pub mod tabular;

pub use client::{FeedClient, FeedError};
pub use tabular::ColumnarError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three entity categories of a GTFS-RT `FeedMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    VehiclePosition,
    TripUpdate,
    Alert,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [
        ServiceType::VehiclePosition,
        ServiceType::TripUpdate,
        ServiceType::Alert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::VehiclePosition => "VehiclePosition",
            ServiceType::TripUpdate => "TripUpdate",
            ServiceType::Alert => "Alert",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vehicle position entity, flattened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehiclePositionRow {
    pub entity_id: String,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
    pub current_stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub current_status: Option<i32>,
    pub congestion_level: Option<i32>,
    pub occupancy_status: Option<i32>,
    /// Feed-reported POSIX timestamp of the observation.
    pub vehicle_timestamp: Option<u64>,
}

/// One trip update entity, flattened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripUpdateRow {
    pub entity_id: String,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub start_time: Option<String>,
    pub start_date: Option<String>,
    pub schedule_relationship: Option<i32>,
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub delay_seconds: Option<i32>,
    /// Number of stop time updates carried by the entity.
    pub stop_time_updates: i64,
    pub trip_timestamp: Option<u64>,
}

/// One alert entity, flattened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertRow {
    pub entity_id: String,
    pub cause: Option<i32>,
    pub effect: Option<i32>,
    pub severity_level: Option<i32>,
    pub header_text: Option<String>,
    pub description_text: Option<String>,
    pub url: Option<String>,
    pub active_period_start: Option<u64>,
    pub active_period_end: Option<u64>,
    /// Comma-joined route ids from the informed entity selectors.
    pub informed_routes: Option<String>,
    /// Comma-joined stop ids from the informed entity selectors.
    pub informed_stops: Option<String>,
}

/// The tabular result of decoding one fetch.
///
/// Entity order follows the source feed. `fetch_time` is shared by every row
/// persisted from this snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub fetch_time: DateTime<Utc>,
    pub vehicle_positions: Vec<VehiclePositionRow>,
    pub trip_updates: Vec<TripUpdateRow>,
    pub alerts: Vec<AlertRow>,
}

impl Snapshot {
    pub fn empty(fetch_time: DateTime<Utc>) -> Self {
        Self {
            fetch_time,
            vehicle_positions: Vec::new(),
            trip_updates: Vec::new(),
            alerts: Vec::new(),
        }
    }

    /// Row count for one service type.
    pub fn len(&self, service_type: ServiceType) -> usize {
        match service_type {
            ServiceType::VehiclePosition => self.vehicle_positions.len(),
            ServiceType::TripUpdate => self.trip_updates.len(),
            ServiceType::Alert => self.alerts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vehicle_positions.is_empty() && self.trip_updates.is_empty() && self.alerts.is_empty()
    }

    /// Copy of this snapshot reduced to a single service type, so that every
    /// persisted file stays single-service.
    pub fn subset(&self, service_type: ServiceType) -> Snapshot {
        let mut out = Snapshot::empty(self.fetch_time);
        match service_type {
            ServiceType::VehiclePosition => {
                out.vehicle_positions = self.vehicle_positions.clone();
            }
            ServiceType::TripUpdate => out.trip_updates = self.trip_updates.clone(),
            ServiceType::Alert => out.alerts = self.alerts.clone(),
        }
        out
    }
}
