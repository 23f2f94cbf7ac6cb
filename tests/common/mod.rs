//! Shared test support: an embedded GTFS-RT feed server and storage seeding
//! helpers.

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::{NaiveDateTime, TimeZone, Utc};
use prost::Message;

use gtfs_rt_aggregator::feed::{tabular, ServiceType, Snapshot, VehiclePositionRow};
use gtfs_rt_aggregator::layout;
use gtfs_rt_aggregator::storage::Storage;

/// Test double serving prost-encoded feeds on `/vehicle_positions`,
/// `/trip_updates`, and `/alerts`.
pub struct MockFeedServer {
    pub port: u16,
}

impl MockFeedServer {
    /// Bind to `MOCKUP_SERVER_PORT` when set, otherwise an ephemeral port.
    pub async fn start() -> Self {
        let router = Router::new()
            .route("/vehicle_positions", get(serve_vehicle_positions))
            .route("/trip_updates", get(serve_trip_updates))
            .route("/alerts", get(serve_alerts))
            .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") });

        let requested: u16 = std::env::var("MOCKUP_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);

        let listener = match tokio::net::TcpListener::bind(("127.0.0.1", requested)).await {
            Ok(listener) => listener,
            // Requested port taken (parallel test binaries); fall back
            Err(_) => tokio::net::TcpListener::bind(("127.0.0.1", 0))
                .await
                .expect("binding an ephemeral port"),
        };
        let port = listener.local_addr().expect("listener has an address").port();

        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { port }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

fn protobuf_response(feed: gtfs_realtime::FeedMessage) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/x-protobuf")],
        feed.encode_to_vec(),
    )
}

async fn serve_vehicle_positions() -> impl IntoResponse {
    protobuf_response(sample_vehicle_positions_feed())
}

async fn serve_trip_updates() -> impl IntoResponse {
    protobuf_response(sample_trip_updates_feed())
}

async fn serve_alerts() -> impl IntoResponse {
    protobuf_response(sample_alerts_feed())
}

pub fn feed_header() -> gtfs_realtime::FeedHeader {
    gtfs_realtime::FeedHeader {
        gtfs_realtime_version: "2.0".to_string(),
        incrementality: Some(0),
        timestamp: Some(1_672_574_400),
        feed_version: None,
    }
}

fn empty_entity(id: &str) -> gtfs_realtime::FeedEntity {
    gtfs_realtime::FeedEntity {
        id: id.to_string(),
        is_deleted: None,
        trip_update: None,
        vehicle: None,
        alert: None,
        shape: None,
        stop: None,
        trip_modifications: None,
    }
}

pub fn sample_vehicle_positions_feed() -> gtfs_realtime::FeedMessage {
    let entity = |id: &str, vehicle_id: &str, lat: f32, lon: f32| {
        let mut entity = empty_entity(id);
        entity.vehicle = Some(gtfs_realtime::VehiclePosition {
            trip: Some(gtfs_realtime::TripDescriptor {
                trip_id: Some(format!("trip_{id}")),
                route_id: Some("route_1".to_string()),
                direction_id: None,
                start_time: None,
                start_date: None,
                schedule_relationship: None,
                modified_trip: None,
            }),
            vehicle: Some(gtfs_realtime::VehicleDescriptor {
                id: Some(vehicle_id.to_string()),
                label: None,
                license_plate: None,
                wheelchair_accessible: None,
            }),
            position: Some(gtfs_realtime::Position {
                latitude: lat,
                longitude: lon,
                bearing: Some(45.0),
                odometer: None,
                speed: Some(6.0),
            }),
            current_stop_sequence: Some(1),
            stop_id: Some("stop_A".to_string()),
            current_status: Some(2),
            timestamp: Some(1_672_574_401),
            congestion_level: None,
            occupancy_status: None,
            occupancy_percentage: None,
            multi_carriage_details: vec![],
        });
        entity
    };

    gtfs_realtime::FeedMessage {
        header: feed_header(),
        entity: vec![
            entity("v1", "tram-01", 48.3705, 10.8978),
            entity("v2", "tram-02", 48.3668, 10.8945),
        ],
    }
}

pub fn sample_trip_updates_feed() -> gtfs_realtime::FeedMessage {
    let entity = |id: &str, trip_id: &str, delay: i32| {
        let mut entity = empty_entity(id);
        entity.trip_update = Some(gtfs_realtime::TripUpdate {
            trip: gtfs_realtime::TripDescriptor {
                trip_id: Some(trip_id.to_string()),
                route_id: Some("route_1".to_string()),
                direction_id: Some(0),
                start_time: None,
                start_date: Some("20230101".to_string()),
                schedule_relationship: None,
                modified_trip: None,
            },
            vehicle: None,
            stop_time_update: vec![gtfs_realtime::trip_update::StopTimeUpdate {
                stop_sequence: Some(1),
                stop_id: Some("stop_A".to_string()),
                arrival: None,
                departure: Some(gtfs_realtime::trip_update::StopTimeEvent {
                    delay: Some(delay),
                    time: None,
                    uncertainty: None,
                    scheduled_time: None,
                }),
                departure_occupancy_status: None,
                schedule_relationship: None,
                stop_time_properties: None,
            }],
            timestamp: Some(1_672_574_401),
            delay: Some(delay),
            trip_properties: None,
        });
        entity
    };

    gtfs_realtime::FeedMessage {
        header: feed_header(),
        entity: vec![entity("t1", "trip_100", 120), entity("t2", "trip_101", 0)],
    }
}

pub fn sample_alerts_feed() -> gtfs_realtime::FeedMessage {
    let mut entity = empty_entity("a1");
    entity.alert = Some(gtfs_realtime::Alert {
        active_period: vec![gtfs_realtime::TimeRange {
            start: Some(1_672_570_000),
            end: Some(1_672_580_000),
        }],
        informed_entity: vec![gtfs_realtime::EntitySelector {
            agency_id: None,
            route_id: Some("route_1".to_string()),
            route_type: None,
            trip: None,
            stop_id: None,
            direction_id: None,
        }],
        cause: Some(1),
        effect: Some(4),
        url: None,
        header_text: Some(gtfs_realtime::TranslatedString {
            translation: vec![gtfs_realtime::translated_string::Translation {
                text: "Track maintenance".to_string(),
                language: Some("en".to_string()),
            }],
        }),
        description_text: None,
        tts_header_text: None,
        tts_description_text: None,
        severity_level: None,
        image: None,
        image_alternative_text: None,
        cause_detail: None,
        effect_detail: None,
    });

    gtfs_realtime::FeedMessage {
        header: feed_header(),
        entity: vec![entity],
    }
}

/// Seed one synthetic individual file with `rows` vehicle position rows whose
/// fetch time equals `local` interpreted as UTC. Returns the written path.
pub async fn seed_individual_file(
    storage: &Storage,
    provider: &str,
    service_type: ServiceType,
    local: NaiveDateTime,
    rows: usize,
) -> String {
    let fetch_time = Utc.from_utc_datetime(&local);
    let mut snapshot = Snapshot::empty(fetch_time);
    for i in 0..rows {
        snapshot.vehicle_positions.push(VehiclePositionRow {
            entity_id: format!("seed_{}_{i}", local.format("%H%M%S")),
            ..Default::default()
        });
    }

    let bytes = tabular::encode(&snapshot, service_type).expect("encoding a seeded snapshot");
    let path = layout::individual_path(provider, service_type, local);
    storage
        .put(&path, &bytes)
        .await
        .expect("seeding storage never fails");
    path
}
