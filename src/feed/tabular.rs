//! Flattening of `FeedMessage` entities into rows and the Parquet codec.

use std::sync::Arc;

use arrow_array::{
    ArrayRef, Float32Array, Int32Array, Int64Array, RecordBatch, StringArray,
    TimestampMicrosecondArray, UInt32Array, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use gtfs_realtime::FeedMessage;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use super::{AlertRow, ServiceType, Snapshot, TripUpdateRow, VehiclePositionRow};

/// Column shared by every persisted file.
pub const FETCH_TIME_COLUMN: &str = "fetch_time";

#[derive(Debug, thiserror::Error)]
pub enum ColumnarError {
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// Flatten a decoded feed into a snapshot, keeping only entities of the
/// requested service types. Source order is preserved.
pub fn flatten(
    feed: &FeedMessage,
    service_types: &[ServiceType],
    fetch_time: DateTime<Utc>,
) -> Snapshot {
    let mut snapshot = Snapshot::empty(fetch_time);

    let wanted = |s: ServiceType| service_types.contains(&s);

    for entity in &feed.entity {
        if let Some(vehicle) = &entity.vehicle {
            if wanted(ServiceType::VehiclePosition) {
                snapshot
                    .vehicle_positions
                    .push(flatten_vehicle(&entity.id, vehicle));
            }
        }
        if let Some(trip_update) = &entity.trip_update {
            if wanted(ServiceType::TripUpdate) {
                snapshot
                    .trip_updates
                    .push(flatten_trip_update(&entity.id, trip_update));
            }
        }
        if let Some(alert) = &entity.alert {
            if wanted(ServiceType::Alert) {
                snapshot.alerts.push(flatten_alert(&entity.id, alert));
            }
        }
    }

    snapshot
}

fn flatten_vehicle(entity_id: &str, vehicle: &gtfs_realtime::VehiclePosition) -> VehiclePositionRow {
    let trip = vehicle.trip.as_ref();
    let descriptor = vehicle.vehicle.as_ref();
    let position = vehicle.position.as_ref();

    VehiclePositionRow {
        entity_id: entity_id.to_string(),
        trip_id: trip.and_then(|t| t.trip_id.clone()),
        route_id: trip.and_then(|t| t.route_id.clone()),
        vehicle_id: descriptor.and_then(|v| v.id.clone()),
        vehicle_label: descriptor.and_then(|v| v.label.clone()),
        latitude: position.map(|p| p.latitude),
        longitude: position.map(|p| p.longitude),
        bearing: position.and_then(|p| p.bearing),
        speed: position.and_then(|p| p.speed),
        current_stop_sequence: vehicle.current_stop_sequence,
        stop_id: vehicle.stop_id.clone(),
        current_status: vehicle.current_status,
        congestion_level: vehicle.congestion_level,
        occupancy_status: vehicle.occupancy_status,
        vehicle_timestamp: vehicle.timestamp,
    }
}

fn flatten_trip_update(entity_id: &str, trip_update: &gtfs_realtime::TripUpdate) -> TripUpdateRow {
    let trip = &trip_update.trip;
    let descriptor = trip_update.vehicle.as_ref();

    TripUpdateRow {
        entity_id: entity_id.to_string(),
        trip_id: trip.trip_id.clone(),
        route_id: trip.route_id.clone(),
        direction_id: trip.direction_id,
        start_time: trip.start_time.clone(),
        start_date: trip.start_date.clone(),
        schedule_relationship: trip.schedule_relationship,
        vehicle_id: descriptor.and_then(|v| v.id.clone()),
        vehicle_label: descriptor.and_then(|v| v.label.clone()),
        delay_seconds: trip_update.delay,
        stop_time_updates: trip_update.stop_time_update.len() as i64,
        trip_timestamp: trip_update.timestamp,
    }
}

fn flatten_alert(entity_id: &str, alert: &gtfs_realtime::Alert) -> AlertRow {
    let first_period = alert.active_period.first();

    AlertRow {
        entity_id: entity_id.to_string(),
        cause: alert.cause,
        effect: alert.effect,
        severity_level: alert.severity_level,
        header_text: first_translation(alert.header_text.as_ref()),
        description_text: first_translation(alert.description_text.as_ref()),
        url: first_translation(alert.url.as_ref()),
        active_period_start: first_period.and_then(|p| p.start),
        active_period_end: first_period.and_then(|p| p.end),
        informed_routes: joined_ids(alert, |e| e.route_id.as_deref()),
        informed_stops: joined_ids(alert, |e| e.stop_id.as_deref()),
    }
}

fn first_translation(text: Option<&gtfs_realtime::TranslatedString>) -> Option<String> {
    text.and_then(|t| t.translation.first())
        .map(|t| t.text.clone())
}

fn joined_ids<F>(alert: &gtfs_realtime::Alert, select: F) -> Option<String>
where
    F: Fn(&gtfs_realtime::EntitySelector) -> Option<&str>,
{
    let ids: Vec<&str> = alert.informed_entity.iter().filter_map(select).collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids.join(","))
    }
}

// ── Parquet codec ────────────────────────────────────────────────────

fn fetch_time_field() -> Field {
    Field::new(
        FETCH_TIME_COLUMN,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        false,
    )
}

fn vehicle_position_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("entity_id", DataType::Utf8, false),
        Field::new("trip_id", DataType::Utf8, true),
        Field::new("route_id", DataType::Utf8, true),
        Field::new("vehicle_id", DataType::Utf8, true),
        Field::new("vehicle_label", DataType::Utf8, true),
        Field::new("latitude", DataType::Float32, true),
        Field::new("longitude", DataType::Float32, true),
        Field::new("bearing", DataType::Float32, true),
        Field::new("speed", DataType::Float32, true),
        Field::new("current_stop_sequence", DataType::UInt32, true),
        Field::new("stop_id", DataType::Utf8, true),
        Field::new("current_status", DataType::Int32, true),
        Field::new("congestion_level", DataType::Int32, true),
        Field::new("occupancy_status", DataType::Int32, true),
        Field::new("vehicle_timestamp", DataType::UInt64, true),
        fetch_time_field(),
    ]))
}

fn trip_update_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("entity_id", DataType::Utf8, false),
        Field::new("trip_id", DataType::Utf8, true),
        Field::new("route_id", DataType::Utf8, true),
        Field::new("direction_id", DataType::UInt32, true),
        Field::new("start_time", DataType::Utf8, true),
        Field::new("start_date", DataType::Utf8, true),
        Field::new("schedule_relationship", DataType::Int32, true),
        Field::new("vehicle_id", DataType::Utf8, true),
        Field::new("vehicle_label", DataType::Utf8, true),
        Field::new("delay_seconds", DataType::Int32, true),
        Field::new("stop_time_updates", DataType::Int64, false),
        Field::new("trip_timestamp", DataType::UInt64, true),
        fetch_time_field(),
    ]))
}

fn alert_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("entity_id", DataType::Utf8, false),
        Field::new("cause", DataType::Int32, true),
        Field::new("effect", DataType::Int32, true),
        Field::new("severity_level", DataType::Int32, true),
        Field::new("header_text", DataType::Utf8, true),
        Field::new("description_text", DataType::Utf8, true),
        Field::new("url", DataType::Utf8, true),
        Field::new("active_period_start", DataType::UInt64, true),
        Field::new("active_period_end", DataType::UInt64, true),
        Field::new("informed_routes", DataType::Utf8, true),
        Field::new("informed_stops", DataType::Utf8, true),
        fetch_time_field(),
    ]))
}

fn fetch_time_array(fetch_time: DateTime<Utc>, rows: usize) -> ArrayRef {
    let micros = fetch_time.timestamp_micros();
    let array =
        TimestampMicrosecondArray::from_iter_values(std::iter::repeat(micros).take(rows))
            .with_timezone("UTC");
    Arc::new(array)
}

/// Build the record batch for one service type of a snapshot. Zero rows is
/// valid; the schema is carried regardless.
pub fn to_record_batch(
    snapshot: &Snapshot,
    service_type: ServiceType,
) -> Result<RecordBatch, ColumnarError> {
    let batch = match service_type {
        ServiceType::VehiclePosition => vehicle_positions_batch(snapshot)?,
        ServiceType::TripUpdate => trip_updates_batch(snapshot)?,
        ServiceType::Alert => alerts_batch(snapshot)?,
    };
    Ok(batch)
}

fn vehicle_positions_batch(snapshot: &Snapshot) -> Result<RecordBatch, ColumnarError> {
    let rows = &snapshot.vehicle_positions;
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.entity_id.as_str()),
        )),
        Arc::new(rows.iter().map(|r| r.trip_id.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.route_id.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.vehicle_id.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.vehicle_label.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.latitude).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| r.longitude).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| r.bearing).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| r.speed).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| r.current_stop_sequence).collect::<UInt32Array>()),
        Arc::new(rows.iter().map(|r| r.stop_id.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.current_status).collect::<Int32Array>()),
        Arc::new(rows.iter().map(|r| r.congestion_level).collect::<Int32Array>()),
        Arc::new(rows.iter().map(|r| r.occupancy_status).collect::<Int32Array>()),
        Arc::new(rows.iter().map(|r| r.vehicle_timestamp).collect::<UInt64Array>()),
        fetch_time_array(snapshot.fetch_time, rows.len()),
    ];
    Ok(RecordBatch::try_new(vehicle_position_schema(), columns)?)
}

fn trip_updates_batch(snapshot: &Snapshot) -> Result<RecordBatch, ColumnarError> {
    let rows = &snapshot.trip_updates;
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.entity_id.as_str()),
        )),
        Arc::new(rows.iter().map(|r| r.trip_id.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.route_id.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.direction_id).collect::<UInt32Array>()),
        Arc::new(rows.iter().map(|r| r.start_time.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.start_date.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.schedule_relationship).collect::<Int32Array>()),
        Arc::new(rows.iter().map(|r| r.vehicle_id.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.vehicle_label.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.delay_seconds).collect::<Int32Array>()),
        Arc::new(Int64Array::from_iter_values(
            rows.iter().map(|r| r.stop_time_updates),
        )),
        Arc::new(rows.iter().map(|r| r.trip_timestamp).collect::<UInt64Array>()),
        fetch_time_array(snapshot.fetch_time, rows.len()),
    ];
    Ok(RecordBatch::try_new(trip_update_schema(), columns)?)
}

fn alerts_batch(snapshot: &Snapshot) -> Result<RecordBatch, ColumnarError> {
    let rows = &snapshot.alerts;
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.entity_id.as_str()),
        )),
        Arc::new(rows.iter().map(|r| r.cause).collect::<Int32Array>()),
        Arc::new(rows.iter().map(|r| r.effect).collect::<Int32Array>()),
        Arc::new(rows.iter().map(|r| r.severity_level).collect::<Int32Array>()),
        Arc::new(rows.iter().map(|r| r.header_text.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.description_text.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.url.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.active_period_start).collect::<UInt64Array>()),
        Arc::new(rows.iter().map(|r| r.active_period_end).collect::<UInt64Array>()),
        Arc::new(rows.iter().map(|r| r.informed_routes.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.informed_stops.as_deref()).collect::<StringArray>()),
        fetch_time_array(snapshot.fetch_time, rows.len()),
    ];
    Ok(RecordBatch::try_new(alert_schema(), columns)?)
}

/// Serialize one service type of a snapshot to Parquet bytes.
pub fn encode(snapshot: &Snapshot, service_type: ServiceType) -> Result<Vec<u8>, ColumnarError> {
    let batch = to_record_batch(snapshot, service_type)?;
    write_batches(batch.schema(), std::slice::from_ref(&batch))
}

/// Serialize record batches (all sharing `schema`) into one Parquet file.
pub fn write_batches(schema: SchemaRef, batches: &[RecordBatch]) -> Result<Vec<u8>, ColumnarError> {
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, None)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(buffer)
}

/// Deserialize a Parquet file into its schema and record batches. A file
/// with zero rows yields an empty batch list but still carries its schema.
pub fn read_batches(bytes: Vec<u8>) -> Result<(SchemaRef, Vec<RecordBatch>), ColumnarError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}
