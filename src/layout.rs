//! Storage path layout and window arithmetic.
//!
//! Individual snapshots live at
//! `{provider}/{service_type}/individual/individual_{YYYY-MM-DD_HH-MM-SS}.parquet`,
//! aggregates at `{provider}/{service_type}/{YYYY-MM-DD}/{HH-MM}.parquet`.
//! All timestamps are wall-clock times in the provider's timezone.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

use crate::feed::ServiceType;

/// Timestamp format embedded in individual file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const INDIVIDUAL_PREFIX: &str = "individual_";
const PARQUET_SUFFIX: &str = ".parquet";

/// Directory holding the not-yet-aggregated snapshots of one service type.
pub fn individual_dir(provider: &str, service_type: ServiceType) -> String {
    format!("{}/{}/individual/", provider, service_type.as_str())
}

/// Path for one snapshot fetched at `local` (provider-local wall clock).
pub fn individual_path(provider: &str, service_type: ServiceType, local: NaiveDateTime) -> String {
    format!(
        "{}{}{}{}",
        individual_dir(provider, service_type),
        INDIVIDUAL_PREFIX,
        local.format(FILE_TIMESTAMP_FORMAT),
        PARQUET_SUFFIX,
    )
}

/// Path for the aggregate of the window starting at `window_start`.
pub fn aggregate_path(
    provider: &str,
    service_type: ServiceType,
    window_start: NaiveDateTime,
) -> String {
    format!(
        "{}/{}/{}/{}{}",
        provider,
        service_type.as_str(),
        window_start.format("%Y-%m-%d"),
        window_start.format("%H-%M"),
        PARQUET_SUFFIX,
    )
}

/// Recover the wall-clock fetch time from an individual file path.
///
/// Returns `None` for anything that is not an
/// `individual_YYYY-MM-DD_HH-MM-SS.parquet` basename; callers treat such
/// paths as foreign and skip them.
pub fn parse_individual_timestamp(path: &str) -> Option<NaiveDateTime> {
    let basename = path.rsplit('/').next()?;
    let stamp = basename
        .strip_prefix(INDIVIDUAL_PREFIX)?
        .strip_suffix(PARQUET_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, FILE_TIMESTAMP_FORMAT).ok()
}

/// Floor a local wall-clock time to the start of its window.
///
/// Windows are aligned to local midnight, so widths that do not divide 24
/// hours still snap consistently within a day.
pub fn floor_to_window(local: NaiveDateTime, frequency_minutes: u32) -> NaiveDateTime {
    let minutes = local.hour() * 60 + local.minute();
    let floored = minutes - minutes % frequency_minutes;
    local.date().and_time(NaiveTime::MIN) + Duration::minutes(i64::from(floored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn local(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn individual_path_round_trips() {
        let fetched = local(12, 34, 56);
        let path = individual_path("test_provider", ServiceType::VehiclePosition, fetched);
        assert_eq!(
            path,
            "test_provider/VehiclePosition/individual/individual_2023-01-01_12-34-56.parquet"
        );
        assert_eq!(parse_individual_timestamp(&path), Some(fetched));
    }

    #[test]
    fn foreign_basenames_do_not_parse() {
        assert_eq!(parse_individual_timestamp("p/Alert/individual/notes.txt"), None);
        assert_eq!(
            parse_individual_timestamp("p/Alert/individual/individual_garbage.parquet"),
            None
        );
        // Aggregate files must never be mistaken for individuals
        assert_eq!(parse_individual_timestamp("p/Alert/2023-01-01/12-00.parquet"), None);
    }

    #[test]
    fn aggregate_path_format() {
        let window = local(12, 15, 0);
        assert_eq!(
            aggregate_path("test_provider", ServiceType::TripUpdate, window),
            "test_provider/TripUpdate/2023-01-01/12-15.parquet"
        );
    }

    #[test]
    fn floor_aligns_to_midnight() {
        assert_eq!(floor_to_window(local(12, 14, 59), 15), local(12, 0, 0));
        assert_eq!(floor_to_window(local(12, 15, 0), 15), local(12, 15, 0));
        assert_eq!(floor_to_window(local(0, 0, 0), 15), local(0, 0, 0));
        assert_eq!(floor_to_window(local(23, 59, 59), 60), local(23, 0, 0));
    }

    #[test]
    fn floor_with_width_not_dividing_a_day() {
        // 7 does not divide 24*60; flooring still snaps within the day
        assert_eq!(floor_to_window(local(0, 6, 30), 7), local(0, 0, 0));
        assert_eq!(floor_to_window(local(0, 7, 0), 7), local(0, 7, 0));
        assert_eq!(floor_to_window(local(12, 0, 0), 7), local(11, 54, 0));
    }

    #[test]
    fn window_counts_over_contiguous_minutes() {
        // A contiguous 1-minute series spanning an hour falls into
        // ceil(60 / f) windows for every width that divides the hour.
        for f in [5u32, 10, 15, 20, 30, 60] {
            let mut starts = std::collections::BTreeSet::new();
            for m in 0..60 {
                starts.insert(floor_to_window(local(9, m, 0), f));
            }
            assert_eq!(starts.len(), (60 / f) as usize, "width {f}");
        }
    }
}
