//! Compaction of individual snapshots into time-bucketed aggregate files.
//!
//! Individual files are grouped by aligned wall-clock windows in the
//! provider timezone; every closed window is merged into one aggregate file
//! and its inputs are retired. The open window is left alone, so fetch ticks
//! may keep writing into it concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use tracing::{error, info, warn};

use arrow_schema::SchemaRef;

use crate::config::Config;
use crate::feed::{tabular, ColumnarError, ServiceType};
use crate::layout;
use crate::scheduler::{JobArgs, JobDescriptor, ScheduledJob};
use crate::storage::{Storage, StorageError, StorageRegistry};

static INDIVIDUAL_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^individual_\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}\.parquet$")
        .expect("individual file pattern is valid")
});

struct ProviderBinding {
    timezone: Tz,
    apis: Vec<crate::config::ApiConfig>,
    storage: Arc<Storage>,
}

/// Owns one compaction job per configured (provider, service type) pair.
pub struct AggregatorService {
    bindings: HashMap<String, ProviderBinding>,
}

impl AggregatorService {
    pub fn new(config: &Config, storages: &StorageRegistry) -> Self {
        let mut bindings = HashMap::new();
        for provider in &config.providers {
            let Some(storage) = storages.for_provider(&provider.name) else {
                error!(provider = %provider.name, "No storage registered, skipping provider");
                continue;
            };
            bindings.insert(
                provider.name.clone(),
                ProviderBinding {
                    timezone: provider.timezone,
                    apis: provider.apis.clone(),
                    storage,
                },
            );
        }
        Self { bindings }
    }

    /// One scheduled compaction tick over the given service types. A failure
    /// on one service type is logged and does not stop the others.
    pub async fn run_once(
        &self,
        provider_name: &str,
        service_types: &[ServiceType],
        frequency_minutes: u32,
        timezone: Tz,
    ) {
        let Some(binding) = self.bindings.get(provider_name) else {
            error!(provider = %provider_name, "Aggregation tick for unknown provider");
            return;
        };

        for &service_type in service_types {
            if let Err(e) = self
                .aggregate_service_type(
                    &binding.storage,
                    provider_name,
                    service_type,
                    frequency_minutes,
                    timezone,
                )
                .await
            {
                error!(
                    provider = %provider_name,
                    service = %service_type,
                    error = %e,
                    "Aggregation failed"
                );
            }
        }
    }

    /// Compact every closed window of one service type.
    async fn aggregate_service_type(
        &self,
        storage: &Storage,
        provider_name: &str,
        service_type: ServiceType,
        frequency_minutes: u32,
        timezone: Tz,
    ) -> Result<(), AggregateError> {
        let dir = layout::individual_dir(provider_name, service_type);
        let files = storage.list(&dir, Some(&INDIVIDUAL_FILE_RE)).await;
        if files.is_empty() {
            return Ok(());
        }

        let groups = group_files_by_time(&files, frequency_minutes);

        let now_local = Utc::now().with_timezone(&timezone).naive_local();
        let current_window = layout::floor_to_window(now_local, frequency_minutes);

        for (window_start, window_files) in groups {
            // The current window is still being written to; it will be
            // picked up once closed.
            if window_start >= current_window {
                continue;
            }

            let out_path = layout::aggregate_path(provider_name, service_type, window_start);
            self.aggregate_files(storage, &window_files, &out_path).await?;
            info!(
                provider = %provider_name,
                service = %service_type,
                window = %window_start,
                inputs = window_files.len(),
                path = %out_path,
                "Compacted window"
            );
        }

        Ok(())
    }

    /// Merge `files` (plus any pre-existing aggregate at `out_path`, so late
    /// arrivals after a partial prior run stay idempotent) into one file,
    /// then retire the inputs. Inputs are only deleted after the aggregate
    /// is durably visible; a failed write leaves everything in place.
    async fn aggregate_files(
        &self,
        storage: &Storage,
        files: &[String],
        out_path: &str,
    ) -> Result<(), AggregateError> {
        let mut schema: Option<SchemaRef> = None;
        let mut batches = Vec::new();

        if storage.exists(out_path).await {
            let existing = storage.get(out_path).await?;
            let (existing_schema, existing_batches) = tabular::read_batches(existing)?;
            schema = Some(existing_schema);
            batches.extend(existing_batches);
        }

        for path in files {
            let bytes = storage.get(path).await?;
            let (file_schema, file_batches) = tabular::read_batches(bytes)?;
            schema.get_or_insert(file_schema);
            batches.extend(file_batches);
        }

        let Some(schema) = schema else {
            return Err(AggregateError::NoInputs(out_path.to_string()));
        };

        let merged = tabular::write_batches(schema, &batches)?;
        storage.put(out_path, &merged).await?;

        // put is atomic, but deletion is irreversible: verify before retiring
        if !storage.exists(out_path).await {
            return Err(AggregateError::VerificationFailed(out_path.to_string()));
        }

        for path in files {
            if let Err(e) = storage.delete(path).await {
                warn!(path = %path, error = %e, "Failed to retire aggregated input");
            }
        }

        Ok(())
    }

    /// One job per (provider, service_type): the service-type sets of all
    /// apis are flattened and de-duplicated per provider, the first api
    /// listing a type supplying its cadence.
    pub fn get_scheduling(self: &Arc<Self>) -> Vec<ScheduledJob> {
        let mut jobs = Vec::new();
        for (provider_name, binding) in &self.bindings {
            let mut seen = Vec::new();
            for api in &binding.apis {
                for &service_type in &api.services {
                    if seen.contains(&service_type) {
                        continue;
                    }
                    seen.push(service_type);

                    let descriptor = JobDescriptor {
                        interval_seconds: api.check_interval_seconds,
                        name: format!("aggregate/{}/{}", provider_name, service_type),
                        args: JobArgs::Aggregate {
                            provider_name: provider_name.clone(),
                            service_types: vec![service_type],
                            frequency_minutes: api.frequency_minutes,
                            timezone: binding.timezone,
                        },
                    };

                    let service = self.clone();
                    let provider_name = provider_name.clone();
                    let frequency_minutes = api.frequency_minutes;
                    let timezone = binding.timezone;
                    let runner = Arc::new(move || {
                        let service = service.clone();
                        let provider_name = provider_name.clone();
                        Box::pin(async move {
                            service
                                .run_once(
                                    &provider_name,
                                    &[service_type],
                                    frequency_minutes,
                                    timezone,
                                )
                                .await;
                        }) as futures::future::BoxFuture<'static, ()>
                    });

                    jobs.push(ScheduledJob { descriptor, runner });
                }
            }
        }
        jobs
    }
}

/// Bucket individual files by the window their filename timestamp falls in.
///
/// Timestamps are provider-local wall clock; paths that do not carry a
/// parseable `individual_*.parquet` basename are skipped. Storage listings
/// come back in no particular order, so each bucket is sorted
/// chronologically to keep aggregate row order deterministic.
pub fn group_files_by_time(
    files: &[String],
    frequency_minutes: u32,
) -> BTreeMap<NaiveDateTime, Vec<String>> {
    let mut groups: BTreeMap<NaiveDateTime, Vec<(NaiveDateTime, String)>> = BTreeMap::new();
    for path in files {
        let Some(fetched) = layout::parse_individual_timestamp(path) else {
            warn!(path = %path, "Skipping file with unparseable timestamp");
            continue;
        };
        let window_start = layout::floor_to_window(fetched, frequency_minutes);
        groups
            .entry(window_start)
            .or_default()
            .push((fetched, path.clone()));
    }

    groups
        .into_iter()
        .map(|(window_start, mut entries)| {
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            (window_start, entries.into_iter().map(|(_, path)| path).collect())
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Columnar(#[from] ColumnarError),
    #[error("Aggregate {0} not visible after write, keeping inputs")]
    VerificationFailed(String),
    #[error("No readable inputs for aggregate {0}")]
    NoInputs(String),
}
