//! Periodic feed fetching: one tick = one snapshot per service type.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{error, info};

use crate::config::{ApiConfig, Config};
use crate::feed::{tabular, FeedClient, ServiceType};
use crate::layout;
use crate::scheduler::{JobArgs, JobDescriptor, ScheduledJob};
use crate::storage::{Storage, StorageRegistry};

struct ApiBinding {
    api: ApiConfig,
    timezone: Tz,
    storage: Arc<Storage>,
}

/// Owns one fetch job per configured (provider, url) pair.
pub struct FetcherService {
    client: FeedClient,
    bindings: HashMap<(String, String), ApiBinding>,
}

impl FetcherService {
    pub fn new(config: &Config, storages: &StorageRegistry) -> Result<Self, crate::feed::FeedError> {
        let client = FeedClient::new()?;

        let mut bindings = HashMap::new();
        for provider in &config.providers {
            let Some(storage) = storages.for_provider(&provider.name) else {
                // Registry construction always seeds "global"; an empty
                // registry only happens in hand-assembled setups.
                error!(provider = %provider.name, "No storage registered, skipping provider");
                continue;
            };
            for api in &provider.apis {
                bindings.insert(
                    (provider.name.clone(), api.url.clone()),
                    ApiBinding {
                        api: api.clone(),
                        timezone: provider.timezone,
                        storage: storage.clone(),
                    },
                );
            }
        }

        Ok(Self { client, bindings })
    }

    /// One scheduled fetch tick: fetch the feed, split the snapshot per
    /// service type, persist each subset as an individual Parquet file.
    ///
    /// Failures are logged and swallowed; the fetch interval is the retry
    /// cadence and a dropped snapshot is never retried.
    pub async fn run_once(
        &self,
        provider_name: &str,
        url: &str,
        service_types: &[ServiceType],
        timezone: Tz,
    ) {
        let Some(binding) = self
            .bindings
            .get(&(provider_name.to_string(), url.to_string()))
        else {
            error!(provider = %provider_name, url, "Fetch tick for unknown api");
            return;
        };

        let now_utc = Utc::now();
        let snapshot = match self.client.fetch(url, service_types, now_utc).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(provider = %provider_name, url, error = %e, "Feed fetch failed");
                return;
            }
        };

        let local = now_utc.with_timezone(&timezone).naive_local();
        for &service_type in service_types {
            // Single-service feeds still go through the split so every
            // persisted file stays single-service.
            let subset = snapshot.subset(service_type);
            let bytes = match tabular::encode(&subset, service_type) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(
                        provider = %provider_name,
                        service = %service_type,
                        error = %e,
                        "Failed to encode snapshot"
                    );
                    continue;
                }
            };

            let path = layout::individual_path(provider_name, service_type, local);
            match binding.storage.put(&path, &bytes).await {
                Ok(_) => {
                    info!(
                        provider = %provider_name,
                        service = %service_type,
                        rows = subset.len(service_type),
                        path = %path,
                        "Persisted snapshot"
                    );
                }
                Err(e) => {
                    error!(
                        provider = %provider_name,
                        service = %service_type,
                        path = %path,
                        error = %e,
                        "Failed to persist snapshot"
                    );
                }
            }
        }
    }

    /// One job per (provider, api), ticking at the api's refresh cadence.
    pub fn get_scheduling(self: &Arc<Self>) -> Vec<ScheduledJob> {
        let mut jobs = Vec::with_capacity(self.bindings.len());
        for ((provider_name, url), binding) in &self.bindings {
            let descriptor = JobDescriptor {
                interval_seconds: binding.api.refresh_seconds,
                name: format!("fetch/{}/{}", provider_name, job_url_suffix(url)),
                args: JobArgs::Fetch {
                    provider_name: provider_name.clone(),
                    url: url.clone(),
                    service_types: binding.api.services.clone(),
                    timezone: binding.timezone,
                },
            };

            let service = self.clone();
            let (provider_name, url) = (provider_name.clone(), url.clone());
            let (service_types, timezone) = (binding.api.services.clone(), binding.timezone);
            let runner = Arc::new(move || {
                let service = service.clone();
                let (provider_name, url) = (provider_name.clone(), url.clone());
                let service_types = service_types.clone();
                Box::pin(async move {
                    service
                        .run_once(&provider_name, &url, &service_types, timezone)
                        .await;
                }) as futures::future::BoxFuture<'static, ()>
            });

            jobs.push(ScheduledJob { descriptor, runner });
        }
        jobs
    }
}

/// Deterministic job-name suffix for an endpoint: host plus path, falling
/// back to the raw url when it does not parse.
fn job_url_suffix(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path()),
        Err(_) => url.to_string(),
    }
}
