//! Assembly of storages, services, and schedules into a runnable pipeline.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::aggregator::AggregatorService;
use crate::config::{Config, ConfigError};
use crate::feed::FeedError;
use crate::fetcher::FetcherService;
use crate::scheduler::{Scheduler, SchedulerError};
use crate::storage::StorageRegistry;

/// How long `stop` waits for in-flight ticks: the feed request timeout plus
/// a small margin.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(35);

pub struct Pipeline {
    scheduler: Arc<Scheduler>,
    storages: StorageRegistry,
}

impl Pipeline {
    /// Build storages and services from a validated config and register
    /// every fetch and aggregation job with the scheduler.
    pub async fn new(config: &Config, scheduler: Arc<Scheduler>) -> Result<Self, PipelineError> {
        config.validate()?;

        let storages = StorageRegistry::from_config(config)?;
        let fetcher = Arc::new(FetcherService::new(config, &storages)?);
        let aggregator = Arc::new(AggregatorService::new(config, &storages));

        let mut jobs = fetcher.get_scheduling();
        jobs.extend(aggregator.get_scheduling());
        info!(
            providers = config.providers.len(),
            jobs = jobs.len(),
            "Assembled pipeline"
        );
        scheduler.add_schedules(jobs).await;

        Ok(Self {
            scheduler,
            storages,
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler.start().await
    }

    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.scheduler.stop().await
    }

    /// Storage handles, shared with both services.
    pub fn storages(&self) -> &StorageRegistry {
        &self.storages
    }
}

/// Run the pipeline until ctrl-c.
pub async fn run_pipeline(config: Config) -> Result<(), PipelineError> {
    let scheduler = Arc::new(Scheduler::new(SHUTDOWN_GRACE));
    let pipeline = Pipeline::new(&config, scheduler).await?;

    pipeline.start().await?;
    info!("Pipeline running, press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(PipelineError::Signal)?;

    info!("Shutdown requested");
    pipeline.stop().await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Feed client error: {0}")]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(std::io::Error),
}
