//! Periodic job runner.
//!
//! Every registered job is a value record (`JobDescriptor`) paired with its
//! bound runner. `start` spawns one tokio task per job; the tick body is
//! awaited inside the job's own loop, so a job never overlaps itself while
//! slow ticks leave other jobs unaffected.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::feed::ServiceType;

/// Type-erased tick body. Each invocation must be independent; the runner is
/// called again for every tick.
pub type JobRunner = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Introspectable description of a scheduled job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub interval_seconds: u64,
    /// Deterministic, unique within one pipeline.
    pub name: String,
    pub args: JobArgs,
}

/// Bound arguments of a job, kept as data so tests can assert on them.
#[derive(Debug, Clone, PartialEq)]
pub enum JobArgs {
    Fetch {
        provider_name: String,
        url: String,
        service_types: Vec<ServiceType>,
        timezone: Tz,
    },
    Aggregate {
        provider_name: String,
        service_types: Vec<ServiceType>,
        frequency_minutes: u32,
        timezone: Tz,
    },
}

/// A descriptor together with its runner.
pub struct ScheduledJob {
    pub descriptor: JobDescriptor,
    pub runner: JobRunner,
}

struct Inner {
    jobs: Vec<ScheduledJob>,
    handles: Vec<(String, JoinHandle<()>)>,
    running: bool,
}

pub struct Scheduler {
    inner: Mutex<Inner>,
    shutdown: watch::Sender<bool>,
    grace: Duration,
}

impl Scheduler {
    /// `grace` bounds how long `stop` waits for in-flight ticks.
    pub fn new(grace: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                jobs: Vec::new(),
                handles: Vec::new(),
                running: false,
            }),
            shutdown,
            grace,
        }
    }

    pub async fn add_schedules(&self, jobs: Vec<ScheduledJob>) {
        let mut inner = self.inner.lock().await;
        for job in &jobs {
            debug!(
                job = %job.descriptor.name,
                interval_seconds = job.descriptor.interval_seconds,
                "Registered schedule"
            );
        }
        inner.jobs.extend(jobs);
    }

    /// Snapshot of all registered descriptors.
    pub async fn descriptors(&self) -> Vec<JobDescriptor> {
        let inner = self.inner.lock().await;
        inner.jobs.iter().map(|job| job.descriptor.clone()).collect()
    }

    /// Spawn one task per registered job. Calling `start` on a running
    /// scheduler is a no-op.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        if inner.running {
            return Ok(());
        }

        info!(jobs = inner.jobs.len(), "Starting scheduler");
        let mut handles = Vec::with_capacity(inner.jobs.len());
        for job in &inner.jobs {
            let name = job.descriptor.name.clone();
            let interval = Duration::from_secs(job.descriptor.interval_seconds);
            let runner = job.runner.clone();
            let mut shutdown = self.shutdown.subscribe();

            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // Skip the first tick which fires immediately
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            debug!(job = %task_name, "Tick");
                            runner().await;
                        }
                        _ = shutdown.changed() => {
                            debug!(job = %task_name, "Shutdown");
                            break;
                        }
                    }
                }
            });
            handles.push((name, handle));
        }

        inner.handles = handles;
        inner.running = true;
        Ok(())
    }

    /// Stop issuing ticks and wait for in-flight ticks to finish, bounded by
    /// the grace period. Stragglers are aborted.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        if !inner.running {
            return Ok(());
        }

        info!("Stopping scheduler");
        let _ = self.shutdown.send(true);

        let mut stragglers = Vec::new();
        for (name, handle) in inner.handles.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.grace, handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(job = %name, "Job did not stop within grace period, aborting");
                    abort.abort();
                    stragglers.push(name);
                }
            }
        }
        inner.running = false;

        if stragglers.is_empty() {
            info!("Scheduler stopped");
            Ok(())
        } else {
            Err(SchedulerError::GraceExceeded {
                jobs: stragglers.join(", "),
                grace: self.grace,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Jobs [{jobs}] did not finish within the {grace:?} shutdown grace period")]
    GraceExceeded { jobs: String, grace: Duration },
}
