//! Continuously running GTFS-Realtime data aggregator.
//!
//! Fetches protobuf feeds from configured transit-agency endpoints on
//! per-endpoint cadences, persists every decoded snapshot as a Parquet file,
//! and compacts the per-fetch files into time-bucketed aggregates on a
//! separate cadence.

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod fetcher;
pub mod layout;
pub mod pipeline;
pub mod scheduler;
pub mod storage;

pub use config::{Config, ConfigError};
pub use pipeline::{run_pipeline, Pipeline, PipelineError};
