use chrono::{DateTime, Utc};
use prost::Message;

use super::{tabular, ServiceType, Snapshot};

/// Maximum allowed protobuf response size (50 MB)
const MAX_PROTOBUF_SIZE: usize = 50 * 1024 * 1024;

/// Per-request timeout for feed endpoints.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// One-shot GTFS-RT feed fetcher: GET, decode, tabularize.
pub struct FeedClient {
    client: reqwest::Client,
}

impl FeedClient {
    pub fn new() -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gtfs-rt-aggregator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Fetch one feed and flatten it into a snapshot.
    ///
    /// Only entities of the requested service types are kept; a valid feed
    /// with zero matching entities yields an empty snapshot. Every row gets
    /// `now_utc` as its fetch time.
    pub async fn fetch(
        &self,
        url: &str,
        service_types: &[ServiceType],
        now_utc: DateTime<Utc>,
    ) -> Result<Snapshot, FeedError> {
        let response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(FeedError::Status {
                status: response.status(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;

        if bytes.len() > MAX_PROTOBUF_SIZE {
            return Err(FeedError::TooLarge {
                bytes: bytes.len(),
                url: url.to_string(),
            });
        }

        let feed = gtfs_realtime::FeedMessage::decode(bytes.as_ref()).map_err(|source| {
            FeedError::Parse {
                url: url.to_string(),
                bytes: bytes.len(),
                source,
            }
        })?;

        Ok(tabular::flatten(&feed, service_types, now_utc))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Fetch error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Fetch error: HTTP {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("Fetch error: response too large ({bytes} bytes) from {url}")]
    TooLarge { bytes: usize, url: String },
    #[error("Parse error for {url} ({bytes} bytes): {source}")]
    Parse {
        url: String,
        bytes: usize,
        source: prost::DecodeError,
    },
}
