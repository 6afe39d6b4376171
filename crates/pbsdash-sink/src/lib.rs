//! Search sink for pbsdash snapshots.
//!
//! Each poll cycle's records are bulk-indexed into a per-day index so a
//! dashboard can plot them over time.

pub mod elasticsearch;

pub use elasticsearch::ElasticsearchSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pbsdash_state::Snapshot;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Invalid sink URL {url:?}: {error}")]
    InvalidUrl { url: String, error: url::ParseError },
    #[error("Request to search sink failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Search sink answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to encode records: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of one bulk request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub indexed: usize,
    pub failed: usize,
}

/// Somewhere to publish each cycle's records.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Index every record of `snapshot` into `index`.
    async fn bulk_upsert(&self, snapshot: &Snapshot, index: &str)
    -> Result<BulkSummary, SinkError>;
}

/// Daily index name, e.g. `pbs-jobs-2024-05-01`.
///
/// Cycles of one UTC calendar day land in the same index.
pub fn index_name(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", prefix, at.format("%Y-%m-%d"))
}
