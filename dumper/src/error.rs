use std::io;
use std::time::Duration;

use thiserror::Error;

/// Why a single index's scroll chain stopped early.
///
/// Every variant is local to one index; the pipeline records it and keeps draining the others.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("malformed response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error(
        "continuation for index '{index}' was not accepted within {waited:?}, last scroll id {scroll_id}"
    )]
    Backpressure {
        index: String,
        scroll_id: String,
        waited: Duration,
    },
    #[error("failed to write document '{id}' of index '{index}': {source}")]
    Destination {
        index: String,
        id: String,
        #[source]
        source: io::Error,
    },
    #[error("dump cancelled")]
    Cancelled,
    #[error("scroll chain was abandoned before the index was drained")]
    Abandoned,
}

impl DumpError {
    pub fn kind(&self) -> &'static str {
        match self {
            DumpError::Transport { .. } => "transport",
            DumpError::Decode { .. } => "decode",
            DumpError::Backpressure { .. } => "backpressure",
            DumpError::Destination { .. } => "destination",
            DumpError::Cancelled => "cancelled",
            DumpError::Abandoned => "abandoned",
        }
    }
}
