//! Endpoint transport error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while calling or serving the endpoint
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message too large: more than {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Connection closed before a message was received")]
    Closed,

    #[error("Endpoint rejected the call: {0}")]
    Rejected(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl EndpointError {
    /// Whether the endpoint could not be reached at all
    ///
    /// Protocol errors (`TooLarge`, `Rejected`, `Malformed`,
    /// `UnexpectedResponse`) mean the instance is alive and answered.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Timeout { .. } | Self::Io(_) | Self::Closed
        )
    }
}
