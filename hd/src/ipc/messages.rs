//! Endpoint message types
//!
//! Newline-delimited JSON envelopes. Each request and each response is a
//! single line. The command text carried by `SendArgument` is the plain
//! `<verb> <payload>` line understood by the dispatcher; the envelope only
//! adds the token and keeps embedded newlines of scripts escaped.

use serde::{Deserialize, Serialize};

/// Requests from a launching process to the running instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EndpointRequest {
    /// Deliver one command line to the dispatcher
    SendArgument { token: String, command: String },

    /// Liveness probe
    Ping { token: String },
}

impl EndpointRequest {
    pub fn token(&self) -> &str {
        match self {
            Self::SendArgument { token, .. } | Self::Ping { token } => token,
        }
    }
}

/// Responses from the running instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EndpointResponse {
    /// Command accepted and dispatched
    Ok,

    /// Pong response to ping
    Pong { version: String, pid: u32 },

    /// Error response
    Error { message: String },
}
