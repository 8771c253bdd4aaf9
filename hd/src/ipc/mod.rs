//! Inter-Process Communication with a running instance
//!
//! A running instance listens on a Unix Domain Socket. Later launches connect
//! to it, present the token from the contact handle and hand over their
//! command lines.

pub mod client;
pub mod error;
pub mod listener;
pub mod messages;

pub use client::{EndpointClient, PeerInfo};
pub use error::EndpointError;
pub use listener::{cleanup_socket, create_listener_at, read_request, send_response};
pub use messages::{EndpointRequest, EndpointResponse};

/// Maximum message size
///
/// Bounds memory per connection only; far above any realistic `eval` script.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
