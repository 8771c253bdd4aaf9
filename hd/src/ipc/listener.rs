//! IPC listener for the running instance
//!
//! Provides helpers for creating the Unix Domain Socket listener and for
//! reading requests and writing responses on accepted connections.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::MAX_MESSAGE_SIZE;
use super::error::EndpointError;
use super::messages::{EndpointRequest, EndpointResponse};

/// Create and bind a Unix Domain Socket listener at `socket_path`
///
/// Handles cleanup of a stale socket file left behind by a crashed process
/// with the same pid.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf), EndpointError> {
    debug!(?socket_path, "create_listener: creating IPC socket");

    // Ensure parent directory exists
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Clean up stale socket if exists
    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path)?;
    }

    // Bind the socket
    let listener = UnixListener::bind(socket_path)?;
    debug!(?socket_path, "create_listener: socket bound successfully");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600)) {
            warn!(?socket_path, error = %e, "Failed to restrict socket permissions");
        }
    }

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one request line from an accepted connection
pub async fn read_request(stream: &mut UnixStream) -> Result<EndpointRequest, EndpointError> {
    let mut reader = BufReader::new(stream.take(MAX_MESSAGE_SIZE as u64 + 1));
    let mut line = String::new();

    let bytes_read = reader.read_line(&mut line).await?;

    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(EndpointError::TooLarge {
            limit: MAX_MESSAGE_SIZE,
        });
    }

    if line.is_empty() {
        return Err(EndpointError::Closed);
    }

    let request: EndpointRequest = serde_json::from_str(line.trim())?;
    debug!(kind = request_kind(&request), "read_request: parsed request");

    Ok(request)
}

/// Send a response on the stream
pub async fn send_response(stream: &mut UnixStream, response: &EndpointResponse) -> Result<(), EndpointError> {
    let response_json = serde_json::to_string(response)?;
    stream.write_all(response_json.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    debug!(?response, "send_response: sent response");
    Ok(())
}

/// Request name for logs, never the token
fn request_kind(request: &EndpointRequest) -> &'static str {
    match request {
        EndpointRequest::SendArgument { .. } => "SendArgument",
        EndpointRequest::Ping { .. } => "Ping",
    }
}
