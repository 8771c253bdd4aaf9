//! IPC client for calling a running instance
//!
//! One connection per call: connect, write the request line, wait for the
//! response line. The response is only written after the command has been
//! dispatched, so sequential calls from one client are applied in order.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::MAX_MESSAGE_SIZE;
use super::error::EndpointError;
use super::messages::{EndpointRequest, EndpointResponse};

/// Identity reported by a live instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub version: String,
    pub pid: u32,
}

/// Client for one running instance's endpoint
#[derive(Debug, Clone)]
pub struct EndpointClient {
    socket_path: PathBuf,
    token: String,
    timeout: Option<Duration>,
}

impl EndpointClient {
    /// Create a client; without a timeout every call may block indefinitely
    pub fn new(socket_path: impl Into<PathBuf>, token: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            token: token.into(),
            timeout: None,
        }
    }

    /// Bound connect, write and read separately
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Deliver one command line to the instance's dispatcher
    pub async fn send_argument(&self, command: &str) -> Result<(), EndpointError> {
        debug!(%command, "EndpointClient: sending argument");
        let request = EndpointRequest::SendArgument {
            token: self.token.clone(),
            command: command.to_string(),
        };
        match self.call(request).await? {
            EndpointResponse::Ok => Ok(()),
            EndpointResponse::Error { message } => Err(EndpointError::Rejected(message)),
            other => Err(EndpointError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Check that the instance is alive and accepts our token
    pub async fn ping(&self) -> Result<PeerInfo, EndpointError> {
        debug!("EndpointClient: pinging instance");
        let request = EndpointRequest::Ping {
            token: self.token.clone(),
        };
        match self.call(request).await? {
            EndpointResponse::Pong { version, pid } => Ok(PeerInfo { version, pid }),
            EndpointResponse::Error { message } => Err(EndpointError::Rejected(message)),
            other => Err(EndpointError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Send a request and wait for the response
    async fn call(&self, request: EndpointRequest) -> Result<EndpointResponse, EndpointError> {
        debug!(?self.socket_path, "EndpointClient: connecting");

        let stream = self
            .bounded("connect", async {
                UnixStream::connect(&self.socket_path)
                    .await
                    .map_err(|source| EndpointError::Connect {
                        path: self.socket_path.clone(),
                        source,
                    })
            })
            .await?;

        self.call_on_stream(stream, request).await
    }

    /// Send request on an existing stream (extracted for testing)
    async fn call_on_stream(
        &self,
        mut stream: UnixStream,
        request: EndpointRequest,
    ) -> Result<EndpointResponse, EndpointError> {
        let request_json = serde_json::to_string(&request)?;

        if request_json.len() > MAX_MESSAGE_SIZE {
            return Err(EndpointError::TooLarge {
                limit: MAX_MESSAGE_SIZE,
            });
        }

        self.bounded("write", async {
            stream.write_all(request_json.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;
            Ok::<_, EndpointError>(())
        })
        .await?;

        let mut reader = BufReader::new((&mut stream).take(MAX_MESSAGE_SIZE as u64 + 1));
        let mut response_line = String::new();

        let bytes_read = self
            .bounded("read", async { Ok::<_, EndpointError>(reader.read_line(&mut response_line).await?) })
            .await?;

        if bytes_read > MAX_MESSAGE_SIZE {
            return Err(EndpointError::TooLarge {
                limit: MAX_MESSAGE_SIZE,
            });
        }
        if bytes_read == 0 {
            return Err(EndpointError::Closed);
        }

        let response: EndpointResponse = serde_json::from_str(response_line.trim())?;
        debug!(?response, "EndpointClient: received response");
        Ok(response)
    }

    /// Apply the optional timeout to one transport step
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, EndpointError>
    where
        F: Future<Output = Result<T, EndpointError>>,
    {
        match self.timeout {
            Some(after) => tokio::time::timeout(after, fut)
                .await
                .map_err(|_| EndpointError::Timeout { operation, after })?,
            None => fut.await,
        }
    }
}
