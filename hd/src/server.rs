//! Running instance: endpoint listener plus published contact handle
//!
//! The server binds its own socket next to the rendezvous file, writes the
//! contact handle and then accepts connections until shut down. Each
//! connection is handled on its own task; commands go through the dispatcher
//! on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::handle::{ContactHandle, HandleError, HandleStore, PublishedHandle};
use crate::ipc::{self, EndpointError, EndpointRequest, EndpointResponse};

/// Version reported to clients
pub const VERSION: &str = env!("GIT_DESCRIBE");

/// Why the process could not become the listening instance
#[derive(Debug, Error)]
pub enum ServerStartError {
    #[error("Failed to bind endpoint: {0}")]
    Bind(#[from] EndpointError),

    #[error("Failed to publish contact handle: {0}")]
    Publish(#[from] HandleError),
}

/// Socket path for this process, derived from the rendezvous path
///
/// Each server gets its own socket so racing servers never unlink each other's.
pub fn socket_path_for(rendezvous: &Path, pid: u32) -> PathBuf {
    rendezvous.with_extension(format!("{}.sock", pid))
}

/// The listening instance
///
/// Dropping it stops the accept loop and removes the socket and the
/// rendezvous file.
#[derive(Debug)]
pub struct InstanceServer {
    socket_path: PathBuf,
    dispatcher: Arc<Dispatcher>,
    published: Option<PublishedHandle>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl InstanceServer {
    /// Bind the endpoint and publish its contact handle
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(store: &HandleStore, dispatcher: Arc<Dispatcher>) -> Result<Self, ServerStartError> {
        let pid = std::process::id();
        let rendezvous = store.rendezvous_path();
        let socket_path = socket_path_for(&rendezvous, pid);
        debug!(?socket_path, ?rendezvous, "InstanceServer::start: called");

        let (listener, socket_path) = ipc::create_listener_at(&socket_path)?;
        let handle = ContactHandle::new(&socket_path, pid, VERSION);

        let published = match store.publish(&handle) {
            Ok(published) => published,
            Err(e) => {
                drop(listener);
                ipc::cleanup_socket(&socket_path);
                return Err(e.into());
            }
        };

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            Arc::from(handle.token.as_str()),
            dispatcher.clone(),
        ));

        info!(?socket_path, rendezvous = ?published.path(), pid, "Instance server started");
        Ok(Self {
            socket_path,
            dispatcher,
            published: Some(published),
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn rendezvous_path(&self) -> Option<&Path> {
        self.published.as_ref().map(PublishedHandle::path)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Stop accepting connections and clean up
    pub async fn shutdown(mut self) {
        debug!(socket_path = ?self.socket_path, "InstanceServer::shutdown: called");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        info!("Instance server stopped");
    }
}

impl Drop for InstanceServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.published.take();
        ipc::cleanup_socket(&self.socket_path);
    }
}

async fn accept_loop(
    listener: UnixListener,
    mut shutdown_rx: mpsc::Receiver<()>,
    token: Arc<str>,
    dispatcher: Arc<Dispatcher>,
) {
    debug!("accept_loop: called");
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _)) => {
                        debug!("accept_loop: connection accepted");
                        tokio::spawn(handle_connection(stream, token.clone(), dispatcher.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept_loop: accept error");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("accept_loop: shutdown signal received");
                break;
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, token: Arc<str>, dispatcher: Arc<Dispatcher>) {
    let request = match ipc::read_request(&mut stream).await {
        Ok(request) => request,
        Err(EndpointError::Closed) => {
            debug!("handle_connection: peer closed without a request");
            return;
        }
        Err(e) => {
            warn!(error = %e, "handle_connection: bad request");
            respond(&mut stream, EndpointResponse::Error { message: e.to_string() }).await;
            return;
        }
    };

    if !tokens_match(request.token(), &token) {
        warn!("handle_connection: rejected request with invalid token");
        respond(
            &mut stream,
            EndpointResponse::Error {
                message: "invalid token".to_string(),
            },
        )
        .await;
        return;
    }

    let response = match request {
        EndpointRequest::Ping { .. } => EndpointResponse::Pong {
            version: VERSION.to_string(),
            pid: std::process::id(),
        },
        EndpointRequest::SendArgument { command, .. } => {
            match tokio::task::spawn_blocking(move || dispatcher.dispatch(&command)).await {
                Ok(()) => EndpointResponse::Ok,
                Err(e) => {
                    warn!(error = %e, "handle_connection: dispatch panicked");
                    EndpointResponse::Error {
                        message: format!("dispatch failed: {}", e),
                    }
                }
            }
        }
    };

    respond(&mut stream, response).await;
}

async fn respond(stream: &mut UnixStream, response: EndpointResponse) {
    if let Err(e) = ipc::send_response(stream, &response).await {
        debug!(error = %e, "respond: client went away before the response");
    }
}

/// Compare tokens without short-circuiting on the first differing byte
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
