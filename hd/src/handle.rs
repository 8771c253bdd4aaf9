//! Contact handle persistence
//!
//! A running instance writes its contact handle (socket address plus an
//! unguessable token) to the rendezvous file. Possession of the token is the
//! only authorization the endpoint checks, so the file is owner-only.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::InstanceConfig;
use crate::ipc::{EndpointClient, EndpointError, PeerInfo};
use crate::rendezvous::RendezvousLocator;

/// Token length in bytes before hex encoding
pub const TOKEN_BYTES: usize = 32;

/// Errors from loading or publishing a contact handle
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("No contact handle at {path}")]
    NotFound { path: PathBuf },

    #[error("Contact handle at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Contact handle at {path} is stale: {source}")]
    StaleReference {
        path: PathBuf,
        #[source]
        source: EndpointError,
    },

    #[error("Instance at {path} is alive but refused a command: {source}")]
    Refused {
        path: PathBuf,
        #[source]
        source: EndpointError,
    },

    #[error("Failed to write contact handle to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HandleError {
    /// Whether the rendezvous file should be removed after this error
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::StaleReference { .. })
    }
}

/// Serialized reference to a running instance's endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactHandle {
    /// Socket the instance listens on
    pub socket: PathBuf,

    /// Hex-encoded random token every request must carry
    pub token: String,

    /// Process id of the instance
    pub pid: u32,

    /// Version of the instance
    pub version: String,
}

impl std::fmt::Debug for ContactHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactHandle")
            .field("socket", &self.socket)
            .field("token", &"<redacted>")
            .field("pid", &self.pid)
            .field("version", &self.version)
            .finish()
    }
}

impl ContactHandle {
    /// Create a handle with a fresh token
    pub fn new(socket: impl Into<PathBuf>, pid: u32, version: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            token: generate_token(),
            pid,
            version: version.into(),
        }
    }

    /// Client calling the endpoint this handle refers to
    pub fn client(&self, timeout: Option<Duration>) -> EndpointClient {
        EndpointClient::new(&self.socket, &self.token).with_timeout(timeout)
    }

    fn validate(&self) -> Result<(), String> {
        if self.socket.as_os_str().is_empty() {
            return Err("empty socket address".to_string());
        }
        if self.token.len() != TOKEN_BYTES * 2 || !self.token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("malformed token".to_string());
        }
        Ok(())
    }
}

/// Hex string of `TOKEN_BYTES` random bytes from the thread-local CSPRNG
pub fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Reads and writes contact handles at the rendezvous path
#[derive(Debug, Clone)]
pub struct HandleStore {
    instance: InstanceConfig,
    temp_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl HandleStore {
    pub fn new(instance: &InstanceConfig) -> Self {
        Self {
            instance: instance.clone(),
            temp_dir: None,
            timeout: None,
        }
    }

    /// Place rendezvous files in `temp_dir` instead of the system temp directory
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    /// Timeout used by the liveness probe in `load`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Compute the rendezvous path from the current environment
    pub fn rendezvous_path(&self) -> PathBuf {
        let locator = match &self.temp_dir {
            Some(dir) => RendezvousLocator::from_env_in(&self.instance, dir),
            None => RendezvousLocator::from_env(&self.instance),
        };
        locator.locate()
    }

    /// Write `handle` to the rendezvous path
    ///
    /// The returned guard deletes the file when dropped, unless another
    /// instance has replaced it in the meantime.
    pub fn publish(&self, handle: &ContactHandle) -> Result<PublishedHandle, HandleError> {
        let path = self.rendezvous_path();
        debug!(?path, "HandleStore::publish: called");

        let bytes = serde_json::to_vec(handle).map_err(|e| HandleError::Write {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;

        write_private(&path, &bytes).map_err(|source| HandleError::Write {
            path: path.clone(),
            source,
        })?;

        if let Err(e) = tighten_permissions(&path) {
            warn!(?path, error = %e, "Failed to tighten permissions of contact handle, publishing anyway");
        }

        info!(?path, socket = ?handle.socket, "Published contact handle");
        Ok(PublishedHandle {
            path,
            token: handle.token.clone(),
        })
    }

    /// Deserialize the handle at `path` without contacting the instance
    pub fn read(&self, path: &Path) -> Result<ContactHandle, HandleError> {
        debug!(?path, "HandleStore::read: called");
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HandleError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(HandleError::Corrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let handle: ContactHandle = serde_json::from_slice(&bytes).map_err(|e| HandleError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        handle.validate().map_err(|reason| HandleError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })?;

        Ok(handle)
    }

    /// Deserialize the handle at `path` and check that its instance answers
    pub async fn load(&self, path: &Path) -> Result<ContactHandle, HandleError> {
        let handle = self.read(path)?;
        let peer = self.probe(path, &handle).await?;
        debug!(?path, pid = peer.pid, version = %peer.version, "HandleStore::load: instance is alive");
        Ok(handle)
    }

    async fn probe(&self, path: &Path, handle: &ContactHandle) -> Result<PeerInfo, HandleError> {
        handle
            .client(self.timeout)
            .ping()
            .await
            .map_err(|source| HandleError::StaleReference {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Delete the rendezvous file; a missing file is not an error
    pub fn invalidate(&self, path: &Path) {
        invalidate(path);
    }
}

/// Delete a rendezvous file, ignoring a missing file
pub fn invalidate(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(?path, "invalidate: removed contact handle"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "invalidate: file already gone");
        }
        Err(e) => warn!(?path, error = %e, "Failed to remove contact handle"),
    }
}

/// A published handle; removes its rendezvous file on drop
#[derive(Debug)]
pub struct PublishedHandle {
    path: PathBuf,
    token: String,
}

impl PublishedHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the rendezvous file still holds this handle
    pub fn is_current(&self) -> bool {
        fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<ContactHandle>(&bytes).ok())
            .is_some_and(|handle| handle.token == self.token)
    }
}

impl Drop for PublishedHandle {
    fn drop(&mut self) {
        if self.is_current() {
            debug!(path = ?self.path, "PublishedHandle::drop: removing rendezvous file");
            invalidate(&self.path);
        } else {
            debug!(path = ?self.path, "PublishedHandle::drop: file replaced by another instance, leaving it");
        }
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}

/// Restrict the file to owner read/write
fn tighten_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> HandleStore {
        HandleStore::new(&InstanceConfig::default()).with_temp_dir(temp.path())
    }

    #[test]
    fn test_generate_token_is_hex_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_redacts_token() {
        let handle = ContactHandle::new("/tmp/app.sock", 1, "v1");
        let debug = format!("{:?}", handle);
        assert!(!debug.contains(&handle.token));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_publish_then_read() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let handle = ContactHandle::new(temp.path().join("app.sock"), 1234, "v1");

        let published = store.publish(&handle).unwrap();
        assert_eq!(published.path(), store.rendezvous_path());
        assert!(published.path().starts_with(temp.path()));

        let read = store.read(published.path()).unwrap();
        assert_eq!(read, handle);
    }

    #[cfg(unix)]
    #[test]
    fn test_publish_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let path = store.rendezvous_path();

        // A pre-existing world-readable file gets tightened
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let published = store.publish(&ContactHandle::new("/tmp/app.sock", 1, "v1")).unwrap();
        let mode = fs::metadata(published.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let result = store.read(&store.rendezvous_path());
        assert!(matches!(result, Err(HandleError::NotFound { .. })));
    }

    #[test]
    fn test_read_garbage_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let path = store.rendezvous_path();
        fs::write(&path, b"\xac\xed\x00\x05sr\x00").unwrap();

        let err = store.read(&path).unwrap_err();
        assert!(matches!(err, HandleError::Corrupt { .. }));
        assert!(err.is_stale());
    }

    #[test]
    fn test_read_truncated_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let path = store.rendezvous_path();
        let json = serde_json::to_string(&ContactHandle::new("/tmp/app.sock", 1, "v1")).unwrap();
        fs::write(&path, &json[..json.len() / 2]).unwrap();

        assert!(matches!(store.read(&path), Err(HandleError::Corrupt { .. })));
    }

    #[test]
    fn test_read_bad_token_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let path = store.rendezvous_path();
        fs::write(
            &path,
            r#"{"socket":"/tmp/app.sock","token":"guessable","pid":1,"version":"v1"}"#,
        )
        .unwrap();

        assert!(matches!(store.read(&path), Err(HandleError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_load_dead_instance_is_stale() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let handle = ContactHandle::new(temp.path().join("gone.sock"), 1, "v1");
        let published = store.publish(&handle).unwrap();

        let err = store.load(published.path()).await.unwrap_err();
        assert!(matches!(err, HandleError::StaleReference { .. }));
        assert!(err.is_stale());
    }

    #[test]
    fn test_refused_is_not_stale() {
        let err = HandleError::Refused {
            path: PathBuf::from("/tmp/app.stub"),
            source: EndpointError::TooLarge { limit: 1 },
        };
        assert!(!err.is_stale());
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let path = store.rendezvous_path();
        fs::write(&path, "x").unwrap();

        store.invalidate(&path);
        assert!(!path.exists());
        store.invalidate(&path);
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_own_file() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let published = store.publish(&ContactHandle::new("/tmp/app.sock", 1, "v1")).unwrap();
        let path = published.path().to_path_buf();
        assert!(path.exists());

        drop(published);
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_keeps_file_of_newer_instance() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let first = store.publish(&ContactHandle::new("/tmp/a.sock", 1, "v1")).unwrap();
        let second = store.publish(&ContactHandle::new("/tmp/b.sock", 2, "v1")).unwrap();
        let path = second.path().to_path_buf();

        assert!(!first.is_current());
        assert!(second.is_current());

        drop(first);
        assert!(path.exists());

        std::mem::forget(second);
        invalidate(&path);
    }
}
