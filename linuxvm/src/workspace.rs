//! Ephemeral workspace and control-plane endpoint addresses.
//!
//! Each run gets a fresh, process-private directory under the temp root.
//! All socket endpoints live inside it, so two runs never share an address.

use crate::constants::endpoints;
use crate::error::{LinuxvmError, LinuxvmResult};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Longest path accepted in `sockaddr_un.sun_path` (macOS is the tightest).
const MAX_SOCKET_PATH: usize = 103;

/// Socket flavour of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// `SOCK_STREAM`, rendered as `unix://`.
    Stream,
    /// `SOCK_DGRAM`, rendered as `unixgram://`.
    Datagram,
}

impl SocketKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            SocketKind::Stream => "unix",
            SocketKind::Datagram => "unixgram",
        }
    }
}

/// A unix socket address inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub kind: SocketKind,
    pub path: PathBuf,
}

impl Endpoint {
    pub fn stream(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: SocketKind::Stream,
            path: path.into(),
        }
    }

    pub fn datagram(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: SocketKind::Datagram,
            path: path.into(),
        }
    }

    pub fn to_uri(&self) -> String {
        format!("{}://{}", self.kind.scheme(), self.path.display())
    }

    /// Parse a `unix://` or `unixgram://` address.
    pub fn parse(uri: &str) -> Option<Self> {
        let (scheme, path) = uri.split_once("://")?;
        let kind = match scheme {
            "unix" => SocketKind::Stream,
            "unixgram" => SocketKind::Datagram,
            _ => return None,
        };
        if path.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            path: PathBuf::from(path),
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

/// Endpoints derived from one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceEndpoints {
    /// Network stack control protocol.
    pub control: Endpoint,
    /// VM-to-host network data plane.
    pub data: Endpoint,
    /// Configuration server.
    pub ignition: Endpoint,
}

/// Ephemeral directory owning the run's socket files.
///
/// Removed on drop unless [`Workspace::keep`] was called.
pub struct Workspace {
    path: PathBuf,
    dir: Option<TempDir>,
    endpoints: WorkspaceEndpoints,
}

impl Workspace {
    /// Create a uniquely named directory under `temp_root` and derive the
    /// endpoint addresses inside it.
    pub fn allocate(temp_root: &Path) -> LinuxvmResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(endpoints::WORKSPACE_PREFIX)
            .tempdir_in(temp_root)
            .map_err(|e| {
                LinuxvmError::Workspace(format!(
                    "cannot create directory under {}: {}",
                    temp_root.display(),
                    e
                ))
            })?;

        let path = dir.path().to_path_buf();
        let endpoints = WorkspaceEndpoints {
            control: Endpoint::stream(path.join(endpoints::CONTROL_SOCKET)),
            data: Endpoint::datagram(path.join(endpoints::DATA_SOCKET)),
            ignition: Endpoint::stream(path.join(endpoints::IGNITION_SOCKET)),
        };

        for endpoint in [&endpoints.control, &endpoints.data, &endpoints.ignition] {
            let len = endpoint.path.as_os_str().len();
            if len > MAX_SOCKET_PATH {
                return Err(LinuxvmError::Workspace(format!(
                    "socket path {} is {} bytes, limit is {}; use a shorter temp root",
                    endpoint.path.display(),
                    len,
                    MAX_SOCKET_PATH
                )));
            }
        }

        tracing::debug!(workspace = %path.display(), "Allocated workspace");

        Ok(Self {
            path,
            dir: Some(dir),
            endpoints,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn endpoints(&self) -> &WorkspaceEndpoints {
        &self.endpoints
    }

    /// Leave the directory on disk when this value is dropped.
    pub fn keep(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.keep();
            tracing::info!(workspace = %path.display(), "Workspace will be kept");
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take()
            && let Err(e) = dir.close()
        {
            tracing::warn!(workspace = %self.path.display(), "Failed to remove workspace: {}", e);
        }
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("path", &self.path)
            .field("kept", &self.dir.is_none())
            .finish()
    }
}
