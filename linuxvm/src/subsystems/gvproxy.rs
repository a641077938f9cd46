//! gvproxy user-mode network stack.
//!
//! gvproxy (gvisor-tap-vsock) provides NAT, DHCP and DNS for the guest
//! without root. It binds both workspace endpoints itself:
//! - control: `unix://<workspace>/gvproxy-control.sock` (HTTP API)
//! - data: `unixgram://<workspace>/vfkit-network-backend.sock` (virtio-net frames)

use super::{NetworkStack, forward_stderr};
use crate::config::VmConfig;
use crate::error::{LinuxvmError, LinuxvmResult};
use crate::supervisor::CancelScope;
use crate::util::{TERMINATE_GRACE, terminate};
use crate::workspace::{Endpoint, SocketKind};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub struct GvproxyNetwork {
    binary: PathBuf,
    grace: Duration,
}

impl GvproxyNetwork {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            grace: TERMINATE_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn command(&self, control: &Endpoint, data: &Endpoint) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--listen")
            .arg(control.to_uri())
            .arg("--listen-vfkit")
            .arg(data.to_uri())
            // Don't forward SSH by default
            .arg("--ssh-port")
            .arg("-1");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Parse and check the endpoint kinds gvproxy expects.
fn endpoints(config: &VmConfig) -> LinuxvmResult<(Endpoint, Endpoint)> {
    let control = Endpoint::parse(&config.gvproxy_endpoint)
        .filter(|ep| ep.kind == SocketKind::Stream)
        .ok_or_else(|| {
            LinuxvmError::Network(format!(
                "invalid control endpoint '{}'",
                config.gvproxy_endpoint
            ))
        })?;
    let data = Endpoint::parse(&config.network_stack_backend)
        .filter(|ep| ep.kind == SocketKind::Datagram)
        .ok_or_else(|| {
            LinuxvmError::Network(format!(
                "invalid data endpoint '{}'",
                config.network_stack_backend
            ))
        })?;
    Ok((control, data))
}

#[async_trait]
impl NetworkStack for GvproxyNetwork {
    async fn start(&self, scope: CancelScope, config: VmConfig) -> LinuxvmResult<()> {
        let (control, data) = endpoints(&config)?;

        // Stale sockets make gvproxy fail with EADDRINUSE
        let _ = std::fs::remove_file(&control.path);
        let _ = std::fs::remove_file(&data.path);

        let mut child = self.command(&control, &data).spawn().map_err(|e| {
            LinuxvmError::Network(format!(
                "failed to spawn gvproxy at {}: {}",
                self.binary.display(),
                e
            ))
        })?;
        forward_stderr(&mut child, "gvproxy");

        tracing::info!(
            binary = %self.binary.display(),
            pid = ?child.id(),
            control = %control,
            data = %data,
            "gvproxy started"
        );

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = scope.cancelled() => None,
        };

        match exited {
            Some(status) => {
                let status = status?;
                Err(LinuxvmError::Network(format!(
                    "gvproxy exited unexpectedly: {}",
                    status
                )))
            }
            None => {
                let status = terminate(&mut child, "gvproxy", self.grace).await?;
                tracing::info!(%status, "gvproxy stopped");
                Ok(())
            }
        }
    }
}
