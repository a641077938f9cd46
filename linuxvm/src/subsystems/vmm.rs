//! VM runtime backed by the `linuxvm-shim` subprocess.
//!
//! The shim owns the hypervisor context (libkrun): it attaches the rootfs,
//! data disks and shares described by the handoff document, plugs virtio-net
//! into the network stack's data endpoint and enters the guest with the
//! bootstrap binary as entrypoint. Running it out of process keeps the
//! hypervisor's process takeover away from the supervisor.

use super::VmRuntime;
use crate::config::{Cmdline, VmConfig};
use crate::error::{LinuxvmError, LinuxvmResult};
use crate::handoff::HandoffDocument;
use crate::supervisor::CancelScope;
use crate::util::{TERMINATE_GRACE, terminate};
use crate::workspace::Endpoint;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// How long to wait for the network stack to bind the data endpoint.
const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ShimRuntime {
    binary: PathBuf,
    socket_timeout: Duration,
    grace: Duration,
}

impl ShimRuntime {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            grace: TERMINATE_GRACE,
        }
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    fn command(&self, spec_json: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--config").arg(spec_json);

        // Pass RUST_LOG to subprocess if set
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            cmd.env("RUST_LOG", rust_log);
        }

        // The guest console is the user's terminal
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

/// Poll until `path` exists. Returns false if the scope was cancelled first.
async fn wait_for_socket(path: &Path, timeout: Duration, scope: &CancelScope) -> LinuxvmResult<bool> {
    let start = Instant::now();
    loop {
        if path.exists() {
            tracing::debug!(
                socket = %path.display(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Network backend socket ready"
            );
            return Ok(true);
        }
        if start.elapsed() >= timeout {
            return Err(LinuxvmError::Engine(format!(
                "network backend socket {} did not appear within {:?}",
                path.display(),
                timeout
            )));
        }
        tokio::select! {
            _ = tokio::time::sleep(SOCKET_POLL_INTERVAL) => {}
            _ = scope.cancelled() => return Ok(false),
        }
    }
}

#[async_trait]
impl VmRuntime for ShimRuntime {
    async fn start(&self, scope: CancelScope, config: VmConfig, cmdline: Cmdline) -> LinuxvmResult<()> {
        let data = Endpoint::parse(&config.network_stack_backend).ok_or_else(|| {
            LinuxvmError::Engine(format!(
                "invalid network backend '{}'",
                config.network_stack_backend
            ))
        })?;

        if !wait_for_socket(&data.path, self.socket_timeout, &scope).await? {
            tracing::info!("Cancelled before VM start");
            return Ok(());
        }

        let spec = serde_json::to_string(&HandoffDocument { config, cmdline })?;
        let mut child = self.command(&spec).spawn().map_err(|e| {
            let err_msg = format!(
                "Failed to spawn VM subprocess at {}: {}",
                self.binary.display(),
                e
            );
            tracing::error!("{}", err_msg);
            LinuxvmError::Engine(err_msg)
        })?;

        tracing::info!(binary = %self.binary.display(), pid = ?child.id(), "VM started");

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = scope.cancelled() => None,
        };

        match exited {
            Some(status) => {
                let status = status?;
                if status.success() {
                    tracing::info!("VM exited");
                    Ok(())
                } else {
                    Err(LinuxvmError::Engine(format!("VM exited with {}", status)))
                }
            }
            None => {
                let status = terminate(&mut child, "linuxvm-shim", self.grace).await?;
                tracing::info!(%status, "VM stopped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::find_binary;

    fn fixture(dir: &Path) -> (VmConfig, Cmdline) {
        let config = VmConfig {
            memory_in_mb: 512,
            cpus: 1,
            rootfs: dir.join("rootfs"),
            data_disk: vec![],
            mounts: vec![],
            gvproxy_endpoint: format!("unix://{}/ctl.sock", dir.display()),
            network_stack_backend: format!("unixgram://{}/net.sock", dir.display()),
            ignition_endpoint: format!("unix://{}/ign.sock", dir.display()),
        };
        let cmdline = Cmdline {
            workspace: "/".into(),
            target_bin: "/bootstrap".into(),
            target_bin_args: vec!["sh".into()],
            env: vec![],
        };
        (config, cmdline)
    }

    #[tokio::test]
    async fn test_clean_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("net.sock"), b"").unwrap();
        let (config, cmdline) = fixture(dir.path());

        let vm = ShimRuntime::new(find_binary("true").unwrap());
        vm.start(CancelScope::new(), config, cmdline).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_exit_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("net.sock"), b"").unwrap();
        let (config, cmdline) = fixture(dir.path());

        let vm = ShimRuntime::new(find_binary("false").unwrap());
        let err = vm.start(CancelScope::new(), config, cmdline).await.unwrap_err();
        assert!(matches!(err, LinuxvmError::Engine(_)));
    }

    #[tokio::test]
    async fn test_missing_backend_socket_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (config, cmdline) = fixture(dir.path());

        let vm = ShimRuntime::new(find_binary("true").unwrap())
            .with_socket_timeout(Duration::from_millis(100));
        let err = vm.start(CancelScope::new(), config, cmdline).await.unwrap_err();
        assert!(matches!(err, LinuxvmError::Engine(ref m) if m.contains("did not appear")));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_socket() {
        let dir = tempfile::tempdir().unwrap();
        let (config, cmdline) = fixture(dir.path());
        let scope = CancelScope::new();
        scope.cancel();

        let vm = ShimRuntime::new(find_binary("false").unwrap());
        tokio::time::timeout(Duration::from_secs(1), vm.start(scope, config, cmdline))
            .await
            .unwrap()
            .unwrap();
    }
}
