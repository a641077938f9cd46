//! The three cooperating subsystems of a run.
//!
//! Each collaborator is a trait so the orchestrator can be driven with
//! alternative implementations. The default ones are:
//!
//! - [`GvproxyNetwork`]: user-mode network stack (gvproxy subprocess)
//! - [`IgnitionServer`]: configuration server (HTTP over a unix socket)
//! - [`ShimRuntime`]: VM runtime (shim subprocess driving the hypervisor)
//!
//! Every implementation must honour cancellation of the [`CancelScope`].

mod config_server;
mod gvproxy;
mod vmm;

pub use config_server::IgnitionServer;
pub use gvproxy::GvproxyNetwork;
pub use vmm::ShimRuntime;

use crate::config::{Cmdline, RuntimeOptions, VmConfig};
use crate::error::LinuxvmResult;
use crate::supervisor::{BoxedSubsystem, CancelScope, Subsystem};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;

pub const NETWORK: &str = "network";
pub const CONFIG_SERVER: &str = "config-server";
pub const VM: &str = "vm";

/// User-mode network stack.
#[async_trait]
pub trait NetworkStack: Send + Sync {
    /// Serve the control and data endpoints until cancelled or broken.
    async fn start(&self, scope: CancelScope, config: VmConfig) -> LinuxvmResult<()>;
}

/// Configuration server.
#[async_trait]
pub trait ConfigServer: Send + Sync {
    /// Serve `config` until cancelled or broken.
    async fn serve(&self, scope: CancelScope, config: Arc<VmConfig>) -> LinuxvmResult<()>;
}

/// VM runtime.
#[async_trait]
pub trait VmRuntime: Send + Sync {
    /// Boot the VM and run it until it exits or the scope is cancelled.
    async fn start(&self, scope: CancelScope, config: VmConfig, cmdline: Cmdline) -> LinuxvmResult<()>;
}

/// The set of collaborators started for one run.
#[derive(Clone)]
pub struct Collaborators {
    pub network: Arc<dyn NetworkStack>,
    pub config_server: Arc<dyn ConfigServer>,
    pub vm: Arc<dyn VmRuntime>,
}

impl Collaborators {
    /// Default subprocess-backed collaborators, with binaries resolved from
    /// `options`.
    pub fn from_options(options: &RuntimeOptions) -> LinuxvmResult<Self> {
        Ok(Self {
            network: Arc::new(GvproxyNetwork::new(options.gvproxy_binary()?)),
            config_server: Arc::new(IgnitionServer),
            vm: Arc::new(ShimRuntime::new(options.shim_binary()?)),
        })
    }

    /// Wrap each collaborator as a supervised subsystem bound to the final
    /// configuration.
    pub(crate) fn into_subsystems(self, config: Arc<VmConfig>, cmdline: Cmdline) -> Vec<BoxedSubsystem> {
        vec![
            Box::new(NetworkTask {
                stack: self.network,
                config: Arc::clone(&config),
            }),
            Box::new(ConfigServerTask {
                server: self.config_server,
                config: Arc::clone(&config),
            }),
            Box::new(VmTask {
                runtime: self.vm,
                config,
                cmdline,
            }),
        ]
    }
}

struct NetworkTask {
    stack: Arc<dyn NetworkStack>,
    config: Arc<VmConfig>,
}

#[async_trait]
impl Subsystem for NetworkTask {
    fn name(&self) -> &str {
        NETWORK
    }

    async fn run(self: Box<Self>, scope: CancelScope) -> LinuxvmResult<()> {
        self.stack.start(scope, (*self.config).clone()).await
    }
}

struct ConfigServerTask {
    server: Arc<dyn ConfigServer>,
    config: Arc<VmConfig>,
}

#[async_trait]
impl Subsystem for ConfigServerTask {
    fn name(&self) -> &str {
        CONFIG_SERVER
    }

    async fn run(self: Box<Self>, scope: CancelScope) -> LinuxvmResult<()> {
        self.server.serve(scope, self.config).await
    }
}

struct VmTask {
    runtime: Arc<dyn VmRuntime>,
    config: Arc<VmConfig>,
    cmdline: Cmdline,
}

#[async_trait]
impl Subsystem for VmTask {
    fn name(&self) -> &str {
        VM
    }

    fn ends_scope(&self) -> bool {
        true
    }

    async fn run(self: Box<Self>, scope: CancelScope) -> LinuxvmResult<()> {
        self.runtime
            .start(scope, (*self.config).clone(), self.cmdline)
            .await
    }
}

/// Forward a child's stderr into the log, one line per event.
pub(crate) fn forward_stderr(child: &mut Child, process: &'static str) {
    let Some(stderr) = child.stderr.take() else {
        return;
    };

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(process, "{}", line);
        }
    });
}
