//! Shared context for the preparation pipeline.

use crate::config::{Cmdline, RuntimeOptions, VmConfig};
use crate::handoff::HandoffArtifacts;
use crate::util::{LimitRaiser, NofileLimit, raise_nofile_limit};
use crate::workspace::Workspace;
use ulid::Ulid;

/// Inputs and outputs threaded through the preparation tasks.
///
/// `config` is mutable only while the pipeline runs; the orchestrator
/// freezes it behind an `Arc` before any subsystem starts.
pub struct BootstrapContext {
    pub run_id: Ulid,
    pub runtime: RuntimeOptions,
    pub config: VmConfig,
    pub cmdline: Cmdline,
    pub raise_limits: LimitRaiser,
    pub nofile: Option<NofileLimit>,
    pub workspace: Option<Workspace>,
    pub artifacts: Option<HandoffArtifacts>,
}

impl BootstrapContext {
    pub fn new(run_id: Ulid, runtime: RuntimeOptions, config: VmConfig, cmdline: Cmdline) -> Self {
        Self {
            run_id,
            runtime,
            config,
            cmdline,
            raise_limits: raise_nofile_limit,
            nofile: None,
            workspace: None,
            artifacts: None,
        }
    }
}
