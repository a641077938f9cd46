//! Run orchestration.
//!
//! ## Architecture
//!
//! ```text
//! build_configuration        (validate input, no I/O)
//!   │
//!   ├─ 1. RaiseLimits        ┐
//!   ├─ 2. Workspace          │ sequential pipeline, first error aborts
//!   ├─ 3. GuestHandoff       ┘
//!   │
//!   └─ Supervisor ─┬─ network        ┐
//!                  ├─ config-server  │ concurrent, one cancel scope
//!                  └─ vm             ┘
//! ```
//!
//! The configuration is frozen behind an `Arc` between the pipeline and the
//! supervisor. The workspace is released after the supervisor has joined
//! every subsystem, on success and failure alike.

mod tasks;
mod types;

use crate::config::{RuntimeOptions, VmOptions, build_configuration, host_cpu_limit};
use crate::error::{LinuxvmError, LinuxvmResult};
use crate::handoff::HandoffArtifacts;
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineExecutor, PipelineMetrics};
use crate::subsystems::Collaborators;
use crate::supervisor::{CancelScope, Supervisor, SupervisorReport};
use crate::util::{LimitRaiser, NofileLimit, raise_nofile_limit};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Instrument;
use ulid::Ulid;

use tasks::{HandoffTask, InitCtx, RaiseLimitsTask, WorkspaceTask};
use types::BootstrapContext;

fn execution_plan() -> ExecutionPlan<InitCtx> {
    let tasks: Vec<BoxedTask<InitCtx>> = vec![
        Box::new(RaiseLimitsTask),
        Box::new(WorkspaceTask),
        Box::new(HandoffTask),
    ];
    ExecutionPlan::new(tasks)
}

/// Outcome of a run where no subsystem failed.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Ulid,
    pub workspace: PathBuf,
    pub handoff: HandoffArtifacts,
    /// `None` when the raise failed under [`LimitPolicy::BestEffort`].
    ///
    /// [`LimitPolicy::BestEffort`]: crate::config::LimitPolicy::BestEffort
    pub nofile: Option<NofileLimit>,
    pub pipeline: PipelineMetrics,
    pub supervisor: SupervisorReport,
}

/// Drives one VM run from user input to the end of supervision.
///
/// # Example
///
/// ```ignore
/// let orchestrator = Orchestrator::from_runtime(runtime_options);
/// let report = orchestrator.run(vm_options, CancelScope::new()).await?;
/// ```
pub struct Orchestrator {
    runtime: RuntimeOptions,
    /// `None` resolves the default collaborators once the input is valid.
    collaborators: Option<Collaborators>,
    host_cpus: usize,
    raise_limits: LimitRaiser,
}

impl Orchestrator {
    pub fn new(runtime: RuntimeOptions, collaborators: Collaborators) -> Self {
        Self {
            runtime,
            collaborators: Some(collaborators),
            host_cpus: host_cpu_limit(),
            raise_limits: raise_nofile_limit,
        }
    }

    /// Use the subprocess-backed collaborators from [`Collaborators::from_options`].
    ///
    /// Helper binaries are looked up only after the VM options validate.
    pub fn from_runtime(runtime: RuntimeOptions) -> Self {
        Self {
            runtime,
            collaborators: None,
            host_cpus: host_cpu_limit(),
            raise_limits: raise_nofile_limit,
        }
    }

    /// Replace the descriptor limit raise.
    pub fn with_limit_raiser(mut self, raise_limits: LimitRaiser) -> Self {
        self.raise_limits = raise_limits;
        self
    }

    /// Override the detected host core count.
    pub fn with_host_cpus(mut self, host_cpus: usize) -> Self {
        self.host_cpus = host_cpus;
        self
    }

    /// Prepare the host and rootfs, then supervise the subsystems.
    ///
    /// `scope` may be cancelled from outside (e.g. on SIGINT) to stop a
    /// running VM; the run then drains and completes normally.
    pub async fn run(self, options: VmOptions, scope: CancelScope) -> LinuxvmResult<RunReport> {
        let run_id = Ulid::new();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_inner(run_id, options, scope).instrument(span).await
    }

    async fn run_inner(
        self,
        run_id: Ulid,
        options: VmOptions,
        scope: CancelScope,
    ) -> LinuxvmResult<RunReport> {
        let Orchestrator {
            runtime,
            collaborators,
            host_cpus,
            raise_limits,
        } = self;

        let (config, cmdline) = build_configuration(&options, host_cpus)?;
        let collaborators = match collaborators {
            Some(collaborators) => collaborators,
            None => Collaborators::from_options(&runtime)?,
        };
        let keep_workspace = runtime.keep_workspace;

        let mut bootstrap = BootstrapContext::new(run_id, runtime, config, cmdline);
        bootstrap.raise_limits = raise_limits;
        let ctx: InitCtx = Arc::new(Mutex::new(bootstrap));

        let pipeline = PipelineExecutor::execute(execution_plan(), Arc::clone(&ctx)).await?;
        pipeline.log();

        let BootstrapContext {
            config,
            cmdline,
            workspace,
            nofile,
            artifacts,
            ..
        } = Arc::try_unwrap(ctx)
            .map_err(|_| LinuxvmError::Internal("pipeline context still shared".into()))?
            .into_inner();

        let mut workspace = workspace
            .ok_or_else(|| LinuxvmError::Internal("workspace task did not run".into()))?;
        let handoff = artifacts
            .ok_or_else(|| LinuxvmError::Internal("handoff task did not run".into()))?;
        tracing::debug!(
            document = %handoff.document.display(),
            bootstrap_copied = handoff.bootstrap_copied,
            "Guest handoff in place"
        );
        if keep_workspace {
            workspace.keep();
        }

        config.log_summary(&cmdline);
        let config = Arc::new(config);

        let mut supervisor = Supervisor::new(scope);
        for subsystem in collaborators.into_subsystems(config, cmdline) {
            supervisor = supervisor.with(subsystem);
        }
        let result = supervisor.run().await;
        tracing::debug!(state = ?supervisor.state(), "Supervisor joined");

        let workspace_path = workspace.path().to_path_buf();
        drop(workspace);

        let supervisor = result?;
        tracing::info!(state = ?supervisor.state, "Run finished");

        Ok(RunReport {
            run_id,
            workspace: workspace_path,
            handoff,
            nofile,
            pipeline,
            supervisor,
        })
    }
}
