//! Concurrent supervision of the long-lived subsystems.
//!
//! ```text
//! Idle ──dispatch all──→ Running ──all joined, none failed──→ Completed
//!                           │
//!                           └──all joined, ≥1 failed──→ Failed (first error)
//! ```
//!
//! The first failure cancels the shared [`CancelScope`]. The supervisor then
//! keeps waiting until every subsystem has returned, so no task outlives
//! [`Supervisor::run`].

mod scope;

pub use scope::CancelScope;

use crate::error::{LinuxvmError, LinuxvmResult};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::time::Instant;
use tracing::Instrument;

/// A long-running unit of work under supervision.
#[async_trait]
pub trait Subsystem: Send {
    /// Stable name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether a successful return ends the whole run.
    ///
    /// Used for the VM runtime: the guest exiting cleanly means the
    /// operation is complete and the remaining subsystems should stop.
    fn ends_scope(&self) -> bool {
        false
    }

    /// Run until done, failed, or `scope` is cancelled.
    ///
    /// Implementations must return promptly after cancellation.
    async fn run(self: Box<Self>, scope: CancelScope) -> LinuxvmResult<()>;
}

pub type BoxedSubsystem = Box<dyn Subsystem>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// How one subsystem ended.
#[derive(Debug, Clone)]
pub struct SubsystemExit {
    pub name: String,
    pub duration_ms: u128,
    pub ok: bool,
}

#[derive(Debug, Clone)]
pub struct SupervisorReport {
    pub state: SupervisorState,
    /// Exits in the order the supervisor observed them.
    pub exits: Vec<SubsystemExit>,
}

pub struct Supervisor {
    scope: CancelScope,
    subsystems: Vec<BoxedSubsystem>,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(scope: CancelScope) -> Self {
        Self {
            scope,
            subsystems: Vec::new(),
            state: SupervisorState::Idle,
        }
    }

    pub fn with(mut self, subsystem: BoxedSubsystem) -> Self {
        self.subsystems.push(subsystem);
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Dispatch every subsystem, then wait for all of them to terminate.
    ///
    /// Returns the first observed failure wrapped as
    /// [`LinuxvmError::Subsystem`], or a report when none failed. The
    /// terminal state stays readable through [`Supervisor::state`].
    pub async fn run(&mut self) -> LinuxvmResult<SupervisorReport> {
        if self.subsystems.is_empty() {
            return Err(LinuxvmError::Internal("no subsystems to supervise".into()));
        }

        let mut running = FuturesUnordered::new();
        for subsystem in std::mem::take(&mut self.subsystems) {
            let name = subsystem.name().to_string();
            let ends_scope = subsystem.ends_scope();
            let scope = self.scope.clone();
            let span = tracing::info_span!("subsystem", name = %name);

            let started = Instant::now();
            let handle = tokio::spawn(subsystem.run(scope).instrument(span));
            running.push(async move { (name, ends_scope, started, handle.await) });
        }

        self.state = SupervisorState::Running;
        tracing::info!(subsystems = running.len(), "All subsystems dispatched");

        let mut first_error: Option<LinuxvmError> = None;
        let mut exits = Vec::with_capacity(running.len());

        while let Some((name, ends_scope, started, joined)) = running.next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(LinuxvmError::Internal(format!("task did not complete: {}", e)))
            });
            let duration_ms = started.elapsed().as_millis();

            match result {
                Ok(()) => {
                    tracing::info!(subsystem = %name, duration_ms = duration_ms as u64, "Subsystem exited");
                    if ends_scope && !self.scope.is_cancelled() {
                        tracing::info!(subsystem = %name, "Run complete, stopping remaining subsystems");
                        self.scope.cancel();
                    }
                    exits.push(SubsystemExit {
                        name,
                        duration_ms,
                        ok: true,
                    });
                }
                Err(e) => {
                    exits.push(SubsystemExit {
                        name: name.clone(),
                        duration_ms,
                        ok: false,
                    });
                    if first_error.is_none() {
                        tracing::error!(subsystem = %name, error = %e, "Subsystem failed, cancelling siblings");
                        self.scope.cancel();
                        first_error = Some(LinuxvmError::Subsystem {
                            name,
                            source: Box::new(e),
                        });
                    } else {
                        tracing::warn!(subsystem = %name, error = %e, "Additional subsystem failure");
                    }
                }
            }
        }

        match first_error {
            Some(e) => {
                self.state = SupervisorState::Failed;
                Err(e)
            }
            None => {
                self.state = SupervisorState::Completed;
                Ok(SupervisorReport {
                    state: self.state,
                    exits,
                })
            }
        }
    }
}
