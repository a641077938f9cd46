//! Preparation tasks, run strictly in order before any subsystem starts.

mod handoff;
mod rlimit;
mod workspace;

pub use handoff::HandoffTask;
pub use rlimit::RaiseLimitsTask;
pub use workspace::WorkspaceTask;

use super::types::BootstrapContext;
use std::sync::Arc;
use tokio::sync::Mutex;
use ulid::Ulid;

pub type InitCtx = Arc<Mutex<BootstrapContext>>;

async fn task_start(ctx: &InitCtx, task_name: &str) -> Ulid {
    let run_id = ctx.lock().await.run_id;
    tracing::debug!(run_id = %run_id, task = task_name, "Starting task");
    run_id
}
