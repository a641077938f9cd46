//! Task: allocate the ephemeral workspace and inject its endpoints.

use super::{InitCtx, task_start};
use crate::error::LinuxvmResult;
use crate::pipeline::PipelineTask;
use crate::workspace::Workspace;
use async_trait::async_trait;

pub struct WorkspaceTask;

#[async_trait]
impl PipelineTask<InitCtx> for WorkspaceTask {
    async fn run(self: Box<Self>, ctx: InitCtx) -> LinuxvmResult<()> {
        let task_name = self.name();
        let run_id = task_start(&ctx, task_name).await;

        let mut ctx = ctx.lock().await;
        let temp_root = ctx.runtime.temp_root();

        let workspace = Workspace::allocate(&temp_root)?;

        ctx.config.set_endpoints(workspace.endpoints());
        tracing::info!(run_id = %run_id, workspace = %workspace.path().display(), "Workspace ready");
        ctx.workspace = Some(workspace);

        Ok(())
    }

    fn name(&self) -> &str {
        "workspace"
    }
}
