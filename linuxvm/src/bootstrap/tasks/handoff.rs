//! Task: place the bootstrap binary and handoff document in the rootfs.

use super::{InitCtx, task_start};
use crate::error::{LinuxvmError, LinuxvmResult};
use crate::handoff::write_handoff;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;

pub struct HandoffTask;

#[async_trait]
impl PipelineTask<InitCtx> for HandoffTask {
    async fn run(self: Box<Self>, ctx: InitCtx) -> LinuxvmResult<()> {
        let task_name = self.name();
        task_start(&ctx, task_name).await;

        let mut ctx = ctx.lock().await;

        let bootstrap = ctx.runtime.bootstrap_binary().map_err(|e| {
            LinuxvmError::handoff(
                "bootstrap",
                std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
            )
        })?;

        let artifacts = write_handoff(&ctx.config.rootfs, &bootstrap, &ctx.config, &ctx.cmdline)?;

        ctx.artifacts = Some(artifacts);
        Ok(())
    }

    fn name(&self) -> &str {
        "guest_handoff"
    }
}
