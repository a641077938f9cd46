//! Task: raise the open-file limit.

use super::{InitCtx, task_start};
use crate::config::LimitPolicy;
use crate::error::LinuxvmResult;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;

pub struct RaiseLimitsTask;

#[async_trait]
impl PipelineTask<InitCtx> for RaiseLimitsTask {
    async fn run(self: Box<Self>, ctx: InitCtx) -> LinuxvmResult<()> {
        let task_name = self.name();
        let run_id = task_start(&ctx, task_name).await;

        let (policy, raise_limits) = {
            let ctx = ctx.lock().await;
            (ctx.runtime.limit_policy, ctx.raise_limits)
        };

        match raise_limits() {
            Ok(limit) => {
                ctx.lock().await.nofile = Some(limit);
                Ok(())
            }
            Err(e) if policy == LimitPolicy::BestEffort => {
                tracing::warn!(run_id = %run_id, error = %e, "Continuing with current descriptor limit");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "raise_limits"
    }
}
