//! Task trait for pipeline execution.

use crate::error::LinuxvmResult;
use async_trait::async_trait;

/// A single preparation step.
///
/// Tasks run with a shared context, which is cloned per task. Use interior
/// mutability (e.g. `Arc<Mutex<_>>`) to pass outputs to later tasks.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> LinuxvmResult<()>;

    /// Stable name used in logs and metrics.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
