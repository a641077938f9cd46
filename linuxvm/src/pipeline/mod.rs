//! Ordered, table-driven execution of preparation tasks.
//!
//! ```text
//! ExecutionPlan → Tasks (run in order, sharing one context)
//! ```
//!
//! Every task must finish before the next one starts, and the first error
//! stops the plan. Per-task timing is collected into [`PipelineMetrics`].
//!
//! ## Example
//!
//! ```ignore
//! let plan = ExecutionPlan::new(vec![Box::new(TaskA), Box::new(TaskB)]);
//! let ctx = Arc::new(Mutex::new(Context::default()));
//! let metrics = PipelineExecutor::execute(plan, ctx).await?;
//! println!("pipeline took {}ms", metrics.total_duration_ms);
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod task;

pub use metrics::{PipelineMetrics, TaskMetrics};
pub use pipeline::{ExecutionPlan, PipelineExecutor};
pub use task::{BoxedTask, PipelineTask};
