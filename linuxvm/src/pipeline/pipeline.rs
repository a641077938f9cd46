//! Pipeline executor.

use super::metrics::{PipelineMetrics, TaskMetrics};
use super::task::BoxedTask;
use crate::error::LinuxvmResult;
use std::time::Instant;

pub struct ExecutionPlan<Ctx> {
    tasks: Vec<BoxedTask<Ctx>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Pipeline executor framework.
///
/// Runs each task of a plan to completion, in order. The actual work lives
/// in the task implementations.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute a plan.
    ///
    /// Stops at the first failing task; later tasks never run.
    pub async fn execute<Ctx>(plan: ExecutionPlan<Ctx>, ctx: Ctx) -> LinuxvmResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut task_metrics = Vec::with_capacity(plan.len());

        for task in plan.tasks {
            let name = task.name().to_string();
            let task_start = Instant::now();
            tracing::debug!(task = %name, "Task started");

            task.run(ctx.clone()).await.inspect_err(|e| {
                tracing::debug!(task = %name, error = %e, "Task failed");
            })?;

            task_metrics.push(TaskMetrics {
                name,
                duration_ms: task_start.elapsed().as_millis(),
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            tasks: task_metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinuxvmError;
    use crate::pipeline::PipelineTask;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct Record(&'static str);
    struct Fail;

    #[async_trait]
    impl PipelineTask<Log> for Record {
        async fn run(self: Box<Self>, ctx: Log) -> LinuxvmResult<()> {
            ctx.lock().unwrap().push(self.0);
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    #[async_trait]
    impl PipelineTask<Log> for Fail {
        async fn run(self: Box<Self>, _ctx: Log) -> LinuxvmResult<()> {
            Err(LinuxvmError::Internal("fail".into()))
        }

        fn name(&self) -> &str {
            "fail"
        }
    }

    #[tokio::test]
    async fn test_runs_in_order_with_metrics() {
        let log = Log::default();
        let plan = ExecutionPlan::new(vec![
            Box::new(Record("a")),
            Box::new(Record("b")),
            Box::new(Record("c")),
        ]);

        let metrics = PipelineExecutor::execute(plan, Arc::clone(&log)).await.unwrap();

        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
        assert_eq!(metrics.task_names(), ["a", "b", "c"]);
        assert!(metrics.task_duration_ms("b").is_some());
        assert!(metrics.task_duration_ms("missing").is_none());
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let log = Log::default();
        let plan = ExecutionPlan::new(vec![
            Box::new(Record("a")),
            Box::new(Fail),
            Box::new(Record("never")),
        ]);

        let err = PipelineExecutor::execute(plan, Arc::clone(&log)).await.unwrap_err();

        assert!(matches!(err, LinuxvmError::Internal(_)));
        assert_eq!(*log.lock().unwrap(), ["a"]);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_is_left_to_the_caller_to_report() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let plan = ExecutionPlan::new(vec![Box::new(Fail) as BoxedTask<Log>]);
        PipelineExecutor::execute(plan, Log::default()).await.unwrap_err();

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Task failed"));
        assert!(!output.contains("ERROR"));
    }
}
