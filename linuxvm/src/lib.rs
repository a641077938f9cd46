//! linuxvm: boot a lightweight Linux VM behind a user-mode network stack.
//!
//! A run validates the user's input, raises the descriptor limit, allocates
//! an ephemeral workspace for the control-plane sockets, writes the guest
//! handoff into the rootfs and then supervises three subsystems until one
//! fails or the VM exits:
//!
//! - the gvproxy network stack
//! - the configuration server
//! - the VM runtime
//!
//! See [`Orchestrator`] for the entry point.

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod error;
pub mod handoff;
pub mod pipeline;
pub mod subsystems;
pub mod supervisor;
pub mod util;
pub mod workspace;

pub use bootstrap::{Orchestrator, RunReport};
pub use config::{Cmdline, LimitPolicy, LoggingOptions, MountSpec, RuntimeOptions, VmConfig, VmOptions};
pub use error::{LinuxvmError, LinuxvmResult};
pub use subsystems::Collaborators;
pub use supervisor::CancelScope;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const DEFAULT_LOG_FILTER: &str = "info";

/// Install the global tracing subscriber.
///
/// Logs go to stderr, and additionally to a daily-rotated file when
/// `options.log_dir` is set. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init_logging(options: &LoggingOptions) -> LinuxvmResult<Option<WorkerGuard>> {
    let default_filter = options
        .default_filter
        .as_deref()
        .unwrap_or(DEFAULT_LOG_FILTER);
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "linuxvm.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LinuxvmError::Internal(format!("failed to install logger: {}", e)))?;

    Ok(guard)
}
