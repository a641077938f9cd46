//! Process resource limits.
//!
//! The VM runtime and the network stack open many descriptors (virtio
//! queues, sockets, disk images). Raise `RLIMIT_NOFILE` once, before any of
//! them start.

use crate::constants::defaults::NOFILE_TARGET;
use crate::error::{LinuxvmError, LinuxvmResult};
use nix::sys::resource::{Resource, getrlimit, setrlimit};

/// Soft and hard descriptor limits after the raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NofileLimit {
    pub soft: u64,
    pub hard: u64,
}

/// Signature of [`raise_nofile_limit`], replaceable on the orchestrator.
pub type LimitRaiser = fn() -> LinuxvmResult<NofileLimit>;

/// Raise the soft open-file limit as far as the hard limit allows.
pub fn raise_nofile_limit() -> LinuxvmResult<NofileLimit> {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)
        .map_err(|e| LinuxvmError::ResourceLimit(format!("getrlimit(RLIMIT_NOFILE): {}", e)))?;

    let target = nofile_target(hard);
    if soft >= target {
        tracing::debug!(soft, hard, "RLIMIT_NOFILE already sufficient");
        return Ok(NofileLimit { soft, hard });
    }

    setrlimit(Resource::RLIMIT_NOFILE, target, hard).map_err(|e| {
        LinuxvmError::ResourceLimit(format!(
            "setrlimit(RLIMIT_NOFILE, {}, {}): {}",
            target, hard, e
        ))
    })?;

    tracing::info!(from = soft, to = target, hard, "Raised RLIMIT_NOFILE");
    Ok(NofileLimit { soft: target, hard })
}

/// Soft limit to request for a given hard limit.
///
/// macOS rejects soft limits above `OPEN_MAX` even when the hard limit is
/// unlimited.
fn nofile_target(hard: u64) -> u64 {
    #[cfg(target_os = "macos")]
    let cap = (libc::OPEN_MAX as u64).min(NOFILE_TARGET);
    #[cfg(not(target_os = "macos"))]
    let cap = NOFILE_TARGET;

    hard.min(cap)
}
