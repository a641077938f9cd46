//! Host-side runtime options (binaries, temp space, policies).

use crate::constants::binaries;
use crate::error::LinuxvmResult;
use crate::util::find_binary;
use std::path::PathBuf;

/// What to do when the descriptor limit cannot be raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitPolicy {
    /// Abort the run before any subsystem starts.
    #[default]
    Strict,
    /// Log a warning and continue with the current limit.
    BestEffort,
}

/// Where host binaries and ephemeral state live.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// gvproxy binary. Resolved with `find_binary` when unset.
    pub gvproxy_path: Option<PathBuf>,
    /// VM runtime shim binary. Resolved with `find_binary` when unset.
    pub shim_path: Option<PathBuf>,
    /// Bootstrap binary copied into the guest rootfs.
    pub bootstrap_path: Option<PathBuf>,
    /// Parent directory for the workspace. Defaults to the system temp dir.
    pub temp_root: Option<PathBuf>,
    /// Leave the workspace on disk after the run.
    pub keep_workspace: bool,
    pub limit_policy: LimitPolicy,
}

impl RuntimeOptions {
    pub fn gvproxy_binary(&self) -> LinuxvmResult<PathBuf> {
        resolve(&self.gvproxy_path, binaries::GVPROXY)
    }

    pub fn shim_binary(&self) -> LinuxvmResult<PathBuf> {
        resolve(&self.shim_path, binaries::SHIM)
    }

    pub fn bootstrap_binary(&self) -> LinuxvmResult<PathBuf> {
        resolve(&self.bootstrap_path, binaries::BOOTSTRAP)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn resolve(explicit: &Option<PathBuf>, name: &str) -> LinuxvmResult<PathBuf> {
    match explicit {
        Some(path) => Ok(path.clone()),
        None => find_binary(name),
    }
}

/// Logging sinks.
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Directory for daily-rotated log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_paths_win() {
        let options = RuntimeOptions {
            gvproxy_path: Some("/opt/gvproxy".into()),
            temp_root: Some("/scratch".into()),
            ..Default::default()
        };
        assert_eq!(options.gvproxy_binary().unwrap(), PathBuf::from("/opt/gvproxy"));
        assert_eq!(options.temp_root(), PathBuf::from("/scratch"));
        assert_eq!(options.limit_policy, LimitPolicy::Strict);
    }

    #[test]
    fn test_temp_root_defaults_to_system_temp() {
        assert_eq!(RuntimeOptions::default().temp_root(), std::env::temp_dir());
    }
}
