//! Host utilities.

mod process;
mod rlimit;

pub use process::{TERMINATE_GRACE, is_process_alive, terminate};
pub use rlimit::{LimitRaiser, NofileLimit, raise_nofile_limit};

use crate::error::{LinuxvmError, LinuxvmResult};
use std::path::{Path, PathBuf};

/// Locate a helper binary.
///
/// Looks next to the current executable first (bundled installs), then in
/// every `PATH` entry.
pub fn find_binary(name: &str) -> LinuxvmResult<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    let path_dirs = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect::<Vec<_>>())
        .unwrap_or_default();

    exe_dir
        .into_iter()
        .chain(path_dirs)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| {
            LinuxvmError::MissingBinary(format!(
                "'{}' is not next to the executable or in PATH",
                name
            ))
        })
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
