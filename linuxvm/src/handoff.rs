//! Guest handoff: everything the guest bootstrap needs, placed in the rootfs
//! before the VM boots.
//!
//! Two artifacts, written in order:
//! 1. the bootstrap binary at [`guest_paths::BOOTSTRAP`]
//! 2. the JSON handoff document at [`guest_paths::VMCONFIG`]
//!
//! Both are replaced atomically (temp file + rename), so the guest never sees
//! a half-written file and repeated runs against one rootfs are safe.

use crate::config::{Cmdline, VmConfig};
use crate::constants::guest_paths;
use crate::error::{LinuxvmError, LinuxvmResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Document read by the guest bootstrap process.
///
/// VM fields are flattened to the top level; the command line sits under
/// `cmdline`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffDocument {
    #[serde(flatten)]
    pub config: VmConfig,
    pub cmdline: Cmdline,
}

impl HandoffDocument {
    pub fn to_bytes(&self) -> LinuxvmResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Host paths of the written artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffArtifacts {
    pub bootstrap: PathBuf,
    pub document: PathBuf,
    /// False when an identical bootstrap binary was already in place.
    pub bootstrap_copied: bool,
}

/// Map an absolute guest path onto the host rootfs directory.
pub fn host_path(rootfs: &Path, guest_path: &str) -> PathBuf {
    rootfs.join(guest_path.trim_start_matches('/'))
}

/// Copy the bootstrap binary and write the handoff document into `rootfs`.
pub fn write_handoff(
    rootfs: &Path,
    bootstrap_src: &Path,
    config: &VmConfig,
    cmdline: &Cmdline,
) -> LinuxvmResult<HandoffArtifacts> {
    ensure_rootfs(rootfs)?;

    if !config.has_endpoints() {
        return Err(LinuxvmError::Internal(
            "handoff requested before endpoints were assigned".into(),
        ));
    }

    let bootstrap = host_path(rootfs, guest_paths::BOOTSTRAP);
    let bootstrap_copied = install_bootstrap(bootstrap_src, &bootstrap)?;

    let document = host_path(rootfs, guest_paths::VMCONFIG);
    let bytes = HandoffDocument {
        config: config.clone(),
        cmdline: cmdline.clone(),
    }
    .to_bytes()?;
    replace_file(&document, &bytes, 0o644)?;

    tracing::info!(
        bootstrap = %bootstrap.display(),
        document = %document.display(),
        bootstrap_copied,
        "Guest handoff written"
    );

    Ok(HandoffArtifacts {
        bootstrap,
        document,
        bootstrap_copied,
    })
}

/// Read back the handoff document from a rootfs.
pub fn read_handoff(rootfs: &Path) -> LinuxvmResult<HandoffDocument> {
    let path = host_path(rootfs, guest_paths::VMCONFIG);
    let bytes = std::fs::read(&path).map_err(|e| LinuxvmError::handoff(&path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn ensure_rootfs(rootfs: &Path) -> LinuxvmResult<()> {
    let meta = std::fs::metadata(rootfs).map_err(|e| LinuxvmError::handoff(rootfs, e))?;
    if !meta.is_dir() {
        return Err(LinuxvmError::handoff(
            rootfs,
            std::io::Error::other("rootfs is not a directory"),
        ));
    }
    if meta.permissions().readonly() {
        return Err(LinuxvmError::handoff(
            rootfs,
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        ));
    }
    Ok(())
}

/// Returns whether the file was (re)written.
fn install_bootstrap(src: &Path, dest: &Path) -> LinuxvmResult<bool> {
    let binary = std::fs::read(src).map_err(|e| LinuxvmError::handoff(src, e))?;

    if let Ok(existing) = std::fs::read(dest)
        && Sha256::digest(&existing) == Sha256::digest(&binary)
    {
        tracing::debug!(dest = %dest.display(), "Bootstrap already up to date");
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| LinuxvmError::handoff(dest, e))?;
        return Ok(false);
    }

    replace_file(dest, &binary, 0o755)?;
    Ok(true)
}

fn replace_file(dest: &Path, contents: &[u8], mode: u32) -> LinuxvmResult<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| LinuxvmError::Internal(format!("{} has no parent", dest.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| LinuxvmError::handoff(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| LinuxvmError::handoff(parent, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| LinuxvmError::handoff(tmp.path(), e))?;
    std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode))
        .map_err(|e| LinuxvmError::handoff(tmp.path(), e))?;
    tmp.persist(dest)
        .map_err(|e| LinuxvmError::handoff(dest, e.error))?;
    Ok(())
}
