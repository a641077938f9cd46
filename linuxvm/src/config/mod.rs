//! VM configuration model.
//!
//! [`VmOptions`] is the raw user input. [`build_configuration`] validates it
//! and produces the [`VmConfig`] / [`Cmdline`] pair that is later written into
//! the guest root filesystem. Building never touches the filesystem.

mod mount;
mod options;

pub use mount::MountSpec;
pub use options::{LimitPolicy, LoggingOptions, RuntimeOptions};

use crate::constants::{defaults, guest_paths};
use crate::error::{LinuxvmError, LinuxvmResult};
use crate::workspace::WorkspaceEndpoints;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// User input for a single VM run.
#[derive(Debug, Clone, Default)]
pub struct VmOptions {
    pub rootfs: PathBuf,
    /// Number of vCPUs. `None` uses the default of one core.
    pub cpus: Option<u8>,
    /// Guest memory in MiB. `None` uses the default of 512.
    pub memory_mib: Option<u32>,
    /// `KEY=VALUE` entries, passed through unvalidated.
    pub env: Vec<String>,
    /// Data disks, attached in order as `/dev/vda`, `/dev/vdb`, ...
    pub data_disks: Vec<PathBuf>,
    /// `HOST:GUEST[:ro]` share specifications.
    pub mounts: Vec<String>,
    /// Guest command line. The first element is the command name.
    pub command: Vec<String>,
}

/// Authoritative VM description, shared read-only once the run starts.
///
/// Field names are part of the guest handoff contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    pub memory_in_mb: u32,
    pub cpus: u8,
    pub rootfs: PathBuf,
    pub data_disk: Vec<PathBuf>,
    pub mounts: Vec<MountSpec>,
    /// Network stack control endpoint (`unix://...`).
    pub gvproxy_endpoint: String,
    /// Network data plane endpoint (`unixgram://...`).
    pub network_stack_backend: String,
    /// Configuration server endpoint (`unix://...`).
    pub ignition_endpoint: String,
}

/// Process the guest bootstrap runs after boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cmdline {
    pub workspace: String,
    pub target_bin: String,
    pub target_bin_args: Vec<String>,
    pub env: Vec<String>,
}

impl VmConfig {
    /// Inject the endpoint addresses derived from a freshly allocated workspace.
    pub fn set_endpoints(&mut self, endpoints: &WorkspaceEndpoints) {
        self.gvproxy_endpoint = endpoints.control.to_uri();
        self.network_stack_backend = endpoints.data.to_uri();
        self.ignition_endpoint = endpoints.ignition.to_uri();
    }

    pub fn has_endpoints(&self) -> bool {
        !self.gvproxy_endpoint.is_empty()
            && !self.network_stack_backend.is_empty()
            && !self.ignition_endpoint.is_empty()
    }

    /// Data disks paired with their guest block device, in slot order.
    pub fn block_devices(&self) -> Vec<(PathBuf, String)> {
        self.data_disk
            .iter()
            .enumerate()
            .map(|(i, path)| (path.clone(), block_device_name(i)))
            .collect()
    }

    pub(crate) fn log_summary(&self, cmdline: &Cmdline) {
        tracing::info!(
            memory_mib = self.memory_in_mb,
            cpus = self.cpus,
            rootfs = %self.rootfs.display(),
            data_disks = self.data_disk.len(),
            mounts = self.mounts.len(),
            "VM resources"
        );
        for (path, device) in self.block_devices() {
            tracing::info!(disk = %path.display(), device = %device, "Data disk");
        }
        tracing::info!(
            control = %self.gvproxy_endpoint,
            data = %self.network_stack_backend,
            ignition = %self.ignition_endpoint,
            "Network endpoints"
        );
        tracing::info!(
            target_bin = %cmdline.target_bin,
            args = ?cmdline.target_bin_args,
            env = ?cmdline.env,
            "Guest command line"
        );
    }
}

/// Guest device name for the data disk at `index` (`vda`, `vdb`, ..., `vdz`, `vdaa`, ...).
pub fn block_device_name(index: usize) -> String {
    let mut suffix = Vec::new();
    let mut n = index;
    loop {
        suffix.push(b'a' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    suffix.reverse();
    format!("/dev/vd{}", String::from_utf8_lossy(&suffix))
}

/// Number of cores the host exposes to this process.
pub fn host_cpu_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Validate user input and build the VM configuration and guest command line.
///
/// Endpoint fields are left empty; they are filled in after the workspace is
/// allocated.
pub fn build_configuration(
    options: &VmOptions,
    host_cpus: usize,
) -> LinuxvmResult<(VmConfig, Cmdline)> {
    if options.rootfs.as_os_str().is_empty() {
        return Err(LinuxvmError::Validation("rootfs path is required".into()));
    }

    let memory_in_mb = options.memory_mib.unwrap_or(defaults::MEMORY_MIB);
    if memory_in_mb == 0 {
        return Err(LinuxvmError::Validation(
            "memory must be greater than 0 MiB".into(),
        ));
    }

    let cpus = options.cpus.unwrap_or(defaults::CPUS);
    if cpus == 0 {
        return Err(LinuxvmError::Validation(
            "cpus must be greater than 0".into(),
        ));
    }
    if usize::from(cpus) > host_cpus {
        return Err(LinuxvmError::Validation(format!(
            "cpus {} exceeds the {} cores available on this host",
            cpus, host_cpus
        )));
    }

    if let Some(empty) = options.data_disks.iter().position(|d| d.as_os_str().is_empty()) {
        return Err(LinuxvmError::Validation(format!(
            "data disk #{} has an empty path",
            empty
        )));
    }

    let mounts = MountSpec::parse_all(&options.mounts)?;

    let config = VmConfig {
        memory_in_mb,
        cpus,
        rootfs: options.rootfs.clone(),
        data_disk: options.data_disks.clone(),
        mounts,
        gvproxy_endpoint: String::new(),
        network_stack_backend: String::new(),
        ignition_endpoint: String::new(),
    };

    let cmdline = Cmdline {
        workspace: guest_paths::WORKDIR.to_string(),
        target_bin: guest_paths::BOOTSTRAP.to_string(),
        target_bin_args: options.command.clone(),
        env: options.env.clone(),
    };

    Ok((config, cmdline))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(rootfs: &str) -> VmOptions {
        VmOptions {
            rootfs: PathBuf::from(rootfs),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let (config, cmdline) = build_configuration(&options("/rootfs"), 4).unwrap();
        assert_eq!(config.memory_in_mb, 512);
        assert_eq!(config.cpus, 1);
        assert!(config.data_disk.is_empty());
        assert!(config.mounts.is_empty());
        assert!(!config.has_endpoints());
        assert_eq!(cmdline.workspace, "/");
        assert_eq!(cmdline.target_bin, "/bootstrap");
    }

    #[test]
    fn test_empty_rootfs_rejected() {
        let err = build_configuration(&options(""), 4).unwrap_err();
        assert!(matches!(err, LinuxvmError::Validation(_)));
    }

    #[test]
    fn test_resource_bounds() {
        let mut opts = options("/rootfs");
        opts.memory_mib = Some(0);
        assert!(build_configuration(&opts, 4).is_err());

        let mut opts = options("/rootfs");
        opts.cpus = Some(0);
        assert!(build_configuration(&opts, 4).is_err());

        opts.cpus = Some(8);
        assert!(matches!(
            build_configuration(&opts, 4),
            Err(LinuxvmError::Validation(_))
        ));

        opts.cpus = Some(4);
        assert_eq!(build_configuration(&opts, 4).unwrap().0.cpus, 4);
    }

    #[test]
    fn test_command_and_env_pass_through() {
        let mut opts = options("/rootfs");
        opts.command = vec!["sh".into(), "-c".into(), "echo hi".into()];
        opts.env = vec!["FOO=bar".into(), "not-an-assignment".into()];

        let (_, cmdline) = build_configuration(&opts, 1).unwrap();
        assert_eq!(cmdline.target_bin_args, ["sh", "-c", "echo hi"]);
        assert_eq!(cmdline.env, ["FOO=bar", "not-an-assignment"]);
    }

    #[test]
    fn test_does_not_touch_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        let mut opts = options(missing.to_str().unwrap());
        opts.data_disks = vec![dir.path().join("disk.img")];
        opts.mounts = vec![format!("{}:/mnt", dir.path().display())];

        build_configuration(&opts, 1).unwrap();

        assert!(!missing.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_block_devices_are_positional() {
        let mut opts = options("/rootfs");
        opts.data_disks = vec!["/disks/b.img".into(), "/disks/a.img".into()];
        let (config, _) = build_configuration(&opts, 1).unwrap();

        let devices = config.block_devices();
        assert_eq!(devices[0], (PathBuf::from("/disks/b.img"), "/dev/vda".into()));
        assert_eq!(devices[1], (PathBuf::from("/disks/a.img"), "/dev/vdb".into()));
    }

    #[test]
    fn test_block_device_name_wraps() {
        assert_eq!(block_device_name(0), "/dev/vda");
        assert_eq!(block_device_name(25), "/dev/vdz");
        assert_eq!(block_device_name(26), "/dev/vdaa");
        assert_eq!(block_device_name(27), "/dev/vdab");
    }
}
