//! Fixed names and defaults shared by host and guest.
//!
//! Guest paths are part of the handoff contract with the guest bootstrap
//! process and must not change between releases.

/// Paths inside the guest root filesystem.
pub mod guest_paths {
    /// Bootstrap binary executed by the VM runtime as the guest entrypoint.
    pub const BOOTSTRAP: &str = "/bootstrap";

    /// Handoff document read by the bootstrap process.
    pub const VMCONFIG: &str = "/.linuxvm/vmconfig.json";

    /// Working directory for the guest command.
    pub const WORKDIR: &str = "/";
}

/// Socket file names inside the ephemeral workspace.
pub mod endpoints {
    pub const CONTROL_SOCKET: &str = "gvproxy-control.sock";
    pub const DATA_SOCKET: &str = "vfkit-network-backend.sock";
    pub const IGNITION_SOCKET: &str = "ignition.sock";

    /// Prefix for the ephemeral workspace directory.
    pub const WORKSPACE_PREFIX: &str = "gvproxy";
}

/// Defaults applied when the user leaves a value unspecified.
pub mod defaults {
    pub const MEMORY_MIB: u32 = 512;
    pub const CPUS: u8 = 1;

    /// Soft cap used when the hard descriptor limit is unlimited.
    pub const NOFILE_TARGET: u64 = 1 << 20;
}

/// Binary names resolved with [`crate::util::find_binary`].
pub mod binaries {
    pub const GVPROXY: &str = "gvproxy";
    pub const SHIM: &str = "linuxvm-shim";
    pub const BOOTSTRAP: &str = "bootstrap";
}
