//! Shared constants
//!
//! Values that the engine, the CLI and the tests must agree on.

/// Namespace names accepted in attach options.
pub mod namespaces {
    pub const MOUNT: &str = "mount";

    /// Historical alias for the mount namespace
    pub const MOUNT_ALIAS: &str = "ns";

    pub const UTS: &str = "uts";
    pub const IPC: &str = "ipc";
    pub const USER: &str = "user";
    pub const PID: &str = "pid";
    pub const NET: &str = "net";
}

/// Environment of attached processes.
pub mod environment {
    /// PATH installed when the caller does not provide one
    pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

    /// Marker variable set for every process started in a container
    pub const CONTAINER_MARKER: &str = "container=lxc";
}

/// Exit reporting.
pub mod exit {
    /// Exit code of an attached child whose exec failed
    pub const EXEC_FAILED: i32 = 127;

    /// Signal name reported when a tracked child vanished before it could
    /// be reaped
    pub const ALREADY_REAPED: &str = "ECHILD";
}

/// Pseudo-terminal defaults.
pub mod terminal {
    pub const DEFAULT_COLUMNS: u16 = 80;
    pub const DEFAULT_ROWS: u16 = 24;
}

/// On-disk layout of a container directory.
pub mod layout {
    /// System-wide container path used for root
    pub const SYSTEM_LXCPATH: &str = "/var/lib/lxc";

    /// Directory name under the user data dir for unprivileged users
    pub const USER_LXCPATH_DIR: &str = "lxc";

    pub const CONFIG_FILE: &str = "config";
    pub const PID_FILE: &str = "init.pid";
    pub const RUNNING_CONFIG_FILE: &str = "running.config";
    pub const ROOTFS_DIR: &str = "rootfs";

    pub const TEMPLATE_DIR: &str = "/usr/share/lxc/templates";
    pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";
}

/// Environment variables read by the host configuration.
pub mod envs {
    pub const LXCPATH: &str = "NSATTACH_LXCPATH";
    pub const WORKER_THREADS: &str = "NSATTACH_WORKER_THREADS";
    pub const LOG: &str = "NSATTACH_LOG";
}

/// Worker pool sizing.
pub mod workers {
    /// Same as the default libuv thread pool size
    pub const DEFAULT_THREADS: usize = 4;
}
