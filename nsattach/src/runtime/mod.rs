//! Container runtime boundary.
//!
//! [`ContainerBackend`] is the container library the engine drives: state
//! queries, the namespace-entry primitive and one blocking call per
//! lifecycle or configuration operation. [`LocalBackend`] implements it on
//! an lxc-compatible directory layout.

pub mod config;
mod environment;
pub mod local;
mod namespace;

pub use config::{ContainerConfig, supported_keys};
pub use environment::{EnvPolicy, Environment};
pub use local::{LocalBackend, LocalProvider};
pub use namespace::NamespaceSet;

use std::io;
use std::ops::Deref;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nsattach_shared::errors::{NsattachError, NsattachResult};
use serde::{Deserialize, Serialize};

/// Shared handle to a container backend.
pub type ContainerHandle = Arc<dyn ContainerBackend>;

// ============================================================================
// Attach primitive
// ============================================================================

/// Code run by the namespace-entry primitive in the attached child.
pub trait AttachEntry {
    /// Runs in the caller before the child is created. May allocate.
    fn prepare(&mut self, env: &Environment) -> io::Result<()>;

    /// Runs in the attached child, inside the target namespaces, with the
    /// stdio triple already installed. Returns the child's exit code.
    ///
    /// Only async-signal-safe operations are allowed: no logging, no
    /// allocation, no locks.
    fn enter(&mut self, env: &Environment) -> i32;
}

/// Options for [`ContainerBackend::attach`].
#[derive(Debug, Clone)]
pub struct AttachOptions {
    pub namespaces: NamespaceSet,
    /// Join the init process's cgroup before running the entry point.
    pub move_to_cgroup: bool,
    pub cwd: PathBuf,
    pub env_policy: EnvPolicy,
    pub extra_env: Vec<(String, String)>,
    /// None keeps the caller's uid.
    pub uid: Option<u32>,
    /// None keeps the caller's gid.
    pub gid: Option<u32>,
    /// Descriptors installed as the child's 0, 1 and 2.
    pub stdio: [RawFd; 3],
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            namespaces: NamespaceSet::all(),
            move_to_cgroup: true,
            cwd: PathBuf::from("/"),
            env_policy: EnvPolicy::Clear,
            extra_env: Vec::new(),
            uid: None,
            gid: None,
            stdio: [0, 1, 2],
        }
    }
}

// ============================================================================
// Lifecycle options
// ============================================================================

/// Options for [`ContainerBackend::clone_to`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneOptions {
    /// Container path of the copy; defaults to the source's.
    pub path: Option<PathBuf>,
    pub backing_store: Option<String>,
    /// Size of the new backing store in bytes; 0 keeps the source's size.
    pub size: u64,
    pub snapshot: bool,
    pub keep_name: bool,
    pub keep_mac: bool,
}

/// Observable container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerState {
    Stopped,
    Running,
}

// ============================================================================
// Backend trait
// ============================================================================

/// A container object of the underlying runtime library.
///
/// All calls may block and are run on worker threads.
pub trait ContainerBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Directory holding this container's directory.
    fn lxcpath(&self) -> &Path;

    /// Take a reference. Fails once the object has been freed.
    fn acquire(&self) -> bool;

    /// Drop a reference taken with [`acquire`](Self::acquire) or the one
    /// the object was created with.
    fn release(&self);

    fn may_control(&self) -> bool;
    fn is_defined(&self) -> bool;
    fn is_running(&self) -> bool;
    fn init_pid(&self) -> Option<i32>;

    fn state(&self) -> ContainerState {
        if self.is_running() {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        }
    }

    /// Run `entry` in a new child inside the container's namespaces.
    ///
    /// Returns once the child exists; the pid is a child of the calling
    /// process.
    fn attach(&self, entry: &mut dyn AttachEntry, options: &AttachOptions) -> NsattachResult<i32>;

    fn create(
        &self,
        template: Option<&str>,
        backing_store: Option<&str>,
        args: &[String],
    ) -> NsattachResult<()>;
    fn start(&self, use_init: bool, argv: &[String]) -> NsattachResult<()>;
    fn stop(&self) -> NsattachResult<()>;
    fn destroy(&self) -> NsattachResult<()>;
    fn clone_to(&self, new_name: &str, options: &CloneOptions) -> NsattachResult<ContainerHandle>;

    fn load_config(&self, file: Option<&Path>) -> NsattachResult<()>;
    fn save_config(&self, file: Option<&Path>) -> NsattachResult<()>;
    fn config_keys(&self) -> Vec<String>;
    fn get_config_item(&self, key: &str) -> NsattachResult<String>;
    fn set_config_item(&self, key: &str, value: &str) -> NsattachResult<()>;
    fn clear_config_item(&self, key: &str) -> NsattachResult<()>;
    fn get_running_config_item(&self, key: &str) -> NsattachResult<String>;

    fn get_cgroup_item(&self, key: &str) -> NsattachResult<String>;
    fn set_cgroup_item(&self, key: &str, value: &str) -> NsattachResult<()>;
}

/// Opens container backends by name.
pub trait ContainerProvider: Send + Sync {
    /// Construct the object for `name` under `lxcpath` (or the provider's
    /// default path). The object may or may not be defined.
    fn open(&self, name: &str, lxcpath: Option<&Path>) -> NsattachResult<ContainerHandle>;
}

// ============================================================================
// Reference guard
// ============================================================================

/// A reference on a container object, released on drop.
pub struct ContainerRef {
    backend: ContainerHandle,
}

impl ContainerRef {
    pub fn acquire(backend: &ContainerHandle) -> NsattachResult<Self> {
        if !backend.acquire() {
            return Err(NsattachError::InvalidReference);
        }
        Ok(Self {
            backend: backend.clone(),
        })
    }
}

impl Deref for ContainerRef {
    type Target = dyn ContainerBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

impl Drop for ContainerRef {
    fn drop(&mut self) {
        self.backend.release();
    }
}
