//! Shared fixtures for nsattach integration tests.
//!
//! Containers are defined under a throwaway lxcpath and run on the host
//! filesystem with no namespaces of their own, so the tests need neither
//! root nor a container image.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use nsattach::HostOptions;
use nsattach::runtime::{ContainerBackend, LocalBackend};
use tempfile::TempDir;

/// Long-running init used by [`started_container`].
pub const INIT_ARGV: [&str; 2] = ["sleep", "3600"];

/// Isolated lxcpath, removed on drop.
pub struct TestLxcPath {
    dir: TempDir,
}

impl TestLxcPath {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp lxcpath"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Host options pointing at this lxcpath; templates resolve here too.
    pub fn options(&self) -> HostOptions {
        let mut options = HostOptions::default().with_lxcpath(self.path());
        options.template_dir = self.path().to_path_buf();
        options
    }
}

impl Default for TestLxcPath {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `future` on a current-thread runtime inside a `LocalSet`, the way
/// a host is meant to be driven.
pub fn run_local<F: Future>(future: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, future)
}

/// Define `name` under `lxcpath` without a template.
pub fn define_container(lxcpath: &Path, name: &str) -> LocalBackend {
    let backend = LocalBackend::open(name, lxcpath, lxcpath).expect("Failed to open container");
    backend
        .create(None, None, &[])
        .expect("Failed to create container");
    backend
}

/// Define and start `name`; the init is killed when the guard drops.
pub fn started_container(lxcpath: &Path, name: &str) -> InitGuard {
    let backend = define_container(lxcpath, name);
    let argv: Vec<String> = INIT_ARGV.iter().map(|s| s.to_string()).collect();
    backend.start(false, &argv).expect("Failed to start container");
    InitGuard { backend }
}

/// Stops a started container on drop.
pub struct InitGuard {
    backend: LocalBackend,
}

impl InitGuard {
    pub fn init_pid(&self) -> i32 {
        self.backend.init_pid().expect("container init is not running")
    }

    pub fn backend(&self) -> &LocalBackend {
        &self.backend
    }
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        if self.backend.is_running() {
            let _ = self.backend.stop();
        }
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
