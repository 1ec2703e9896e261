//! Caller-facing host API.
//!
//! A [`Host`] is the single-threaded context that owns every caller-visible
//! object. It lives on a current-thread tokio runtime inside a `LocalSet`:
//! blocking work goes through the worker bridge, results and exit
//! notifications are delivered back on the host's task.
//!
//! ```rust,no_run
//! # async fn example() -> nsattach::NsattachResult<()> {
//! use nsattach::{GetOptions, Host, HostOptions, ProcessOptions};
//!
//! let host = Host::new(HostOptions::from_env()?)?;
//! let container = host.get_container("web", GetOptions::default()).await?;
//! let process = container.attach("ls", &["-la".to_string()], ProcessOptions::default())?;
//! let event = process.wait().await?;
//! println!("exit code: {:?}", event.exit_code);
//! # Ok(())
//! # }
//! ```

pub(crate) mod bridge;
mod container;
mod keepalive;
mod open;
pub(crate) mod process;
mod stdio;

pub use container::{ConfigValue, Container};
pub(crate) use keepalive::KeepAlive;
pub use open::{OpenOptions, parse_open_flags};
pub use process::{AttachedProcess, ExitEvent, ProcessOptions, ProcessState};
pub use stdio::StdioStream;

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use nsattach_shared::errors::{NsattachError, NsattachResult};
use tokio::task::JoinHandle;

use crate::attach::{self, AttachCommand, AttachOutcome, AttachRequest, ExecCommand};
use crate::fd;
use crate::lifecycle;
use crate::options::HostOptions;
use crate::reaper::Reaper;
use crate::runtime::{ContainerHandle, ContainerProvider, LocalProvider};
use bridge::WorkerBridge;

/// Options for [`Host::get_container`].
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Container path; the host's lxcpath when None.
    pub path: Option<PathBuf>,
    /// Fail with "Container not found" when the container is not defined.
    pub defined: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            path: None,
            defined: true,
        }
    }
}

/// The single-threaded context. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Host {
    inner: Rc<HostInner>,
}

struct HostInner {
    options: HostOptions,
    provider: Arc<dyn ContainerProvider>,
    bridge: WorkerBridge,
    reaper: Rc<Reaper>,
    keep_alive: Rc<KeepAlive>,
    reaper_task: JoinHandle<()>,
}

impl Drop for HostInner {
    fn drop(&mut self) {
        self.reaper_task.abort();
    }
}

impl Host {
    /// Create a host backed by the directory runtime under
    /// `options.lxcpath`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a `LocalSet`.
    pub fn new(options: HostOptions) -> NsattachResult<Self> {
        let provider = LocalProvider::new(options.lxcpath.clone(), options.template_dir.clone());
        Self::with_provider(options, Arc::new(provider))
    }

    /// Create a host on a custom container runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a `LocalSet`.
    pub fn with_provider(
        options: HostOptions,
        provider: Arc<dyn ContainerProvider>,
    ) -> NsattachResult<Self> {
        options.validate()?;
        lifecycle::install_exit_guard();

        let keep_alive = KeepAlive::new();
        let reaper = Reaper::new(keep_alive.clone());
        let reaper_task = reaper.spawn()?;
        let bridge = WorkerBridge::new(options.worker_threads, keep_alive.clone());

        tracing::debug!(
            lxcpath = %options.lxcpath.display(),
            worker_threads = options.worker_threads,
            "host started"
        );

        Ok(Self {
            inner: Rc::new(HostInner {
                options,
                provider,
                bridge,
                reaper,
                keep_alive,
                reaper_task,
            }),
        })
    }

    pub fn options(&self) -> &HostOptions {
        &self.inner.options
    }

    /// Resolves once nothing keeps the host alive: no operation in flight
    /// and no referenced attached process left.
    pub async fn run(&self) {
        self.inner.keep_alive.wait_idle().await;
    }

    /// Whether an operation or a referenced process keeps the host alive.
    pub fn is_busy(&self) -> bool {
        self.inner.keep_alive.count() > 0
    }

    /// Look up a container by name.
    pub async fn get_container(&self, name: &str, options: GetOptions) -> NsattachResult<Container> {
        let provider = self.inner.provider.clone();
        let name = name.to_string();
        let backend = self
            .inner
            .bridge
            .run(move || {
                let backend = provider
                    .open(&name, options.path.as_deref())
                    .map_err(|e| NsattachError::operation("Failed to create container", e))?;
                if options.defined && !backend.is_defined() {
                    backend.release();
                    return Err(NsattachError::NotFound(name));
                }
                Ok(backend)
            })
            .await?;
        Ok(Container::new(self.clone(), backend))
    }

    /// Attach `program` to a running container. See [`Container::attach`].
    pub fn attach(
        &self,
        container: &Container,
        program: &str,
        args: &[String],
        options: ProcessOptions,
    ) -> NsattachResult<AttachedProcess> {
        let command = ExecCommand::new(program, args)?;
        self.spawn(container.backend(), Box::new(command), program, options)
    }

    /// Mark a tracked pid as interesting. Returns false for unknown pids.
    pub fn ref_pid(&self, pid: i32) -> bool {
        self.inner.reaper.set_interest(pid, true)
    }

    /// Let the host finish without waiting for `pid`. Returns false for
    /// unknown pids.
    pub fn unref_pid(&self, pid: i32) -> bool {
        self.inner.reaper.set_interest(pid, false)
    }

    pub fn is_tracked(&self, pid: i32) -> bool {
        self.inner.reaper.is_tracked(pid)
    }

    /// Register the function called once per finished attached process,
    /// replacing any previous one.
    pub fn set_exit_callback<F>(&self, callback: F)
    where
        F: FnMut(&AttachedProcess, &ExitEvent) + 'static,
    {
        self.inner.reaper.set_callback(Some(Box::new(callback)));
    }

    pub fn clear_exit_callback(&self) {
        self.inner.reaper.set_callback(None);
    }

    pub(crate) fn bridge(&self) -> &WorkerBridge {
        &self.inner.bridge
    }

    pub(crate) fn wrap(&self, backend: ContainerHandle) -> Container {
        Container::new(self.clone(), backend)
    }

    /// Allocate stdio, hand back the process handle and queue the attach.
    pub(crate) fn spawn(
        &self,
        backend: &ContainerHandle,
        command: Box<dyn AttachCommand>,
        spawnfile: &str,
        options: ProcessOptions,
    ) -> NsattachResult<AttachedProcess> {
        let plumbing = fd::allocate(options.streams, options.terminal)?;
        let process =
            AttachedProcess::new(spawnfile, plumbing.parent, Rc::downgrade(&self.inner.reaper));

        let mut request = AttachRequest::new(
            backend.clone(),
            command,
            options.to_attach_options(),
            plumbing.child,
            options.terminal.is_some(),
        );

        let host = self.clone();
        let handle = process.clone();
        self.inner.bridge.queue(
            move || attach::execute(&mut request),
            move |result| host.complete_attach(&handle, result),
        );
        Ok(process)
    }

    fn complete_attach(&self, process: &AttachedProcess, result: NsattachResult<AttachOutcome>) {
        match result {
            Ok(outcome) if outcome.is_exec_failure() => {
                tracing::debug!(
                    pid = outcome.pid,
                    errno = outcome.exec_errno,
                    program = process.spawnfile(),
                    "exec failed in attached process"
                );
                process.set_pid(outcome.pid);
                self.inner
                    .reaper
                    .deliver(process, ExitEvent::exec_failed(outcome.exec_errno));
            }
            Ok(outcome) => {
                process.mark_attached(outcome.pid);
                self.inner.reaper.track(process.clone());
            }
            Err(err) => {
                tracing::debug!(program = process.spawnfile(), error = %err, "attach failed");
                process.mark_failed(err);
            }
        }
    }
}

/// Version of this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
