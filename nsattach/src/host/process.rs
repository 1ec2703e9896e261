//! Handle on an attached process.

use std::cell::{Cell, RefCell};
use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use nsattach_shared::constants::exit;
use nsattach_shared::errors::{NsattachError, NsattachResult};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::stdio::StdioStream;
use crate::fd::{self, ParentFds, TerminalSize};
use crate::reaper::Reaper;
use crate::runtime::{AttachOptions, EnvPolicy, NamespaceSet};

// ============================================================================
// Options
// ============================================================================

/// Options for [`Container::attach`](super::Container::attach).
///
/// # Examples
///
/// ```rust,no_run
/// # use nsattach::{ProcessOptions, TerminalSize};
/// let options = ProcessOptions::default()
///     .cwd("/root")
///     .env("TERM", "xterm")
///     .terminal(TerminalSize::new(120, 40));
/// ```
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub cwd: PathBuf,
    /// Extra variables, applied after the policy's base environment.
    pub env: Vec<(String, String)>,
    pub env_policy: EnvPolicy,
    /// Allocate a pty of this size for stdio.
    pub terminal: Option<TerminalSize>,
    /// Join the container's cgroup.
    pub cgroup: bool,
    /// Extra duplex streams, installed as fds 3, 4, ...
    pub streams: usize,
    pub namespaces: NamespaceSet,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("/"),
            env: Vec::new(),
            env_policy: EnvPolicy::Clear,
            terminal: None,
            cgroup: true,
            streams: 0,
            namespaces: NamespaceSet::all(),
            uid: None,
            gid: None,
        }
    }
}

impl ProcessOptions {
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_policy(mut self, policy: EnvPolicy) -> Self {
        self.env_policy = policy;
        self
    }

    pub fn terminal(mut self, size: TerminalSize) -> Self {
        self.terminal = Some(size);
        self
    }

    pub fn cgroup(mut self, enabled: bool) -> Self {
        self.cgroup = enabled;
        self
    }

    pub fn streams(mut self, count: usize) -> Self {
        self.streams = count;
        self
    }

    pub fn namespaces(mut self, namespaces: NamespaceSet) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    pub(crate) fn to_attach_options(&self) -> AttachOptions {
        AttachOptions {
            namespaces: self.namespaces,
            move_to_cgroup: self.cgroup,
            cwd: self.cwd.clone(),
            env_policy: self.env_policy,
            extra_env: self.env.clone(),
            uid: self.uid,
            gid: self.gid,
            ..Default::default()
        }
    }
}

// ============================================================================
// Exit and state
// ============================================================================

/// How an attached process ended.
///
/// Exactly one of `exit_code` and `signal` is set. A negative exit code is
/// an exec failure carrying the negated errno.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
}

impl ExitEvent {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            signal: Some(signal.into()),
        }
    }

    pub fn exec_failed(errno: i32) -> Self {
        Self::exited(-errno)
    }

    /// The child was reaped elsewhere and its status is unknown.
    pub fn already_reaped() -> Self {
        Self::signaled(exit::ALREADY_REAPED)
    }

    /// errno of a failed exec.
    pub fn exec_errno(&self) -> Option<i32> {
        match self.exit_code {
            Some(code) if code < 0 => Some(-code),
            _ => None,
        }
    }

    pub fn is_already_reaped(&self) -> bool {
        self.signal.as_deref() == Some(exit::ALREADY_REAPED)
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Observable state of an attached process.
#[derive(Debug, Clone)]
pub enum ProcessState {
    /// Attach is in flight.
    Pending,
    /// Attached; the "attach" event.
    Running(i32),
    /// Finished, including exec failures.
    Exited(ExitEvent),
    /// Attach failed; the "error" event.
    Failed(NsattachError),
}

// ============================================================================
// AttachedProcess
// ============================================================================

/// Handle to a process attached to a container.
///
/// Returned before the attach has happened; the pid becomes available
/// once [`wait_attached`](Self::wait_attached) resolves. Clones share the
/// same process.
#[derive(Clone)]
pub struct AttachedProcess {
    inner: Rc<ProcessInner>,
}

struct ProcessInner {
    spawnfile: String,
    pid: Cell<Option<i32>>,
    interested: Cell<bool>,
    state: watch::Sender<ProcessState>,
    stdio: RefCell<ParentFds>,
    /// pty master, kept for resizing after stdio has been taken
    terminal: Option<Arc<OwnedFd>>,
    reaper: Weak<Reaper>,
}

impl AttachedProcess {
    pub(crate) fn new(spawnfile: &str, stdio: ParentFds, reaper: Weak<Reaper>) -> Self {
        let terminal = if stdio.is_terminal() {
            stdio.shared(0)
        } else {
            None
        };
        let (state, _) = watch::channel(ProcessState::Pending);

        Self {
            inner: Rc::new(ProcessInner {
                spawnfile: spawnfile.to_string(),
                pid: Cell::new(None),
                interested: Cell::new(true),
                state,
                stdio: RefCell::new(stdio),
                terminal,
                reaper,
            }),
        }
    }

    pub fn pid(&self) -> Option<i32> {
        self.inner.pid.get()
    }

    /// Program the process was started with.
    pub fn spawnfile(&self) -> &str {
        &self.inner.spawnfile
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.terminal.is_some()
    }

    pub fn state(&self) -> ProcessState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.inner.state.subscribe()
    }

    pub fn exit_event(&self) -> Option<ExitEvent> {
        match &*self.inner.state.borrow() {
            ProcessState::Exited(event) => Some(event.clone()),
            _ => None,
        }
    }

    /// Resolves with the pid once attached.
    ///
    /// Fails with the attach error, or with [`NsattachError::Spawn`] when
    /// the program could not be executed.
    pub async fn wait_attached(&self) -> NsattachResult<i32> {
        let state = self.wait_for(|s| !matches!(s, ProcessState::Pending)).await?;
        match state {
            ProcessState::Running(pid) => Ok(pid),
            ProcessState::Exited(event) => match event.exec_errno() {
                Some(errno) => Err(NsattachError::Spawn {
                    program: self.inner.spawnfile.clone(),
                    errno,
                }),
                None => self.pid().ok_or(NsattachError::NotAttached),
            },
            ProcessState::Failed(err) => Err(err),
            ProcessState::Pending => Err(NsattachError::NotAttached),
        }
    }

    /// Resolves once the process has been reaped.
    pub async fn wait(&self) -> NsattachResult<ExitEvent> {
        let state = self
            .wait_for(|s| matches!(s, ProcessState::Exited(_) | ProcessState::Failed(_)))
            .await?;
        match state {
            ProcessState::Exited(event) => Ok(event),
            ProcessState::Failed(err) => Err(err),
            _ => Err(NsattachError::Internal("process state went backwards".into())),
        }
    }

    async fn wait_for(
        &self,
        ready: impl FnMut(&ProcessState) -> bool,
    ) -> NsattachResult<ProcessState> {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(ready)
            .await
            .map_err(|_| NsattachError::Internal("process state channel closed".into()))?;
        Ok((*state).clone())
    }

    /// Send `signal` to the process.
    ///
    /// Returns false when the process is already gone.
    pub fn kill(&self, signal: Signal) -> NsattachResult<bool> {
        let pid = self.pid().ok_or(NsattachError::NotAttached)?;
        if self.exit_event().is_some() {
            return Ok(false);
        }

        match kill(Pid::from_raw(pid), signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(errno) => Err(std::io::Error::from(errno).into()),
        }
    }

    /// Change the window size of the process's terminal.
    pub fn resize(&self, columns: u16, rows: u16) -> NsattachResult<()> {
        let master = self.inner.terminal.as_ref().ok_or_else(|| {
            NsattachError::InvalidArgument("process has no terminal".into())
        })?;
        fd::resize(master.as_fd(), columns, rows)?;
        Ok(())
    }

    pub fn window_size(&self) -> NsattachResult<TerminalSize> {
        let master = self.inner.terminal.as_ref().ok_or_else(|| {
            NsattachError::InvalidArgument("process has no terminal".into())
        })?;
        Ok(fd::window_size(master.as_fd())?)
    }

    /// Keep the host running until this process exits (the default).
    pub fn ref_(&self) {
        self.set_interested(true);
        self.refresh_keep_alive();
    }

    /// Let the host finish without waiting for this process.
    pub fn unref(&self) {
        self.set_interested(false);
        self.refresh_keep_alive();
    }

    fn refresh_keep_alive(&self) {
        if self.pid().is_some()
            && let Some(reaper) = self.inner.reaper.upgrade()
        {
            reaper.update_keep_alive();
        }
    }

    /// Take the parent side of a stream slot. Terminal slots 0-2 share the
    /// pty master, each taken slot owns its own duplicate.
    pub fn take_stdio(&self, slot: usize) -> Option<NsattachResult<StdioStream>> {
        let terminal = self.is_terminal() && slot < fd::STDIO_SLOTS;
        let fd = self.inner.stdio.borrow_mut().take(slot)?;
        Some(
            fd.map_err(NsattachError::from)
                .and_then(|fd| StdioStream::new(fd, terminal).map_err(NsattachError::from)),
        )
    }

    pub fn stdin(&self) -> Option<NsattachResult<StdioStream>> {
        self.take_stdio(0)
    }

    pub fn stdout(&self) -> Option<NsattachResult<StdioStream>> {
        self.take_stdio(1)
    }

    pub fn stderr(&self) -> Option<NsattachResult<StdioStream>> {
        self.take_stdio(2)
    }

    /// Number of stream slots, stdio included.
    pub fn stream_count(&self) -> usize {
        self.inner.stdio.borrow().len()
    }

    // ------------------------------------------------------------------------
    // Engine side
    // ------------------------------------------------------------------------

    pub(crate) fn set_pid(&self, pid: i32) {
        self.inner.pid.set(Some(pid));
    }

    pub(crate) fn mark_attached(&self, pid: i32) {
        self.set_pid(pid);
        self.inner.state.send_replace(ProcessState::Running(pid));
    }

    pub(crate) fn mark_failed(&self, err: NsattachError) {
        self.inner.state.send_replace(ProcessState::Failed(err));
    }

    pub(crate) fn finish(&self, event: ExitEvent) {
        if !self.is_terminal() {
            // Nothing reads the child's stdin any more
            drop(self.inner.stdio.borrow_mut().take(0));
        }
        self.inner.state.send_replace(ProcessState::Exited(event));
    }

    pub(crate) fn is_interested(&self) -> bool {
        self.inner.interested.get()
    }

    pub(crate) fn set_interested(&self, interested: bool) {
        self.inner.interested.set(interested);
    }
}

impl std::fmt::Debug for AttachedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedProcess")
            .field("spawnfile", &self.inner.spawnfile)
            .field("pid", &self.inner.pid.get())
            .field("terminal", &self.is_terminal())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(terminal: Option<TerminalSize>) -> AttachedProcess {
        let plumbing = fd::allocate(1, terminal).unwrap();
        AttachedProcess::new("sh", plumbing.parent, Weak::new())
    }

    #[test]
    fn test_exit_event_classification() {
        assert!(ExitEvent::exited(0).success());
        assert!(!ExitEvent::exited(1).success());
        assert_eq!(ExitEvent::exec_failed(libc::ENOENT).exit_code, Some(-libc::ENOENT));
        assert_eq!(ExitEvent::exec_failed(libc::ENOENT).exec_errno(), Some(libc::ENOENT));
        assert_eq!(ExitEvent::signaled("SIGTERM").exec_errno(), None);
        assert!(ExitEvent::already_reaped().is_already_reaped());
    }

    #[test]
    fn test_process_options_defaults() {
        let options = ProcessOptions::default();
        assert_eq!(options.cwd, PathBuf::from("/"));
        assert!(options.cgroup);
        assert_eq!(options.streams, 0);
        assert!(options.terminal.is_none());
        assert_eq!(options.namespaces, NamespaceSet::all());

        let attach = options.env("A", "1").uid(1000).to_attach_options();
        assert_eq!(attach.extra_env, vec![("A".to_string(), "1".to_string())]);
        assert_eq!(attach.uid, Some(1000));
        assert_eq!(attach.gid, None);
    }

    #[test]
    fn test_kill_before_attach() {
        let process = detached(None);
        assert!(matches!(
            process.kill(Signal::SIGTERM),
            Err(NsattachError::NotAttached)
        ));
    }

    #[test]
    fn test_kill_after_exit_is_false() {
        let process = detached(None);
        process.set_pid(i32::MAX);
        process.finish(ExitEvent::exited(0));
        assert!(!process.kill(Signal::SIGTERM).unwrap());
    }

    #[test]
    fn test_resize_requires_terminal() {
        assert!(detached(None).resize(80, 24).is_err());

        let process = detached(Some(TerminalSize::new(100, 30)));
        assert_eq!(process.window_size().unwrap(), TerminalSize::new(100, 30));
        process.resize(80, 24).unwrap();
        assert_eq!(process.window_size().unwrap(), TerminalSize::new(80, 24));
    }

    #[test]
    fn test_finish_drops_pipe_stdin() {
        let process = detached(None);
        process.finish(ExitEvent::exited(0));
        assert!(process.inner.stdio.borrow().raw(0).is_none());
        assert!(process.inner.stdio.borrow().raw(1).is_some());
        assert_eq!(process.stream_count(), 4);
    }

    #[tokio::test]
    async fn test_wait_attached_reports_exec_failure() {
        let process = detached(None);
        process.set_pid(42);
        process.finish(ExitEvent::exec_failed(libc::ENOENT));
        match process.wait_attached().await {
            Err(NsattachError::Spawn { program, errno }) => {
                assert_eq!(program, "sh");
                assert_eq!(errno, libc::ENOENT);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(process.wait().await.unwrap(), ExitEvent::exec_failed(libc::ENOENT));
    }

    #[tokio::test]
    async fn test_wait_sees_failure() {
        let process = detached(None);
        let waiter = process.clone();
        process.mark_failed(NsattachError::NotRunning);
        assert!(matches!(waiter.wait().await, Err(NsattachError::NotRunning)));
    }
}
