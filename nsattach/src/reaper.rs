//! Asynchronous reaping of attached children.
//!
//! SIGCHLD is received through tokio's signal driver, whose handler only
//! records the delivery. The reap pass itself runs as a task on the
//! host's single-threaded context, where it may touch the tracked table
//! and call the exit callback.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::{Rc, Weak};

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;

use crate::host::KeepAlive;
use crate::host::process::{AttachedProcess, ExitEvent};
use crate::util::signal_name;

/// Callback invoked once per finalized process.
pub type ExitCallback = Box<dyn FnMut(&AttachedProcess, &ExitEvent)>;

/// Table of attached children waiting to be reaped.
///
/// The host's keep-alive is held while at least one tracked process is
/// marked interested.
pub(crate) struct Reaper {
    tracked: RefCell<HashMap<i32, AttachedProcess>>,
    callback: RefCell<Option<ExitCallback>>,
    /// Bumped on every `set_callback`.
    generation: Cell<u64>,
    keep_alive: Rc<KeepAlive>,
    held: Cell<bool>,
}

enum WaitResult {
    Pending,
    Finished(ExitEvent),
}

impl Reaper {
    pub(crate) fn new(keep_alive: Rc<KeepAlive>) -> Rc<Self> {
        Rc::new(Self {
            tracked: RefCell::new(HashMap::new()),
            callback: RefCell::new(None),
            generation: Cell::new(0),
            keep_alive,
            held: Cell::new(false),
        })
    }

    /// Start listening for SIGCHLD. Must be called inside a `LocalSet`.
    ///
    /// The task holds only a weak reference and stops once the reaper is
    /// gone.
    pub(crate) fn spawn(self: &Rc<Self>) -> io::Result<JoinHandle<()>> {
        let mut sigchld = signal(SignalKind::child())?;
        let weak: Weak<Self> = Rc::downgrade(self);

        Ok(tokio::task::spawn_local(async move {
            while sigchld.recv().await.is_some() {
                match weak.upgrade() {
                    Some(reaper) => reaper.reap(),
                    None => break,
                }
            }
        }))
    }

    pub(crate) fn set_callback(&self, callback: Option<ExitCallback>) {
        *self.callback.borrow_mut() = callback;
        self.generation.set(self.generation.get() + 1);
    }

    /// Start tracking an attached child and look for its status right
    /// away, in case it exited before tracking began.
    pub(crate) fn track(&self, process: AttachedProcess) {
        let Some(pid) = process.pid() else {
            return;
        };
        tracing::trace!(pid, "tracking attached process");
        self.tracked.borrow_mut().insert(pid, process);
        self.update_keep_alive();
        self.reap();
    }

    pub(crate) fn is_tracked(&self, pid: i32) -> bool {
        self.tracked.borrow().contains_key(&pid)
    }

    pub(crate) fn len(&self) -> usize {
        self.tracked.borrow().len()
    }

    /// Set the interested flag of a tracked pid. Returns false for pids
    /// that are not tracked.
    pub(crate) fn set_interest(&self, pid: i32, interested: bool) -> bool {
        let found = match self.tracked.borrow().get(&pid) {
            Some(process) => {
                process.set_interested(interested);
                true
            }
            None => false,
        };
        if found {
            self.update_keep_alive();
        }
        found
    }

    /// Hold the keep-alive exactly while some tracked process is
    /// interested.
    pub(crate) fn update_keep_alive(&self) {
        let interested = self
            .tracked
            .borrow()
            .values()
            .any(|process| process.is_interested());

        if interested && !self.held.get() {
            self.keep_alive.acquire();
            self.held.set(true);
        } else if !interested && self.held.get() {
            self.keep_alive.release();
            self.held.set(false);
        }
    }

    pub(crate) fn is_holding(&self) -> bool {
        self.held.get()
    }

    /// One non-blocking pass over every tracked pid.
    pub(crate) fn reap(&self) {
        let pids: Vec<i32> = self.tracked.borrow().keys().copied().collect();

        let mut finished = Vec::new();
        for pid in pids {
            if let WaitResult::Finished(event) = wait_nohang(pid) {
                finished.push((pid, event));
            }
        }

        if finished.is_empty() {
            return;
        }

        for (pid, event) in finished {
            let Some(process) = self.tracked.borrow_mut().remove(&pid) else {
                continue;
            };
            tracing::debug!(
                pid,
                exit_code = ?event.exit_code,
                signal = ?event.signal,
                "attached process finished"
            );
            process.finish(event.clone());
            self.notify(&process, &event);
        }

        self.update_keep_alive();
    }

    /// Report an exit that did not go through waitpid, such as an exec
    /// failure detected by the orchestrator.
    pub(crate) fn deliver(&self, process: &AttachedProcess, event: ExitEvent) {
        process.finish(event.clone());
        self.notify(process, &event);
    }

    fn notify(&self, process: &AttachedProcess, event: &ExitEvent) {
        // Taken out so the callback may replace itself
        let taken = self.callback.borrow_mut().take();
        if let Some(mut callback) = taken {
            let generation = self.generation.get();
            callback(process, event);
            if self.generation.get() == generation {
                *self.callback.borrow_mut() = Some(callback);
            }
        }
    }
}

fn wait_nohang(pid: i32) -> WaitResult {
    let mut status = 0;
    let ret = loop {
        let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if ret == -1 && io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        break ret;
    };

    if ret == 0 {
        return WaitResult::Pending;
    }

    if ret == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ECHILD) {
            // Someone else reaped it; the status is lost
            tracing::warn!(pid, "attached process was already reaped");
            return WaitResult::Finished(ExitEvent::already_reaped());
        }
        tracing::error!(pid, error = %err, "waitpid failed on a tracked process");
        std::process::abort();
    }

    if libc::WIFEXITED(status) {
        WaitResult::Finished(ExitEvent::exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        WaitResult::Finished(ExitEvent::signaled(signal_name(libc::WTERMSIG(status))))
    } else {
        // Stopped or continued
        WaitResult::Pending
    }
}
