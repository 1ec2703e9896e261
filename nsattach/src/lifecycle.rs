//! Process-wide exit guard.
//!
//! Code between fork and exec runs in a copy of the host. If anything in
//! that window ends up calling `exit()`, the host's exit handlers would run
//! a second time inside the child. The guard registers an `atexit` handler
//! that turns such an exit into `_exit` in every process but the host.

use std::sync::Once;
use std::sync::atomic::{AtomicI32, Ordering};

static HOST_PID: AtomicI32 = AtomicI32::new(0);
static INSTALL: Once = Once::new();

extern "C" fn exit_guard() {
    let host = HOST_PID.load(Ordering::Relaxed);
    if host != 0 && unsafe { libc::getpid() } != host {
        unsafe { libc::_exit(0) };
    }
}

/// Register the guard. Idempotent; the first caller's pid is the host.
pub(crate) fn install_exit_guard() {
    INSTALL.call_once(|| {
        HOST_PID.store(unsafe { libc::getpid() }, Ordering::Relaxed);
        if unsafe { libc::atexit(exit_guard) } != 0 {
            tracing::warn!("could not register exit guard");
        }
    });
}

/// Pid of the process that installed the guard, if any.
pub(crate) fn host_pid() -> Option<i32> {
    match HOST_PID.load(Ordering::Relaxed) {
        0 => None,
        pid => Some(pid),
    }
}
