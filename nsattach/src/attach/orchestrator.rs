use std::io;
use std::os::fd::RawFd;

use nsattach_shared::errors::{NsattachError, NsattachResult};

use super::{AttachCommand, AttachOutcome, AttachRequest};
use crate::fd::{ErrorPipe, ExecStatus, STDIO_SLOTS, lock};
use crate::runtime::{AttachEntry, ContainerRef, Environment};

/// Run one attach request.
///
/// Preconditions are checked in order: valid reference, control
/// privilege, defined, running. The container reference is held for the
/// whole operation.
pub(crate) fn execute(request: &mut AttachRequest) -> NsattachResult<AttachOutcome> {
    let container = ContainerRef::acquire(&request.container)?;
    if !container.may_control() {
        return Err(NsattachError::PermissionDenied);
    }
    if !container.is_defined() {
        return Err(NsattachError::NotDefined);
    }
    if !container.is_running() {
        return Err(NsattachError::NotRunning);
    }

    let child_fds = request.stdio.raw_fds();
    if child_fds.len() < STDIO_SLOTS {
        return Err(NsattachError::Internal(format!(
            "attach needs {} stdio slots, got {}",
            STDIO_SLOTS,
            child_fds.len()
        )));
    }
    let mut options = request.options.clone();
    options.stdio = [child_fds[0], child_fds[1], child_fds[2]];

    let mut pipe = ErrorPipe::new().map_err(NsattachError::allocation)?;
    let mut entry = EntryPoint::new(
        request.command.as_mut(),
        request.terminal,
        &child_fds[STDIO_SLOTS..],
        pipe.write_fd(),
    );

    let attached = {
        let _guard = lock::fork_guard();
        let result = container.attach(&mut entry, &options);
        // Close before another thread can fork and inherit it
        pipe.close_write();
        result
    };

    let pid = attached.map_err(|e| match e {
        NsattachError::Attach(_) | NsattachError::NotRunning => e,
        other => NsattachError::Attach(other.to_string()),
    })?;

    let exec_errno = match pipe.read_status() {
        Ok(ExecStatus::Executed) => 0,
        Ok(ExecStatus::Failed(errno)) => {
            // The child exits right after reporting
            wait_blocking(pid);
            errno
        }
        Err(e) => {
            tracing::warn!(pid, error = %e, "could not read exec status, assuming the command ran");
            0
        }
    };

    tracing::debug!(
        pid,
        container = %container.name(),
        command = %request.command.name(),
        exec_errno,
        "attached"
    );
    Ok(AttachOutcome { pid, exec_errno })
}

fn wait_blocking(pid: i32) {
    loop {
        let ret = unsafe { libc::waitpid(pid, std::ptr::null_mut(), 0) };
        if ret >= 0 || io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            return;
        }
    }
}

/// The code run in the attached child before the command takes over.
struct EntryPoint<'a> {
    command: &'a mut (dyn AttachCommand + 'static),
    terminal: bool,
    extra: &'a [RawFd],
    error_fd: RawFd,
    /// Relocated copies of `extra`, sized in `prepare`.
    scratch: Vec<RawFd>,
}

impl<'a> EntryPoint<'a> {
    fn new(
        command: &'a mut (dyn AttachCommand + 'static),
        terminal: bool,
        extra: &'a [RawFd],
        error_fd: RawFd,
    ) -> Self {
        Self {
            command,
            terminal,
            extra,
            error_fd,
            scratch: Vec::new(),
        }
    }

    /// Move every extra stream onto its slot index (3, 4, ...).
    ///
    /// Sources and the error descriptor are first copied above the highest
    /// slot, so no dup2 clobbers a descriptor still needed.
    fn install_streams(&mut self) -> Result<RawFd, ()> {
        let slots = (STDIO_SLOTS + self.extra.len()) as libc::c_int;
        if self.extra.is_empty() {
            return Ok(self.error_fd);
        }

        for (i, fd) in self.extra.iter().enumerate() {
            let moved = unsafe { libc::fcntl(*fd, libc::F_DUPFD_CLOEXEC, slots) };
            if moved < 0 {
                return Err(());
            }
            self.scratch[i] = moved;
        }
        let error_fd = if self.error_fd >= 0 {
            let moved = unsafe { libc::fcntl(self.error_fd, libc::F_DUPFD_CLOEXEC, slots) };
            if moved < 0 {
                return Err(());
            }
            moved
        } else {
            -1
        };

        for (i, fd) in self.scratch.iter().enumerate() {
            let slot = (STDIO_SLOTS + i) as libc::c_int;
            if unsafe { libc::dup2(*fd, slot) } < 0 {
                return Err(());
            }
            unsafe { libc::close(*fd) };
        }
        for fd in self.extra {
            if *fd >= slots {
                unsafe { libc::close(*fd) };
            }
        }
        Ok(error_fd)
    }
}

impl AttachEntry for EntryPoint<'_> {
    fn prepare(&mut self, env: &Environment) -> io::Result<()> {
        self.scratch = vec![-1; self.extra.len()];
        self.command.prepare(env)
    }

    fn enter(&mut self, env: &Environment) -> i32 {
        unsafe { libc::setsid() };
        if self.terminal {
            unsafe { libc::ioctl(0, libc::TIOCSCTTY, 0) };
        }

        match self.install_streams() {
            Ok(error_fd) => self.command.run(error_fd, env),
            Err(()) => 1,
        }
    }
}
