//! Commands run inside the container by an attached child.
//!
//! A command has a single capability, [`AttachCommand::run`]: it receives
//! the error-pipe descriptor and returns the child's exit code. New kinds
//! of in-container work are added by implementing the trait.

use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nsattach_shared::constants::exit;
use nsattach_shared::errors::{NsattachError, NsattachResult};

use crate::fd::report_exec_error;
use crate::runtime::Environment;
use crate::util::exec::ExecTarget;
use crate::util::raw;

pub trait AttachCommand: Send {
    /// Name of the program as reported on the process handle.
    fn name(&self) -> &str;

    /// Called before the child exists, with the environment it will get.
    fn prepare(&mut self, _env: &Environment) -> io::Result<()> {
        Ok(())
    }

    /// Runs in the attached child. Returns its exit code.
    ///
    /// A command that replaces the process image reports a failed exec by
    /// writing the errno to `error_fd`. Any other command must close
    /// `error_fd` so the orchestrator stops waiting on it.
    ///
    /// Async-signal-safe only: no logging, no allocation, no locks.
    fn run(&self, error_fd: RawFd, env: &Environment) -> i32;
}

// ============================================================================
// ExecCommand
// ============================================================================

/// Replace the child with a program, searched for on the child's PATH.
pub struct ExecCommand {
    name: String,
    target: ExecTarget,
}

impl ExecCommand {
    pub fn new(program: &str, args: &[String]) -> NsattachResult<Self> {
        Ok(Self {
            name: program.to_string(),
            target: ExecTarget::new(program, args)?,
        })
    }
}

impl AttachCommand for ExecCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, env: &Environment) -> io::Result<()> {
        self.target.resolve(env.get("PATH"));
        Ok(())
    }

    fn run(&self, error_fd: RawFd, env: &Environment) -> i32 {
        let errno = self.target.exec(env.as_cstrings());
        report_exec_error(error_fd, errno);
        exit::EXEC_FAILED
    }
}

// ============================================================================
// OpenCommand
// ============================================================================

/// Open a path from inside the container and hand the descriptor out.
///
/// Prints the descriptor number in decimal on stdout, then holds it open
/// until stdin reaches end of stream so the host can pick it up through
/// `/proc/<pid>/fd/<n>`. On failure the errno is printed on stderr and
/// the exit code is 1.
pub struct OpenCommand {
    path: CString,
    flags: libc::c_int,
    mode: libc::mode_t,
}

impl OpenCommand {
    pub const NAME: &'static str = "open-file";

    pub fn new(path: &Path, flags: libc::c_int, mode: libc::mode_t) -> NsattachResult<Self> {
        let path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| NsattachError::InvalidArgument("path contains a NUL byte".into()))?;
        Ok(Self { path, flags, mode })
    }
}

impl AttachCommand for OpenCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(&self, error_fd: RawFd, _env: &Environment) -> i32 {
        unsafe { libc::close(error_fd) };

        if unsafe { libc::geteuid() } != 0 {
            drop_capabilities();
        }
        raw::close_from(3);

        let fd = unsafe { libc::open(self.path.as_ptr(), self.flags, self.mode as libc::c_uint) };
        if fd < 0 {
            let _ = raw::write_decimal(2, raw::errno() as i64);
            return 1;
        }

        let _ = raw::write_decimal(1, fd as i64);
        unsafe { libc::close(1) };

        // The host closes our stdin once it has its own copy
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(0, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n == 0 || (n < 0 && raw::errno() != libc::EINTR) {
                break;
            }
        }
        0
    }
}

#[repr(C)]
struct CapHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct CapData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

const CAPABILITY_VERSION_3: u32 = 0x2008_0522;

/// Clear every capability set of the calling thread. Async-signal-safe.
fn drop_capabilities() {
    let header = CapHeader {
        version: CAPABILITY_VERSION_3,
        pid: 0,
    };
    let data = [CapData {
        effective: 0,
        permitted: 0,
        inheritable: 0,
    }; 2];
    unsafe { libc::syscall(libc::SYS_capset, &header, data.as_ptr()) };
}
