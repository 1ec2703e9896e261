//! One-shot channel carrying an exec errno from child to orchestrator.
//!
//! The child writes its errno as a native-endian `i32` if exec fails. On
//! success the write end disappears with the old program image (it is
//! close-on-exec) and the reader sees end of stream without data.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::util::raw;

const ERRNO_LEN: usize = std::mem::size_of::<i32>();

/// What the error pipe reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecStatus {
    /// The write end closed without data: the program replaced the child.
    Executed,
    /// The child failed to exec with this errno.
    Failed(i32),
}

#[derive(Debug)]
pub(crate) struct ErrorPipe {
    read: OwnedFd,
    write: Option<OwnedFd>,
}

impl ErrorPipe {
    pub(crate) fn new() -> io::Result<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)?;
        Ok(Self {
            read,
            write: Some(write),
        })
    }

    /// Write end to pass into the child, or -1 once closed locally.
    pub(crate) fn write_fd(&self) -> RawFd {
        self.write.as_ref().map_or(-1, |fd| fd.as_raw_fd())
    }

    /// Drop the local copy of the write end.
    pub(crate) fn close_write(&mut self) {
        self.write = None;
    }

    /// Block until the child has exec'd or reported an errno.
    ///
    /// The local write end must have been closed, otherwise this never
    /// sees end of stream.
    pub(crate) fn read_status(mut self) -> io::Result<ExecStatus> {
        self.close_write();

        let mut buf = [0u8; ERRNO_LEN];
        let n = raw::read_full(self.read.as_raw_fd(), &mut buf)
            .map_err(io::Error::from_raw_os_error)?;

        Ok(match n {
            0 => ExecStatus::Executed,
            ERRNO_LEN => ExecStatus::Failed(i32::from_ne_bytes(buf)),
            // Truncated report: the child died mid-write
            _ => ExecStatus::Failed(libc::EIO),
        })
    }
}

/// Child side: report `errno` and close the write end.
///
/// Async-signal-safe.
pub(crate) fn report_exec_error(fd: RawFd, errno: i32) {
    if fd < 0 {
        return;
    }
    let _ = raw::write_all(fd, &errno.to_ne_bytes());
    unsafe { libc::close(fd) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_ends_are_cloexec_fifo() {
        let pipe = ErrorPipe::new().unwrap();
        for fd in [pipe.read.as_raw_fd(), pipe.write_fd()] {
            assert!(unsafe { libc::fcntl(fd, libc::F_GETFD) } & libc::FD_CLOEXEC != 0);
            let mut stat: libc::stat = unsafe { std::mem::zeroed() };
            assert_eq!(unsafe { libc::fstat(fd, &mut stat) }, 0);
            assert_eq!(stat.st_mode & libc::S_IFMT, libc::S_IFIFO);
        }
    }

    #[test]
    fn test_closed_without_data_means_executed() {
        let pipe = ErrorPipe::new().unwrap();
        assert_eq!(pipe.read_status().unwrap(), ExecStatus::Executed);
    }

    #[test]
    fn test_reported_errno() {
        let mut pipe = ErrorPipe::new().unwrap();
        let dup = unsafe { libc::fcntl(pipe.write_fd(), libc::F_DUPFD_CLOEXEC, 0) };
        assert!(dup >= 0);
        pipe.close_write();
        assert_eq!(pipe.write_fd(), -1);

        report_exec_error(dup, libc::ENOENT);
        assert_eq!(pipe.read_status().unwrap(), ExecStatus::Failed(libc::ENOENT));
    }

    #[test]
    fn test_truncated_report() {
        let pipe = ErrorPipe::new().unwrap();
        let dup = unsafe { libc::fcntl(pipe.write_fd(), libc::F_DUPFD_CLOEXEC, 0) };
        raw::write_all(dup, &[1u8]).unwrap();
        unsafe { libc::close(dup) };
        assert_eq!(pipe.read_status().unwrap(), ExecStatus::Failed(libc::EIO));
    }

    #[test]
    fn test_report_to_closed_fd_is_ignored() {
        report_exec_error(-1, libc::EACCES);
    }
}
