//! Pseudo-terminal allocation and window size control.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};

use nix::pty::{Winsize, openpty};
use nsattach_shared::constants::terminal as const_terminal;
use serde::{Deserialize, Serialize};

use super::{lock, set_cloexec, set_nonblocking};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub columns: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(columns: u16, rows: u16) -> Self {
        Self { columns, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            columns: const_terminal::DEFAULT_COLUMNS,
            rows: const_terminal::DEFAULT_ROWS,
        }
    }
}

/// Open a pty pair sized to `size`.
///
/// openpty cannot create close-on-exec descriptors, so both ends are
/// created and flagged under the shared side of the fork lock. The master
/// is returned non-blocking.
pub(crate) fn open_pty(size: TerminalSize) -> io::Result<(OwnedFd, OwnedFd)> {
    let winsize = Winsize {
        ws_row: size.rows,
        ws_col: size.columns,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    let pair = {
        let _guard = lock::creation_guard();
        let pair = openpty(&winsize, None).map_err(io::Error::from)?;
        set_cloexec(pair.master.as_raw_fd(), true)?;
        set_cloexec(pair.slave.as_raw_fd(), true)?;
        pair
    };

    set_nonblocking(pair.master.as_raw_fd())?;
    Ok((pair.master, pair.slave))
}

/// Apply a window size change to a terminal descriptor.
///
/// Fails with ENOTTY when `fd` is not a terminal.
pub fn resize(fd: BorrowedFd<'_>, columns: u16, rows: u16) -> io::Result<()> {
    let winsize = libc::winsize {
        ws_row: rows,
        ws_col: columns,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, &winsize) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Read the current window size of a terminal descriptor.
pub fn window_size(fd: BorrowedFd<'_>) -> io::Result<TerminalSize> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut winsize) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(TerminalSize::new(winsize.ws_col, winsize.ws_row))
}
