//! Host terminal handling for interactive attach.

use std::io::IsTerminal;
use std::os::fd::{AsFd, BorrowedFd};

use nix::sys::termios::{self, SetArg, Termios};
use nsattach::TerminalSize;

/// Puts the terminal on stdin into raw mode and restores it on drop.
pub struct RawMode {
    saved: Termios,
}

impl RawMode {
    /// None when stdin is not a terminal.
    pub fn enable() -> anyhow::Result<Option<Self>> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return Ok(None);
        }

        let saved = termios::tcgetattr(stdin.as_fd())?;
        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)?;
        Ok(Some(Self { saved }))
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let stdin = std::io::stdin();
        if let Err(e) = termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &self.saved) {
            tracing::warn!(error = %e, "failed to restore terminal");
        }
    }
}

/// Size of the terminal on stdout, if it is one.
pub fn host_size() -> Option<TerminalSize> {
    let stdout = std::io::stdout();
    let fd: BorrowedFd<'_> = stdout.as_fd();
    nsattach::window_size(fd).ok()
}
