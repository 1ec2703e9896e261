//! Descriptor plumbing for attached processes.
//!
//! [`allocate`] creates the parent/child descriptor pairs that become an
//! attached child's stdio and extra streams. Slots 0-2 are stdin, stdout
//! and stderr; slots 3.. are extra duplex streams. With a terminal, slots
//! 0-2 alias one pty pair; every other slot is an independent socket pair.
//!
//! Parent-side descriptors are non-blocking. Every descriptor is created
//! close-on-exec; the child clears the flag only on the slot numbers it
//! installs.

mod error_pipe;
pub(crate) mod lock;
mod pty;

pub(crate) use error_pipe::{ErrorPipe, ExecStatus, report_exec_error};
pub use pty::{TerminalSize, resize, window_size};

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use nsattach_shared::errors::{NsattachError, NsattachResult};

/// Number of fixed stdio slots.
pub const STDIO_SLOTS: usize = 3;

/// Parent-side descriptors, indexed by slot.
///
/// With a terminal, slots 0-2 share one master descriptor.
#[derive(Debug)]
pub struct ParentFds {
    slots: Vec<Option<Arc<OwnedFd>>>,
    terminal: bool,
}

impl ParentFds {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Raw descriptor number of a slot that has not been taken.
    pub fn raw(&self, slot: usize) -> Option<RawFd> {
        self.slots.get(slot)?.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Shared handle on a slot's descriptor, if it has not been taken.
    pub(crate) fn shared(&self, slot: usize) -> Option<Arc<OwnedFd>> {
        self.slots.get(slot)?.clone()
    }

    /// Take ownership of a slot's descriptor.
    ///
    /// Aliased terminal slots yield a duplicate of the shared master.
    pub fn take(&mut self, slot: usize) -> Option<io::Result<OwnedFd>> {
        let shared = self.slots.get_mut(slot)?.take()?;
        Some(Arc::try_unwrap(shared).or_else(|shared| shared.try_clone()))
    }
}

/// Child-side descriptors, indexed by slot.
///
/// Owned by the in-flight attach request and closed when it is dropped.
#[derive(Debug)]
pub struct ChildFds {
    slots: Vec<Arc<OwnedFd>>,
}

impl ChildFds {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Raw descriptor numbers in slot order.
    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.slots.iter().map(|fd| fd.as_raw_fd()).collect()
    }
}

/// Result of [`allocate`].
#[derive(Debug)]
pub struct StdioPlumbing {
    pub parent: ParentFds,
    pub child: ChildFds,
}

/// Allocate `3 + streams` descriptor slots.
///
/// Any failure releases the descriptors allocated so far.
pub fn allocate(streams: usize, terminal: Option<TerminalSize>) -> NsattachResult<StdioPlumbing> {
    let total = STDIO_SLOTS + streams;
    let mut parent = Vec::with_capacity(total);
    let mut child = Vec::with_capacity(total);

    if let Some(size) = terminal {
        let (master, slave) = pty::open_pty(size).map_err(NsattachError::allocation)?;
        let master = Arc::new(master);
        let slave = Arc::new(slave);
        for _ in 0..STDIO_SLOTS {
            parent.push(Some(master.clone()));
            child.push(slave.clone());
        }
    }

    while parent.len() < total {
        let (parent_end, child_end) = stream_pair().map_err(NsattachError::allocation)?;
        parent.push(Some(Arc::new(parent_end)));
        child.push(Arc::new(child_end));
    }

    tracing::trace!(slots = total, terminal = terminal.is_some(), "allocated stdio plumbing");

    Ok(StdioPlumbing {
        parent: ParentFds {
            slots: parent,
            terminal: terminal.is_some(),
        },
        child: ChildFds { slots: child },
    })
}

/// Connected duplex pair, close-on-exec at creation; the parent end is
/// made non-blocking.
fn stream_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let (parent_end, child_end) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_CLOEXEC,
    )
    .map_err(io::Error::from)?;
    set_nonblocking(parent_end.as_raw_fd())?;
    Ok((parent_end, child_end))
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn set_cloexec(fd: RawFd, enabled: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if enabled {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
