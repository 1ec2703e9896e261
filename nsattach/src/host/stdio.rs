//! Async parent-side streams.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::Stream;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use crate::fd::set_nonblocking;

const CHUNK_SIZE: usize = 8192;

/// Parent side of one stream slot of an attached process.
///
/// On a pty master, the EIO returned once the child side hangs up is
/// reported as end of stream.
pub struct StdioStream {
    inner: AsyncFd<OwnedFd>,
    terminal: bool,
}

impl StdioStream {
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(fd: OwnedFd, terminal: bool) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            inner: AsyncFd::new(fd)?,
            terminal,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.inner.get_ref().as_raw_fd()
    }

    /// Adapt into a stream of byte chunks, ending at end of stream.
    pub fn into_chunks(mut self) -> impl Stream<Item = io::Result<Vec<u8>>> {
        async_stream::try_stream! {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = self.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield buf[..n].to_vec();
            }
        }
    }

    pub fn into_owned_fd(self) -> OwnedFd {
        self.inner.into_inner()
    }
}

impl AsyncRead for StdioStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let terminal = self.terminal;
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            let result = guard.try_io(|inner| {
                let n = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        unfilled.as_mut_ptr() as *mut libc::c_void,
                        unfilled.len(),
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });

            match result {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) if terminal && e.raw_os_error() == Some(libc::EIO) => {
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for StdioStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            let result = guard.try_io(|inner| {
                let n = unsafe {
                    libc::write(
                        inner.as_raw_fd(),
                        buf.as_ptr() as *const libc::c_void,
                        buf.len(),
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });

            match result {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    /// Half-close a socket stream so the child sees end of input. A pty
    /// has no write side to close on its own.
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.terminal {
            return Poll::Ready(Ok(()));
        }
        let rc = unsafe { libc::shutdown(self.as_raw_fd(), libc::SHUT_WR) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOTCONN) {
                return Poll::Ready(Err(err));
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for StdioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioStream")
            .field("fd", &self.as_raw_fd())
            .field("terminal", &self.terminal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::fd::{self, TerminalSize};

    #[tokio::test]
    async fn test_socket_round_trip_and_shutdown() {
        let mut plumbing = fd::allocate(1, None).unwrap();
        let parent = plumbing.parent.take(3).unwrap().unwrap();
        let mut stream = StdioStream::new(parent, false).unwrap();
        assert!(!stream.is_terminal());

        let raw = plumbing.child.raw_fds()[3];
        stream.write_all(b"ping").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(raw, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        assert_eq!(&buf[..n as usize], b"ping");
        let n = unsafe { libc::read(raw, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_chunks_end_at_eof() {
        let mut plumbing = fd::allocate(1, None).unwrap();
        let parent = plumbing.parent.take(3).unwrap().unwrap();
        let raw = plumbing.child.raw_fds()[3];
        let msg = b"hello";
        unsafe { libc::write(raw, msg.as_ptr() as *const libc::c_void, msg.len()) };
        drop(plumbing.child);

        let chunks: Vec<Vec<u8>> = StdioStream::new(parent, false)
            .unwrap()
            .into_chunks()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), b"hello");
    }

    #[tokio::test]
    async fn test_pty_hangup_is_end_of_stream() {
        let mut plumbing = fd::allocate(0, Some(TerminalSize::default())).unwrap();
        let master = plumbing.parent.take(0).unwrap().unwrap();
        drop(plumbing.parent);
        drop(plumbing.child);

        let mut stream = StdioStream::new(master, true).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }
}
