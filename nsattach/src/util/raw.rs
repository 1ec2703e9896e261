//! Async-signal-safe helpers for code running between fork and exec.
//!
//! Everything here may be called in a freshly forked child. Do NOT add:
//! - Logging (tracing, println)
//! - Memory allocation (Box, Vec, String)
//! - Mutex operations

/// Current thread's errno.
#[inline]
pub(crate) fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Terminate the current process without running exit handlers.
#[inline]
pub(crate) fn exit_now(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

/// Close every descriptor from `first` upward.
///
/// Tries close_range (Linux 5.9+) and falls back to a bounded loop; procfs
/// cannot be used since it allocates and may not be mounted.
pub(crate) fn close_from(first: i32) {
    let result = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            first as libc::c_uint,
            libc::c_uint::MAX,
            0 as libc::c_uint,
        )
    };
    if result == 0 {
        return;
    }
    for fd in first..1024 {
        unsafe { libc::close(fd) };
    }
}

/// Write the whole buffer, retrying on EINTR and short writes.
pub(crate) fn write_all(fd: i32, mut buf: &[u8]) -> Result<(), i32> {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 {
            let err = errno();
            if err == libc::EINTR {
                continue;
            }
            return Err(err);
        }
        buf = &buf[n as usize..];
    }
    Ok(())
}

/// Read into `buf` until it is full or the peer closes.
///
/// Returns the number of bytes read.
pub(crate) fn read_full(fd: i32, buf: &mut [u8]) -> Result<usize, i32> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = unsafe {
            libc::read(
                fd,
                buf[filled..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - filled,
            )
        };
        if n < 0 {
            let err = errno();
            if err == libc::EINTR {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            break;
        }
        filled += n as usize;
    }
    Ok(filled)
}

/// Format an integer as decimal ASCII into a stack buffer.
///
/// Returns the number of bytes written. No trailing newline.
pub(crate) fn format_decimal(value: i64, buf: &mut [u8; 24]) -> usize {
    if value == 0 {
        buf[0] = b'0';
        return 1;
    }

    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();

    let mut tmp = [0u8; 24];
    let mut len = 0;
    while magnitude > 0 {
        tmp[len] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        len += 1;
    }

    let mut pos = 0;
    if negative {
        buf[pos] = b'-';
        pos += 1;
    }
    for i in 0..len {
        buf[pos] = tmp[len - 1 - i];
        pos += 1;
    }
    pos
}

/// Write `value` in decimal to `fd`.
pub(crate) fn write_decimal(fd: i32, value: i64) -> Result<(), i32> {
    let mut buf = [0u8; 24];
    let len = format_decimal(value, &mut buf);
    write_all(fd, &buf[..len])
}
