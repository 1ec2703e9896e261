//! Process inspection helpers for pid tracking.

use std::path::Path;

use nix::sys::signal::Signal;
use nsattach_shared::errors::{NsattachError, NsattachResult};

/// Contents of a container's pid file: the init pid and its start time.
///
/// The start time guards against pid reuse after the init died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PidRecord {
    pub pid: i32,
    pub start_time: u64,
}

/// Read a pid file written by [`write_pid_file`].
///
/// Files holding only a pid are accepted; the start time is then 0 and
/// is not checked.
pub(crate) fn read_pid_file(path: &Path) -> NsattachResult<PidRecord> {
    let content = std::fs::read_to_string(path)?;
    let mut fields = content.split_whitespace();

    let pid = fields
        .next()
        .and_then(|f| f.parse::<i32>().ok())
        .filter(|pid| *pid > 0)
        .ok_or_else(|| {
            NsattachError::Internal(format!(
                "Invalid PID in file {}: '{}'",
                path.display(),
                content.trim()
            ))
        })?;
    let start_time = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);

    Ok(PidRecord { pid, start_time })
}

pub(crate) fn write_pid_file(path: &Path, record: PidRecord) -> NsattachResult<()> {
    std::fs::write(path, format!("{} {}\n", record.pid, record.start_time))?;
    Ok(())
}

/// Check if a process with the given PID exists.
///
/// EPERM means the process exists but belongs to someone else.
pub(crate) fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Fields of `/proc/<pid>/stat` the engine cares about.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProcStat {
    pub state: char,
    pub start_time: u64,
}

pub(crate) fn proc_stat(pid: i32) -> Option<ProcStat> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // rest starts at field 3 (state); starttime is field 22
    let state = fields.first()?.chars().next()?;
    let start_time = fields.get(19)?.parse().ok()?;
    Some(ProcStat { state, start_time })
}

/// True if `record` still names a live, non-zombie process.
pub(crate) fn is_record_alive(record: PidRecord) -> bool {
    if !is_process_alive(record.pid) {
        return false;
    }
    match proc_stat(record.pid) {
        Some(stat) => {
            stat.state != 'Z'
                && stat.state != 'X'
                && (record.start_time == 0 || stat.start_time == record.start_time)
        }
        None => false,
    }
}

/// Symbolic name of a signal number ("SIGTERM"), or "SIG<n>" for
/// numbers nix does not know, such as real-time signals.
pub fn signal_name(signo: i32) -> String {
    match Signal::try_from(signo) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("SIG{}", signo),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_process_alive_current() {
        assert!(is_process_alive(std::process::id() as i32));
    }

    #[test]
    fn test_is_process_alive_invalid() {
        assert!(!is_process_alive(999999999));
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(-1));
    }

    #[test]
    fn test_proc_stat_current() {
        let stat = proc_stat(std::process::id() as i32).unwrap();
        assert_ne!(stat.state, 'Z');
        assert!(stat.start_time > 0);
    }

    #[test]
    fn test_pid_file_roundtrip_and_liveness() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("init.pid");
        let pid = std::process::id() as i32;
        let record = PidRecord {
            pid,
            start_time: proc_stat(pid).unwrap().start_time,
        };

        write_pid_file(&path, record).unwrap();
        let read = read_pid_file(&path).unwrap();
        assert_eq!(read, record);
        assert!(is_record_alive(read));

        let stale = PidRecord {
            start_time: record.start_time + 1,
            ..record
        };
        assert!(!is_record_alive(stale));
    }

    #[test]
    fn test_read_pid_file_legacy_and_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("init.pid");

        std::fs::write(&path, "1234\n").unwrap();
        assert_eq!(
            read_pid_file(&path).unwrap(),
            PidRecord {
                pid: 1234,
                start_time: 0
            }
        );

        std::fs::write(&path, "garbage").unwrap();
        assert!(read_pid_file(&path).is_err());
    }

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(libc::SIGTERM), "SIGTERM");
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
        assert_eq!(signal_name(libc::SIGRTMIN() + 1), format!("SIG{}", libc::SIGRTMIN() + 1));
    }
}
