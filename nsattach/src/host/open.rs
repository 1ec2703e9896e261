//! Opening files from inside a container.
//!
//! Opening `<rootfs>/<path>` from the host follows symlinks planted by the
//! container. Instead, a helper attached in the container's mount and user
//! namespaces opens the path and the host picks the descriptor up through
//! `/proc/<helper>/fd/<n>`.

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{OFlag, open};
use nix::sys::stat::Mode;
use nsattach_shared::errors::{NsattachError, NsattachResult};
use tokio::io::AsyncReadExt;

use super::Container;
use super::process::ProcessOptions;
use crate::attach::OpenCommand;
use crate::runtime::{EnvPolicy, NamespaceSet};

/// Options for [`Container::open_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// `open(2)` flags.
    pub flags: libc::c_int,
    /// Mode for created files, subject to the helper's umask.
    pub mode: libc::mode_t,
    pub uid: u32,
    pub gid: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            flags: libc::O_RDONLY,
            mode: 0o666,
            uid: 0,
            gid: 0,
        }
    }
}

impl OpenOptions {
    /// Options with flags from an fopen-style string such as "r+" or "wx".
    pub fn from_flags(flags: &str) -> NsattachResult<Self> {
        Ok(Self {
            flags: parse_open_flags(flags)?,
            ..Default::default()
        })
    }
}

/// Convert an fopen-style mode string into `open(2)` flags.
pub fn parse_open_flags(flags: &str) -> NsattachResult<libc::c_int> {
    use libc::{O_APPEND, O_CREAT, O_EXCL, O_RDONLY, O_RDWR, O_SYNC, O_TRUNC, O_WRONLY};

    let parsed = match flags {
        "r" => O_RDONLY,
        "rs" | "sr" => O_RDONLY | O_SYNC,
        "r+" => O_RDWR,
        "rs+" | "sr+" => O_RDWR | O_SYNC,

        "w" => O_TRUNC | O_CREAT | O_WRONLY,
        "wx" | "xw" => O_TRUNC | O_CREAT | O_WRONLY | O_EXCL,
        "w+" => O_TRUNC | O_CREAT | O_RDWR,
        "wx+" | "xw+" => O_TRUNC | O_CREAT | O_RDWR | O_EXCL,

        "a" => O_APPEND | O_CREAT | O_WRONLY,
        "ax" | "xa" => O_APPEND | O_CREAT | O_WRONLY | O_EXCL,
        "a+" => O_APPEND | O_CREAT | O_RDWR,
        "ax+" | "xa+" => O_APPEND | O_CREAT | O_RDWR | O_EXCL,

        other => {
            return Err(NsattachError::InvalidArgument(format!(
                "unknown file open flag: {}",
                other
            )));
        }
    };
    Ok(parsed)
}

impl Container {
    /// Open `path` as seen from inside the container.
    ///
    /// The open runs as `options.uid`/`options.gid`, without capabilities
    /// unless that is root, so container permissions apply.
    pub async fn open_file(&self, path: impl AsRef<Path>, options: OpenOptions) -> NsattachResult<File> {
        let path = path.as_ref();
        let command = OpenCommand::new(path, options.flags, options.mode)?;
        let process_options = ProcessOptions {
            cwd: PathBuf::from("/"),
            env: Vec::new(),
            env_policy: EnvPolicy::Clear,
            terminal: None,
            cgroup: false,
            streams: 0,
            namespaces: NamespaceSet::MOUNT.union(NamespaceSet::USER),
            uid: Some(options.uid),
            gid: Some(options.gid),
        };

        let helper =
            self.host()
                .spawn(self.backend(), Box::new(command), OpenCommand::NAME, process_options)?;
        let stdin = take(helper.stdin())?;
        let mut stdout = take(helper.stdout())?;
        let mut stderr = take(helper.stderr())?;

        let pid = helper.wait_attached().await?;

        let mut reported = String::new();
        stdout.read_to_string(&mut reported).await?;
        if let Ok(fd) = reported.trim().parse::<i32>() {
            let proc_path = format!("/proc/{}/fd/{}", pid, fd);
            let flags = OFlag::from_bits_truncate(options.flags & !libc::O_EXCL) | OFlag::O_CLOEXEC;
            let opened = open(proc_path.as_str(), flags, Mode::empty());
            // Lets the helper exit
            drop(stdin);
            let fd = opened.map_err(io::Error::from)?;
            tracing::debug!(path = %path.display(), pid, fd = fd.as_raw_fd(), "opened file in container");
            return Ok(File::from(fd));
        }

        let mut errors = String::new();
        stderr.read_to_string(&mut errors).await?;
        if let Ok(errno) = errors.trim().parse::<i32>() {
            return Err(io::Error::from_raw_os_error(errno).into());
        }

        let event = helper.wait().await?;
        Err(NsattachError::Internal(match event.signal {
            Some(signal) => format!("open helper was killed: {}", signal),
            None => format!("open helper exited with {:?} without a result", event.exit_code),
        }))
    }
}

fn take<T>(slot: Option<NsattachResult<T>>) -> NsattachResult<T> {
    slot.unwrap_or_else(|| Err(NsattachError::Internal("helper stdio already taken".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open_flags() {
        assert_eq!(parse_open_flags("r").unwrap(), libc::O_RDONLY);
        assert_eq!(parse_open_flags("r+").unwrap(), libc::O_RDWR);
        assert_eq!(
            parse_open_flags("wx").unwrap(),
            libc::O_TRUNC | libc::O_CREAT | libc::O_WRONLY | libc::O_EXCL
        );
        assert_eq!(
            parse_open_flags("a+").unwrap(),
            libc::O_APPEND | libc::O_CREAT | libc::O_RDWR
        );
        assert_eq!(parse_open_flags("xa+").unwrap(), parse_open_flags("ax+").unwrap());
        assert!(parse_open_flags("rw").is_err());
    }

    #[test]
    fn test_open_options_defaults() {
        let options = OpenOptions::default();
        assert_eq!(options.mode, 0o666);
        assert_eq!((options.uid, options.gid), (0, 0));
        assert_eq!(OpenOptions::from_flags("w").unwrap().flags, parse_open_flags("w").unwrap());
    }
}
