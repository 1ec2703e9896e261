//! Namespace entry for containers managed by [`LocalBackend`](super::LocalBackend).
//!
//! Double fork: an intermediate child joins the init's namespaces and
//! cgroup, then clones the attached child with `CLONE_PARENT` so it is a
//! direct child of the host and can be reaped there. The intermediate
//! reports the new pid (or the failing step and its errno) over a pipe and
//! exits.

use std::ffi::{CStr, CString};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;

use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use nsattach_shared::errors::{NsattachError, NsattachResult};

use super::cgroup;
use crate::runtime::{AttachEntry, AttachOptions, Environment, NamespaceSet};
use crate::util::raw;

// Steps reported by forked helpers. Shared with container start.
pub(super) const STAGE_DONE: i32 = 0;
pub(super) const STAGE_SETNS: i32 = 1;
pub(super) const STAGE_CGROUP: i32 = 2;
pub(super) const STAGE_CLONE: i32 = 3;
pub(super) const STAGE_UNSHARE: i32 = 4;
pub(super) const STAGE_ID_MAP: i32 = 5;
pub(super) const STAGE_HOSTNAME: i32 = 6;
pub(super) const STAGE_FORK: i32 = 7;

pub(super) fn stage_name(stage: i32) -> &'static str {
    match stage {
        STAGE_SETNS => "setns",
        STAGE_CGROUP => "cgroup",
        STAGE_CLONE => "clone",
        STAGE_UNSHARE => "unshare",
        STAGE_ID_MAP => "id map",
        STAGE_HOSTNAME => "sethostname",
        STAGE_FORK => "fork",
        _ => "unknown step",
    }
}

/// Send a `(stage, value)` record. Async-signal-safe.
pub(super) fn send_status(fd: RawFd, stage: i32, value: i32) {
    let mut record = [0u8; 8];
    record[..4].copy_from_slice(&stage.to_ne_bytes());
    record[4..].copy_from_slice(&value.to_ne_bytes());
    let _ = raw::write_all(fd, &record);
}

/// Receive the helper's record and reap the helper.
///
/// Ok(pid) on success, Err((stage, errno)) on a reported failure, and
/// Err((STAGE_DONE, EPIPE)) when the helper died silently.
pub(super) fn receive_status(read: OwnedFd, helper: i32) -> Result<i32, (i32, i32)> {
    let mut record = [0u8; 8];
    let received = raw::read_full(read.as_raw_fd(), &mut record);
    drop(read);
    wait_helper(helper);

    match received {
        Ok(8) => {
            let stage = i32::from_ne_bytes([record[0], record[1], record[2], record[3]]);
            let value = i32::from_ne_bytes([record[4], record[5], record[6], record[7]]);
            if stage == STAGE_DONE {
                Ok(value)
            } else {
                Err((stage, value))
            }
        }
        Ok(_) => Err((STAGE_DONE, libc::EPIPE)),
        Err(errno) => Err((STAGE_DONE, errno)),
    }
}

/// Blocking wait on a short-lived helper process.
pub(super) fn wait_helper(pid: i32) {
    let mut status = 0;
    loop {
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc >= 0 || raw::errno() != libc::EINTR {
            break;
        }
    }
}

// ============================================================================
// Preparation (runs in the caller, may allocate)
// ============================================================================

/// Namespace descriptors of the target init that differ from ours.
struct NamespacePlan {
    targets: Vec<(OwnedFd, libc::c_int)>,
}

impl NamespacePlan {
    fn open(init_pid: i32, set: NamespaceSet) -> NsattachResult<Self> {
        let mut targets = Vec::new();

        for (flag, proc_name) in set.entries() {
            let target_path = format!("/proc/{}/ns/{}", init_pid, proc_name);
            let target = match std::fs::metadata(&target_path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(namespace = proc_name, "namespace not available, skipping");
                    continue;
                }
                Err(e) => {
                    return Err(NsattachError::Attach(format!("{}: {}", target_path, e)));
                }
            };

            // setns into a namespace we already share is an error for user
            // namespaces and pointless for the rest
            if let Ok(own) = std::fs::metadata(format!("/proc/self/ns/{}", proc_name))
                && own.dev() == target.dev()
                && own.ino() == target.ino()
            {
                tracing::trace!(namespace = proc_name, "already shared, skipping");
                continue;
            }

            let file = File::open(&target_path)
                .map_err(|e| NsattachError::Attach(format!("{}: {}", target_path, e)))?;
            targets.push((OwnedFd::from(file), flag.bits()));
        }

        Ok(Self { targets })
    }
}

/// `cgroup.procs` of the init's cgroup, when it differs from ours.
fn cgroup_target(init_pid: i32) -> NsattachResult<Option<CString>> {
    let target = cgroup::unified_path(init_pid)
        .map_err(|e| NsattachError::Attach(format!("cgroup of {}: {}", init_pid, e)))?;
    let own = cgroup::unified_path(std::process::id() as i32).ok().flatten();

    match target {
        Some(target) if Some(&target) != own.as_ref() => {
            let procs = cgroup::cgroup_dir(&target).join("cgroup.procs");
            CString::new(procs.as_os_str().as_bytes())
                .map(Some)
                .map_err(|_| NsattachError::Attach("cgroup path contains a NUL byte".into()))
        }
        _ => Ok(None),
    }
}

/// Everything the attached child needs, prepared before forking.
struct ChildSetup {
    cwd: CString,
    uid: Option<u32>,
    gid: Option<u32>,
    stdio: [RawFd; 3],
}

pub(super) fn attach(
    init_pid: i32,
    entry: &mut dyn AttachEntry,
    options: &AttachOptions,
) -> NsattachResult<i32> {
    let env = Environment::build(options.env_policy, &options.extra_env)?;
    entry
        .prepare(&env)
        .map_err(|e| NsattachError::Attach(format!("prepare: {}", e)))?;

    let plan = NamespacePlan::open(init_pid, options.namespaces)?;
    let cgroup_procs = if options.move_to_cgroup {
        cgroup_target(init_pid)?
    } else {
        None
    };
    let setup = ChildSetup {
        cwd: CString::new(options.cwd.as_os_str().as_bytes())
            .map_err(|_| NsattachError::InvalidArgument("cwd contains a NUL byte".into()))?,
        uid: options.uid,
        gid: options.gid,
        stdio: options.stdio,
    };

    let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| NsattachError::Attach(format!("status pipe: {}", e)))?;

    tracing::debug!(
        init_pid,
        namespaces = plan.targets.len(),
        cgroup = cgroup_procs.is_some(),
        "entering container"
    );

    let helper = unsafe { libc::fork() };
    if helper < 0 {
        return Err(NsattachError::Attach(format!(
            "fork: {}",
            io::Error::last_os_error()
        )));
    }
    if helper == 0 {
        intermediate(
            &plan,
            cgroup_procs.as_deref(),
            &setup,
            entry,
            &env,
            status_write.as_raw_fd(),
        );
    }

    drop(status_write);
    receive_status(status_read, helper).map_err(|(stage, errno)| {
        NsattachError::Attach(format!(
            "{}: {}",
            stage_name(stage),
            io::Error::from_raw_os_error(errno)
        ))
    })
}

// ============================================================================
// Forked side (async-signal-safe only)
// ============================================================================

fn intermediate(
    plan: &NamespacePlan,
    cgroup_procs: Option<&CStr>,
    setup: &ChildSetup,
    entry: &mut dyn AttachEntry,
    env: &Environment,
    status_fd: RawFd,
) -> ! {
    for (fd, nstype) in &plan.targets {
        if unsafe { libc::setns(fd.as_raw_fd(), *nstype) } < 0 {
            send_status(status_fd, STAGE_SETNS, raw::errno());
            raw::exit_now(1);
        }
    }

    if let Some(procs) = cgroup_procs {
        let fd = unsafe { libc::open(procs.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
        if fd < 0 {
            send_status(status_fd, STAGE_CGROUP, raw::errno());
            raw::exit_now(1);
        }
        // "0" moves the writing process
        if let Err(errno) = raw::write_all(fd, b"0") {
            send_status(status_fd, STAGE_CGROUP, errno);
            raw::exit_now(1);
        }
        unsafe { libc::close(fd) };
    }

    let flags = (libc::CLONE_PARENT | libc::SIGCHLD) as libc::c_ulong;
    let pid = unsafe { libc::syscall(libc::SYS_clone, flags, 0usize, 0usize, 0usize, 0usize) };
    if pid == 0 {
        attached_child(setup, entry, env);
    }
    if pid < 0 {
        send_status(status_fd, STAGE_CLONE, raw::errno());
        raw::exit_now(1);
    }

    send_status(status_fd, STAGE_DONE, pid as i32);
    raw::exit_now(0)
}

fn attached_child(setup: &ChildSetup, entry: &mut dyn AttachEntry, env: &Environment) -> ! {
    // A missing working directory is not fatal
    unsafe { libc::chdir(setup.cwd.as_ptr()) };

    if let Some(gid) = setup.gid {
        unsafe { libc::setgroups(0, std::ptr::null()) };
        if unsafe { libc::setgid(gid) } < 0 {
            raw::exit_now(1);
        }
    }
    if let Some(uid) = setup.uid
        && unsafe { libc::setuid(uid) } < 0
    {
        raw::exit_now(1);
    }

    if install_stdio(setup.stdio).is_err() {
        raw::exit_now(1);
    }

    let code = entry.enter(env);
    raw::exit_now(code)
}

/// dup2 the triple onto 0, 1 and 2.
///
/// Sources below 3 that sit on another slot are first moved out of the
/// way so no install clobbers a later source.
fn install_stdio(stdio: [RawFd; 3]) -> Result<(), i32> {
    let mut sources = stdio;
    for (slot, fd) in sources.iter_mut().enumerate() {
        if *fd >= 0 && *fd < 3 && *fd != slot as RawFd {
            let moved = unsafe { libc::fcntl(*fd, libc::F_DUPFD_CLOEXEC, 3) };
            if moved < 0 {
                return Err(raw::errno());
            }
            *fd = moved;
        }
    }

    for (slot, fd) in sources.iter().enumerate() {
        let slot = slot as RawFd;
        if *fd < 0 {
            continue;
        }
        if *fd == slot {
            let flags = unsafe { libc::fcntl(slot, libc::F_GETFD) };
            if flags >= 0 {
                unsafe { libc::fcntl(slot, libc::F_SETFD, flags & !libc::FD_CLOEXEC) };
            }
        } else if unsafe { libc::dup2(*fd, slot) } < 0 {
            return Err(raw::errno());
        }
    }
    Ok(())
}
