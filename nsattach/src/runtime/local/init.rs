//! Starting and stopping a container's init process.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use nix::fcntl::OFlag;
use nix::sched::CloneFlags;
use nix::unistd::pipe2;
use nsattach_shared::errors::{NsattachError, NsattachResult};

use super::attach::{
    STAGE_DONE, STAGE_FORK, STAGE_HOSTNAME, STAGE_ID_MAP, STAGE_UNSHARE, receive_status,
    send_status, stage_name,
};
use crate::fd::{ErrorPipe, ExecStatus, report_exec_error};
use crate::runtime::{ContainerConfig, EnvPolicy, Environment, NamespaceSet};
use crate::util::exec::ExecTarget;
use crate::util::process::{PidRecord, is_record_alive, proc_stat};
use crate::util::raw;

const DEFAULT_INIT: &str = "/sbin/init";
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_POLL: Duration = Duration::from_millis(20);

/// Single-id user namespace mapping written by the intermediate.
struct IdMaps {
    setgroups: CString,
    uid_map: CString,
    gid_map: CString,
    uid_line: Vec<u8>,
    gid_line: Vec<u8>,
}

impl IdMaps {
    fn for_current_user() -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self {
            setgroups: c"/proc/self/setgroups".to_owned(),
            uid_map: c"/proc/self/uid_map".to_owned(),
            gid_map: c"/proc/self/gid_map".to_owned(),
            uid_line: format!("0 {} 1", uid).into_bytes(),
            gid_line: format!("0 {} 1", gid).into_bytes(),
        }
    }

    /// Async-signal-safe.
    fn write(&self) -> Result<(), i32> {
        // setgroups may be absent on old kernels
        let _ = write_proc(&self.setgroups, b"deny");
        write_proc(&self.uid_map, &self.uid_line)?;
        write_proc(&self.gid_map, &self.gid_line)
    }
}

fn write_proc(path: &CString, data: &[u8]) -> Result<(), i32> {
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(raw::errno());
    }
    let result = raw::write_all(fd, data);
    unsafe { libc::close(fd) };
    result
}

/// Namespaces listed in `lxc.namespace.clone`. `mnt` is accepted as the
/// kernel's name for the mount namespace.
fn clone_namespaces(config: &ContainerConfig) -> NsattachResult<NamespaceSet> {
    let value = config.value("lxc.namespace.clone").unwrap_or_default();
    NamespaceSet::parse(
        value
            .split_whitespace()
            .map(|name| if name == "mnt" { "mount" } else { name }),
    )
}

fn init_argv(config: &ContainerConfig, argv: &[String]) -> Vec<String> {
    if !argv.is_empty() {
        return argv.to_vec();
    }
    match config.value("lxc.init.cmd") {
        Some(cmd) if !cmd.trim().is_empty() => {
            cmd.split_whitespace().map(str::to_string).collect()
        }
        _ => vec![DEFAULT_INIT.to_string()],
    }
}

fn parse_id(config: &ContainerConfig, key: &str) -> NsattachResult<Option<u32>> {
    match config.value(key) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| NsattachError::Config(format!("{}: invalid id '{}'", key, v))),
    }
}

struct InitSetup {
    target: ExecTarget,
    env: Environment,
    cwd: CString,
    hostname: Option<CString>,
    uid: Option<u32>,
    gid: Option<u32>,
    console: CString,
    flags: CloneFlags,
    id_maps: Option<IdMaps>,
}

impl InitSetup {
    fn new(name: &str, config: &ContainerConfig, argv: &[String]) -> NsattachResult<Self> {
        let argv = init_argv(config, argv);
        let extra_env: Vec<(String, String)> = config
            .values("lxc.environment")
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let env = Environment::build(EnvPolicy::Clear, &extra_env)?;

        let mut target = ExecTarget::new(&argv[0], &argv[1..])?;
        target.resolve(env.get("PATH"));

        let flags = clone_namespaces(config)?.flags();
        let hostname = if flags.contains(CloneFlags::CLONE_NEWUTS) {
            let uts = config.value("lxc.uts.name").unwrap_or(name);
            Some(CString::new(uts).map_err(|_| {
                NsattachError::Config("lxc.uts.name contains a NUL byte".into())
            })?)
        } else {
            None
        };

        let cwd = config.value("lxc.init.cwd").unwrap_or("/");
        let console = config.value("lxc.console.logfile").unwrap_or("/dev/null");
        let nul = |what: &str| NsattachError::Config(format!("{} contains a NUL byte", what));

        Ok(Self {
            target,
            env,
            cwd: CString::new(cwd).map_err(|_| nul("lxc.init.cwd"))?,
            hostname,
            uid: parse_id(config, "lxc.init.uid")?,
            gid: parse_id(config, "lxc.init.gid")?,
            console: CString::new(console).map_err(|_| nul("lxc.console.logfile"))?,
            flags,
            id_maps: flags
                .contains(CloneFlags::CLONE_NEWUSER)
                .then(IdMaps::for_current_user),
        })
    }
}

/// Spawn the init and wait until it has exec'd.
pub(super) fn spawn(name: &str, config: &ContainerConfig, argv: &[String]) -> NsattachResult<PidRecord> {
    let setup = InitSetup::new(name, config, argv)?;
    let program = setup.target.program();

    let stdin = std::fs::File::open("/dev/null")?;
    let mut error_pipe = ErrorPipe::new()?;
    let (status_read, status_write) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| NsattachError::from(io::Error::from(e)))?;

    tracing::debug!(container = name, program = %program, namespaces = ?setup.flags, "spawning init");

    let helper = unsafe { libc::fork() };
    if helper < 0 {
        return Err(io::Error::last_os_error().into());
    }
    if helper == 0 {
        intermediate(
            &setup,
            stdin.as_raw_fd(),
            error_pipe.write_fd(),
            status_write.as_raw_fd(),
        );
    }

    drop(status_write);
    error_pipe.close_write();

    let pid = receive_status(status_read, helper).map_err(|(stage, errno)| {
        NsattachError::Internal(format!(
            "{}: {}",
            stage_name(stage),
            io::Error::from_raw_os_error(errno)
        ))
    })?;

    if let ExecStatus::Failed(errno) = error_pipe.read_status()? {
        return Err(NsattachError::Spawn { program, errno });
    }

    let start_time = proc_stat(pid).map(|s| s.start_time).unwrap_or(0);
    tracing::info!(container = name, pid, "init started");
    Ok(PidRecord { pid, start_time })
}

fn intermediate(setup: &InitSetup, stdin: RawFd, error_fd: RawFd, status_fd: RawFd) -> ! {
    unsafe { libc::setsid() };

    let unshare_flags = setup.flags & !CloneFlags::CLONE_NEWPID;
    if !unshare_flags.is_empty() && unsafe { libc::unshare(unshare_flags.bits()) } < 0 {
        send_status(status_fd, STAGE_UNSHARE, raw::errno());
        raw::exit_now(1);
    }

    if let Some(maps) = &setup.id_maps
        && let Err(errno) = maps.write()
    {
        send_status(status_fd, STAGE_ID_MAP, errno);
        raw::exit_now(1);
    }

    if let Some(hostname) = &setup.hostname
        && unsafe { libc::sethostname(hostname.as_ptr(), hostname.as_bytes().len()) } < 0
    {
        send_status(status_fd, STAGE_HOSTNAME, raw::errno());
        raw::exit_now(1);
    }

    // Children created after this become pid 1 of the new namespace
    if setup.flags.contains(CloneFlags::CLONE_NEWPID)
        && unsafe { libc::unshare(libc::CLONE_NEWPID) } < 0
    {
        send_status(status_fd, STAGE_UNSHARE, raw::errno());
        raw::exit_now(1);
    }

    let pid = unsafe { libc::fork() };
    if pid == 0 {
        init_child(setup, stdin, error_fd);
    }
    if pid < 0 {
        send_status(status_fd, STAGE_FORK, raw::errno());
        raw::exit_now(1);
    }

    send_status(status_fd, STAGE_DONE, pid);
    raw::exit_now(0)
}

fn init_child(setup: &InitSetup, stdin: RawFd, error_fd: RawFd) -> ! {
    let console = unsafe {
        libc::open(
            setup.console.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND | libc::O_CLOEXEC,
            0o640 as libc::c_uint,
        )
    };
    if console < 0 {
        report_exec_error(error_fd, raw::errno());
        raw::exit_now(1);
    }
    for (fd, slot) in [(stdin, 0), (console, 1), (console, 2)] {
        if unsafe { libc::dup2(fd, slot) } < 0 {
            report_exec_error(error_fd, raw::errno());
            raw::exit_now(1);
        }
    }

    if unsafe { libc::chdir(setup.cwd.as_ptr()) } < 0 {
        report_exec_error(error_fd, raw::errno());
        raw::exit_now(1);
    }
    if let Some(gid) = setup.gid
        && unsafe { libc::setgid(gid) } < 0
    {
        report_exec_error(error_fd, raw::errno());
        raw::exit_now(1);
    }
    if let Some(uid) = setup.uid
        && unsafe { libc::setuid(uid) } < 0
    {
        report_exec_error(error_fd, raw::errno());
        raw::exit_now(1);
    }

    let errno = setup.target.exec(setup.env.as_cstrings());
    report_exec_error(error_fd, errno);
    raw::exit_now(nsattach_shared::constants::exit::EXEC_FAILED)
}

/// SIGKILL the init and wait for it to die.
pub(super) fn kill(record: PidRecord) -> NsattachResult<()> {
    let rc = unsafe { libc::kill(record.pid, libc::SIGKILL) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err.into());
        }
    }

    let deadline = Instant::now() + STOP_TIMEOUT;
    while is_record_alive(record) {
        if Instant::now() >= deadline {
            return Err(NsattachError::Internal(format!(
                "init {} did not exit within {:?}",
                record.pid, STOP_TIMEOUT
            )));
        }
        std::thread::sleep(STOP_POLL);
    }
    tracing::info!(pid = record.pid, "init stopped");
    Ok(())
}
