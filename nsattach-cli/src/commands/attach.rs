use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use clap::Args;
use nix::sys::signal::Signal;
use nsattach::{
    AttachedProcess, EnvPolicy, ExitEvent, NamespaceSet, NsattachError, NsattachResult,
    ProcessOptions, StdioStream,
};
use tokio::io::{self, AsyncWrite, AsyncWriteExt};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;

use crate::terminal::{self, RawMode};

/// Exit status when the command could not be executed, as in a shell.
const EXIT_EXEC_FAILED: i32 = 127;

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Allocate a pseudo-terminal for the command
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Set an environment variable (KEY=VALUE, or KEY to copy ours)
    #[arg(short = 'e', long = "env", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Start from this process's environment instead of an empty one
    #[arg(long)]
    pub keep_env: bool,

    /// Working directory inside the container
    #[arg(long, default_value = "/")]
    pub cwd: PathBuf,

    /// Namespaces to enter, comma separated (mount,uts,ipc,user,pid,net)
    #[arg(long, value_parser = parse_namespaces)]
    pub namespaces: Option<NamespaceSet>,

    /// Stay in the current cgroup
    #[arg(long)]
    pub no_cgroup: bool,

    /// User id to run the command as
    #[arg(short = 'u', long)]
    pub uid: Option<u32>,

    /// Group id to run the command as
    #[arg(short = 'g', long)]
    pub gid: Option<u32>,

    /// Name of the running container
    pub name: String,

    /// Command and its arguments
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("invalid environment variable: {}", s)),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => std::env::var(s)
            .map(|value| (s.to_string(), value))
            .map_err(|_| format!("{} is not set in the current environment", s)),
    }
}

fn parse_namespaces(s: &str) -> Result<NamespaceSet, NsattachError> {
    NamespaceSet::from_str(s)
}

impl AttachArgs {
    fn process_options(&self) -> ProcessOptions {
        let mut options = ProcessOptions::default()
            .cwd(&self.cwd)
            .cgroup(!self.no_cgroup);
        for (key, value) in &self.env {
            options = options.env(key, value);
        }
        if self.keep_env {
            options = options.env_policy(EnvPolicy::Keep);
        }
        if let Some(namespaces) = self.namespaces {
            options = options.namespaces(namespaces);
        }
        if let Some(uid) = self.uid {
            options = options.uid(uid);
        }
        if let Some(gid) = self.gid {
            options = options.gid(gid);
        }
        if self.tty {
            options = options.terminal(terminal::host_size().unwrap_or_default());
        }
        options
    }
}

/// Returns the exit status to leave with: the command's exit code,
/// 128 + signal number when it was killed, 127 when it could not run.
pub async fn execute(args: AttachArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    let host = global.create_host()?;
    let container = global.container(&host, &args.name).await?;

    let (program, program_args) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow!("missing command"))?;

    let options = args.process_options();
    let process = container.attach(program, program_args, options)?;

    let raw_mode = if args.tty { RawMode::enable()? } else { None };
    let outputs = forward_stdio(&process)?;
    let resizer = if args.tty {
        Some(forward_resize(process.clone())?)
    } else {
        None
    };

    let code = match process.wait_attached().await {
        Ok(pid) => {
            tracing::debug!(pid, container = %args.name, "attached");
            let event = process.wait().await?;
            for output in outputs {
                let _ = output.await;
            }
            exit_code(&event)
        }
        Err(NsattachError::Spawn { program, errno }) => {
            drop(raw_mode);
            eprintln!("{}: {}", program, std::io::Error::from_raw_os_error(errno));
            return Ok(EXIT_EXEC_FAILED);
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(resizer) = resizer {
        resizer.abort();
    }
    drop(raw_mode);
    Ok(code)
}

fn take(slot: Option<NsattachResult<StdioStream>>) -> anyhow::Result<StdioStream> {
    Ok(slot.ok_or_else(|| anyhow!("stdio already taken"))??)
}

/// Copy our stdin to the command and its output to ours. Returns the
/// output copies, which finish when the command closes its side.
fn forward_stdio(process: &AttachedProcess) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let input = take(process.stdin())?;
    tokio::task::spawn_local(forward_input(input));

    let mut outputs = vec![tokio::task::spawn_local(forward_output(
        take(process.stdout())?,
        io::stdout(),
    ))];
    // With a terminal, stderr is the same stream as stdout
    if !process.is_terminal() {
        outputs.push(tokio::task::spawn_local(forward_output(
            take(process.stderr())?,
            io::stderr(),
        )));
    }
    Ok(outputs)
}

async fn forward_input(mut child: StdioStream) {
    let mut stdin = io::stdin();
    if let Err(e) = io::copy(&mut stdin, &mut child).await {
        tracing::debug!(error = %e, "stdin forwarding stopped");
    }
    let _ = child.shutdown().await;
}

async fn forward_output<W: AsyncWrite + Unpin>(mut child: StdioStream, mut out: W) {
    if let Err(e) = io::copy(&mut child, &mut out).await {
        tracing::debug!(error = %e, "output forwarding stopped");
    }
    let _ = out.flush().await;
}

fn forward_resize(process: AttachedProcess) -> anyhow::Result<JoinHandle<()>> {
    let mut winch = signal(SignalKind::window_change())?;
    Ok(tokio::task::spawn_local(async move {
        while winch.recv().await.is_some() {
            if let Some(size) = terminal::host_size()
                && let Err(e) = process.resize(size.columns, size.rows)
            {
                tracing::debug!(error = %e, "failed to forward window size");
            }
        }
    }))
}

fn exit_code(event: &ExitEvent) -> i32 {
    match (event.exit_code, event.signal.as_deref()) {
        (Some(code), _) if code < 0 => EXIT_EXEC_FAILED,
        (Some(code), _) => code,
        (None, Some(name)) => Signal::from_str(name).map_or(1, |signal| 128 + signal as i32),
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("A=1=2").unwrap(),
            ("A".to_string(), "1=2".to_string())
        );
        assert_eq!(parse_env("EMPTY=").unwrap(), ("EMPTY".to_string(), String::new()));
        assert!(parse_env("=x").is_err());
        assert!(parse_env("NSATTACH_SURELY_UNSET_VARIABLE").is_err());
    }

    #[test]
    fn test_parse_namespaces() {
        let set = parse_namespaces("mount,pid").unwrap();
        assert_eq!(set, NamespaceSet::MOUNT.union(NamespaceSet::PID));
        assert!(parse_namespaces("bogus").is_err());
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(&ExitEvent::exited(0)), 0);
        assert_eq!(exit_code(&ExitEvent::exited(42)), 42);
        assert_eq!(exit_code(&ExitEvent::signaled("SIGKILL")), 137);
        assert_eq!(exit_code(&ExitEvent::signaled("SIGTERM")), 143);
        assert_eq!(exit_code(&ExitEvent::exec_failed(nix::errno::Errno::ENOENT as i32)), 127);
        assert_eq!(exit_code(&ExitEvent::already_reaped()), 1);
    }
}
