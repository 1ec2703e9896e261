//! nsattach: launch and supervise processes inside running Linux
//! containers from a single-threaded host.
//!
//! The engine has five parts:
//! - [`fd`]: stdio plumbing (pty or socket pairs) and the exec error pipe
//! - `attach`: the orchestrator that enters a container and runs a command
//! - `reaper`: SIGCHLD-driven reaping of attached children
//! - the worker bridge that runs blocking container calls off the host
//! - [`Host`] and [`Container`], the caller-facing API
//!
//! Container runtimes plug in through [`runtime::ContainerBackend`];
//! [`runtime::LocalBackend`] implements it on an lxc-style directory layout.

mod attach;
pub mod fd;
mod host;
mod lifecycle;
pub mod logging;
mod options;
mod reaper;
pub mod runtime;
mod util;

pub use attach::{AttachCommand, ExecCommand, OpenCommand};
pub use fd::{TerminalSize, resize, window_size};
pub use host::{
    AttachedProcess, ConfigValue, Container, ExitEvent, GetOptions, Host, OpenOptions,
    ProcessOptions, ProcessState, StdioStream, parse_open_flags, version,
};
pub use logging::init_logging;
pub use options::HostOptions;
pub use reaper::ExitCallback;
pub use runtime::{CloneOptions, ContainerState, EnvPolicy, NamespaceSet};
pub use util::signal_name;

pub use nsattach_shared::errors::{NsattachError, NsattachResult};
