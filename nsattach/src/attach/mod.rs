//! Attach orchestration: run a command inside a running container.
//!
//! An [`AttachRequest`] bundles the target container, the command and the
//! child-side descriptors. [`execute`] runs it to completion on the calling
//! (worker) thread and produces an [`AttachOutcome`].

mod command;
mod orchestrator;

pub use command::{AttachCommand, ExecCommand, OpenCommand};
pub(crate) use orchestrator::execute;

use crate::fd::ChildFds;
use crate::runtime::{AttachOptions, ContainerHandle};

/// Input to one attach operation. Owns the child-side descriptors, which
/// are closed when the request is dropped.
pub struct AttachRequest {
    pub container: ContainerHandle,
    pub command: Box<dyn AttachCommand>,
    /// The stdio triple in `options` is filled in from `stdio`.
    pub options: AttachOptions,
    pub stdio: ChildFds,
    /// Slots 0 to 2 alias a pty slave that becomes the controlling terminal.
    pub terminal: bool,
}

impl AttachRequest {
    pub fn new(
        container: ContainerHandle,
        command: Box<dyn AttachCommand>,
        options: AttachOptions,
        stdio: ChildFds,
        terminal: bool,
    ) -> Self {
        Self {
            container,
            command,
            options,
            stdio,
            terminal,
        }
    }
}

/// Result of a successful attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOutcome {
    pub pid: i32,
    /// errno of the failed exec, 0 when the command ran.
    pub exec_errno: i32,
}

impl AttachOutcome {
    pub fn is_exec_failure(&self) -> bool {
        self.exec_errno != 0
    }
}
