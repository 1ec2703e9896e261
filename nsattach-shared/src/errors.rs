//! Error types for container and attach operations.
//!
//! Precondition failures carry the messages lxc bindings have always used
//! ("Container is not running", ...), so callers can match on text as well
//! as on variant.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result alias used throughout nsattach.
pub type NsattachResult<T> = Result<T, NsattachError>;

/// Errors surfaced to callers of the engine.
///
/// The type is `Clone` so one failure can be observed by every waiter on a
/// process handle; I/O errors are shared behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum NsattachError {
    // ========================================================================
    // Preconditions
    // ========================================================================
    /// The underlying container object has already been released.
    #[error("Invalid container reference")]
    InvalidReference,

    /// The caller may not control this container.
    #[error("Insufficient privileges to control container")]
    PermissionDenied,

    /// The container has no configuration on disk.
    #[error("Container is not defined")]
    NotDefined,

    /// Lookup of a container that is required to exist failed.
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container is not running")]
    NotRunning,

    #[error("Container is running")]
    Running,

    #[error("Container already exists")]
    AlreadyExists,

    // ========================================================================
    // Attach
    // ========================================================================
    /// The namespace-entry primitive itself failed.
    #[error("Could not attach to container: {0}")]
    Attach(String),

    /// Attach succeeded but the program could not be executed.
    #[error("spawn {program}: {}", io::Error::from_raw_os_error(*errno))]
    Spawn { program: String, errno: i32 },

    /// The process handle has no pid yet.
    #[error("Process is not attached")]
    NotAttached,

    /// Descriptor or terminal allocation failed.
    #[error("failed to allocate descriptors: {0}")]
    Allocation(Arc<io::Error>),

    // ========================================================================
    // Container operations
    // ========================================================================
    /// A blocking container operation reported failure.
    ///
    /// `message` is the operation-level text ("Failed to start container"),
    /// `reason` is what the backend said.
    #[error("{message}: {reason}")]
    Operation {
        message: &'static str,
        reason: String,
    },

    /// Configuration key or value rejected.
    #[error("{0}")]
    Config(String),

    /// Cgroup item could not be read or written.
    #[error("{0}")]
    Cgroup(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ========================================================================
    // Catch-all
    // ========================================================================
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NsattachError {
    /// Wrap a backend failure under an operation-level message.
    pub fn operation(message: &'static str, reason: impl ToString) -> Self {
        Self::Operation {
            message,
            reason: reason.to_string(),
        }
    }

    /// Build an allocation error from an I/O error.
    pub fn allocation(err: io::Error) -> Self {
        Self::Allocation(Arc::new(err))
    }

    /// OS error number carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(e) | Self::Allocation(e) => e.raw_os_error(),
            Self::Spawn { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

impl From<io::Error> for NsattachError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_messages() {
        assert_eq!(
            NsattachError::InvalidReference.to_string(),
            "Invalid container reference"
        );
        assert_eq!(
            NsattachError::PermissionDenied.to_string(),
            "Insufficient privileges to control container"
        );
        assert_eq!(
            NsattachError::NotRunning.to_string(),
            "Container is not running"
        );
    }

    #[test]
    fn test_operation_message() {
        let err = NsattachError::operation("Failed to start container", "no init");
        assert_eq!(err.to_string(), "Failed to start container: no init");
    }

    #[test]
    fn test_spawn_carries_errno() {
        let err = NsattachError::Spawn {
            program: "nope".into(),
            errno: 2,
        };
        assert_eq!(err.raw_os_error(), Some(2));
        assert!(err.to_string().starts_with("spawn nope:"));
    }

    #[test]
    fn test_io_error_is_shared_on_clone() {
        let err: NsattachError = io::Error::from_raw_os_error(13).into();
        let copy = err.clone();
        assert_eq!(copy.raw_os_error(), Some(13));
    }
}
