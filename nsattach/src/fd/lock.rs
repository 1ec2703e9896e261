//! Process-wide ordering between descriptor creation and forking.
//!
//! A child forked while another thread sits between creating a descriptor
//! and marking it close-on-exec would inherit that descriptor across exec.
//! Non-atomic creation paths take the shared side; the attach call that
//! forks takes the exclusive side for the duration of the fork only.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard, const_rwlock};

static CLOEXEC_LOCK: RwLock<()> = const_rwlock(());

/// Held while a descriptor exists without FD_CLOEXEC set.
pub(crate) fn creation_guard() -> RwLockReadGuard<'static, ()> {
    CLOEXEC_LOCK.read()
}

/// Held around the call that creates a new child process.
pub(crate) fn fork_guard() -> RwLockWriteGuard<'static, ()> {
    CLOEXEC_LOCK.write()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_guards_are_shared() {
        let a = creation_guard();
        let b = creation_guard();
        assert!(CLOEXEC_LOCK.try_write().is_none());
        drop(a);
        drop(b);
    }

    #[test]
    fn test_fork_guard_excludes_creation() {
        let guard = fork_guard();
        assert!(CLOEXEC_LOCK.try_read().is_none());
        drop(guard);
        assert!(CLOEXEC_LOCK.try_read().is_some());
    }
}
