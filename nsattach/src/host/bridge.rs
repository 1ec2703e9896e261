//! Worker bridge: blocking work off the host context, results back on it.

use std::rc::Rc;
use std::sync::Arc;

use nsattach_shared::errors::{NsattachError, NsattachResult};
use tokio::sync::Semaphore;

use super::keepalive::KeepAlive;
use crate::runtime::{ContainerBackend, ContainerHandle, ContainerRef};

/// Whether an operation needs the container to be defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Requirement {
    Defined,
    Any,
}

/// Runs blocking closures on tokio's blocking pool, at most
/// `worker_threads` at a time, and completes them on the host's task.
///
/// Each operation holds the host keep-alive from the moment it is
/// scheduled until its result has been delivered.
#[derive(Clone)]
pub(crate) struct WorkerBridge {
    permits: Arc<Semaphore>,
    keep_alive: Rc<KeepAlive>,
}

impl WorkerBridge {
    pub(crate) fn new(worker_threads: usize, keep_alive: Rc<KeepAlive>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(worker_threads.max(1))),
            keep_alive,
        }
    }

    /// Run `work` on a worker and await its result.
    pub(crate) async fn run<T, F>(&self, work: F) -> NsattachResult<T>
    where
        F: FnOnce() -> NsattachResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let _hold = self.keep_alive.hold();
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| NsattachError::Internal(format!("worker pool closed: {}", e)))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| NsattachError::Internal(format!("worker task failed: {}", e)))?
    }

    /// Run a container operation with the standard preconditions.
    ///
    /// A reference on the container is held around `op`: invalid
    /// reference, then control privilege, then (if required) defined.
    pub(crate) async fn run_on<T, F>(
        &self,
        container: &ContainerHandle,
        requirement: Requirement,
        op: F,
    ) -> NsattachResult<T>
    where
        F: FnOnce(&dyn ContainerBackend) -> NsattachResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let container = container.clone();
        self.run(move || {
            let container = ContainerRef::acquire(&container)?;
            if !container.may_control() {
                return Err(NsattachError::PermissionDenied);
            }
            if requirement == Requirement::Defined && !container.is_defined() {
                return Err(NsattachError::NotDefined);
            }
            op(&*container)
        })
        .await
    }

    /// Schedule `work` and call `callback` with its result on the host's
    /// task. Returns immediately. Must be called inside a `LocalSet`.
    pub(crate) fn queue<T, F, C>(&self, work: F, callback: C)
    where
        F: FnOnce() -> NsattachResult<T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(NsattachResult<T>) + 'static,
    {
        // Held from now, not from when the task first runs
        let hold = self.keep_alive.hold();
        let bridge = self.clone();
        tokio::task::spawn_local(async move {
            let result = bridge.run(work).await;
            callback(result);
            drop(hold);
        });
    }
}
