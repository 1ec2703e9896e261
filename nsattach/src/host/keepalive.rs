//! Host keep-alive counter.

use std::cell::Cell;
use std::rc::Rc;

use tokio::sync::Notify;

/// Counts the things the host must stay running for: in-flight worker
/// operations and the reaper while it has interested processes.
pub(crate) struct KeepAlive {
    count: Cell<usize>,
    idle: Notify,
}

impl KeepAlive {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            count: Cell::new(0),
            idle: Notify::new(),
        })
    }

    pub(crate) fn acquire(&self) {
        self.count.set(self.count.get() + 1);
    }

    pub(crate) fn release(&self) {
        let count = self.count.get().saturating_sub(1);
        self.count.set(count);
        if count == 0 {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.get()
    }

    /// Acquire until the returned guard is dropped.
    pub(crate) fn hold(self: &Rc<Self>) -> KeepAliveGuard {
        self.acquire();
        KeepAliveGuard {
            keep_alive: self.clone(),
        }
    }

    /// Resolves once the count is zero.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct KeepAliveGuard {
    keep_alive: Rc<KeepAlive>,
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.keep_alive.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_guard_releases() {
        let keep_alive = KeepAlive::new();
        let guard = keep_alive.hold();
        let second = keep_alive.hold();
        assert_eq!(keep_alive.count(), 2);
        drop(guard);
        drop(second);
        assert_eq!(keep_alive.count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_on_release() {
        let keep_alive = KeepAlive::new();
        keep_alive.wait_idle().await;

        let guard = keep_alive.hold();
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    drop(guard);
                });
                tokio::time::timeout(Duration::from_secs(5), keep_alive.wait_idle())
                    .await
                    .unwrap();
            })
            .await;
        assert_eq!(keep_alive.count(), 0);
    }
}
