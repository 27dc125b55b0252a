//! Startup task contract and completion signalling.

mod coordinator;
mod demo_data;
mod users;

pub use coordinator::TaskCoordinator;
pub use demo_data::DataSeedingTask;
pub use users::UserProvisioningTask;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Notify;

use crate::auth::AuthError;
use crate::http::HttpError;
use crate::keycloak::BatchError;

/// Why a task gave up. Per-entity and best-effort failures are logged inside
/// the task body and never become a `TaskError`.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0} did not become available within the retry budget")]
    Unavailable(&'static str),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("remote operation failed with status {status}")]
    RemoteOperation { status: reqwest::StatusCode },
    #[error(transparent)]
    UserBatch(#[from] BatchError),
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// One independent unit of bootstrap work.
///
/// `run` consumes the task, so a task executes at most once per process.
/// Tasks share no mutable state with each other; the only shared resource is
/// the [`CompletionBarrier`] held by the coordinator.
pub trait StartupTask: Send + 'static {
    fn name(&self) -> &'static str;

    /// Read once at dispatch. A disabled task is logged and skipped without
    /// consuming a barrier slot.
    fn is_enabled(&self) -> bool;

    fn run(self: Box<Self>) -> BoxFuture<'static, Result<(), TaskError>>;
}

/// Counts outstanding tasks. `wait` resolves once every [`CompletionGuard`]
/// handed out has been dropped.
#[derive(Clone)]
pub struct CompletionBarrier {
    inner: Arc<BarrierInner>,
}

struct BarrierInner {
    remaining: AtomicUsize,
    notify: Notify,
}

impl CompletionBarrier {
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                remaining: AtomicUsize::new(count),
                notify: Notify::new(),
            }),
        }
    }

    /// Claim one slot. The returned guard signals completion when dropped,
    /// which happens on success, error, and panic paths alike.
    pub fn guard(&self) -> CompletionGuard {
        CompletionGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Block until the counter reaches zero.
    pub async fn wait(&self) {
        loop {
            // Register interest before re-checking so a decrement between the
            // check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Scoped "run-then-signal" token: decrements its barrier exactly once, on
/// drop.
pub struct CompletionGuard {
    inner: Arc<BarrierInner>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.inner.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_all_guards_drop() {
        let barrier = CompletionBarrier::new(3);
        assert_eq!(barrier.remaining(), 3);

        for delay in [30u64, 10, 20] {
            let guard = barrier.guard();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                drop(guard);
            });
        }

        tokio::time::timeout(Duration::from_secs(5), barrier.wait())
            .await
            .expect("barrier should reach zero");
        assert_eq!(barrier.remaining(), 0);
    }

    #[tokio::test]
    async fn test_empty_barrier_resolves_immediately() {
        let barrier = CompletionBarrier::new(0);
        barrier.wait().await;
    }

    #[tokio::test]
    async fn test_guard_signals_on_panic() {
        let barrier = CompletionBarrier::new(1);
        let guard = barrier.guard();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("task blew up");
        });
        assert!(handle.await.is_err());

        tokio::time::timeout(Duration::from_secs(5), barrier.wait())
            .await
            .expect("panic must still release the slot");
    }

    #[tokio::test]
    async fn test_each_guard_decrements_once() {
        let barrier = CompletionBarrier::new(2);
        drop(barrier.guard());
        assert_eq!(barrier.remaining(), 1);
        drop(barrier.guard());
        assert_eq!(barrier.remaining(), 0);
    }
}
