//! Fan-out / fan-in coordination of startup tasks.

use futures_util::FutureExt;
use tracing::{error, info, warn};

use super::{CompletionBarrier, StartupTask};

/// Launches every enabled task on its own tokio task and waits until all of
/// them have signalled completion, in any order.
///
/// `run` consumes the coordinator, so a registry is dispatched at most once
/// per process. The coordinator never joins individual tasks; the barrier is
/// the only completion channel, and it reaches zero whether tasks succeed,
/// fail, or panic.
pub struct TaskCoordinator {
    tasks: Vec<Box<dyn StartupTask>>,
}

impl TaskCoordinator {
    pub fn new(tasks: Vec<Box<dyn StartupTask>>) -> Self {
        Self { tasks }
    }

    /// Run all enabled tasks to completion. Returns once every enabled task
    /// has finished, successfully or not; the return itself carries no
    /// per-task verdict (failures are visible in logs only).
    pub async fn run(self) {
        let (enabled, disabled): (Vec<_>, Vec<_>) =
            self.tasks.into_iter().partition(|task| task.is_enabled());

        for task in &disabled {
            info!("Task '{}' is disabled, skipping", task.name());
        }

        let barrier = CompletionBarrier::new(enabled.len());
        info!("Launching {} startup task(s)", enabled.len());

        for task in enabled {
            let name = task.name();
            let guard = barrier.guard();
            tokio::spawn(async move {
                // The guard is dropped on every exit path of this block,
                // counting the task as finished even when it panics.
                let _guard = guard;
                let outcome = std::panic::AssertUnwindSafe(task.run())
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => info!("Task '{}' completed", name),
                    Ok(Err(err)) => error!("Task '{}' failed: {}", name, err),
                    Err(_) => error!("Task '{}' panicked", name),
                }
            });
        }

        loop {
            tokio::select! {
                _ = barrier.wait() => break,
                _ = tokio::signal::ctrl_c() => {
                    // Degraded-but-safe fallback: keep waiting on in-flight
                    // tasks instead of forcing a shutdown.
                    warn!(
                        "Interrupted while waiting; {} task(s) still in flight",
                        barrier.remaining()
                    );
                }
            }
        }

        info!("All tasks completed. Shutting down the application.");
    }
}
