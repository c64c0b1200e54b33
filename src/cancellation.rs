//! Cancellable periodic task: CancellationToken + JoinHandle pair.
//! Cancelling consumes the handle, so a task can only be stopped once, and a
//! biased select guarantees no tick body runs after `cancel()` returns.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a task that invokes a closure on a fixed period until cancelled.
pub struct PeriodicTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `on_tick` every `period`, first firing one full period from now.
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(name: &'static str, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.child_token();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // The token may have flipped while this task was queued.
                if child.is_cancelled() {
                    break;
                }
                on_tick();
            }
            debug!(task = name, "periodic task exited");
        });
        Self { name, token, handle }
    }

    /// Stop the task. No further tick runs once this returns.
    pub fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
        debug!(task = self.name, "periodic task cancelled");
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        // Dropping without cancel() must not leak a running cue.
        self.token.cancel();
    }
}

/// Run `fut` unless `token` fires first. Returns `None` when cancelled.
pub async fn run_until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}
