use crate::config::ChunkPause;
use std::{future::Future, time::Duration};

/// Runs delayed work on the task that owns the connection.
///
/// The wait is a timer, not a blocked thread: other connections keep
/// running on the same worker while a tail is pending. Work scheduled for
/// one connection runs in the order it was scheduled, since the owning
/// task awaits each one before moving on.
#[derive(Debug, Clone, Default)]
pub struct DelayScheduler {
    pause: ChunkPause,
}

impl DelayScheduler {
    /// Scheduler reading its pause from `pause` on every response.
    pub fn new(pause: ChunkPause) -> Self {
        Self { pause }
    }

    /// Current pause before a delayed tail, re-read on every call.
    #[inline]
    pub fn pause(&self) -> Duration {
        self.pause.get()
    }

    /// Waits `delay`, then runs `task`.
    pub async fn run_after<F: Future>(&self, delay: Duration, task: F) -> F::Output {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        task.await
    }
}
