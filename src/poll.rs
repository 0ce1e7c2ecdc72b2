/// Polling fallback trigger: checks immediately, then on a fixed interval,
/// catching anything the event stream missed.
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::guard::NameGuard;
use crate::platform::PlatformClient;

/// Handle to a running poll loop.
pub struct PollHandle<C> {
    guard: NameGuard<C>,
    task: JoinHandle<()>,
}

impl<C: PlatformClient> PollHandle<C> {
    /// Stop the loop: cancels the repeat and any pending scheduled
    /// correction. An in-flight write is left to finish.
    pub fn stop(self) {
        self.task.abort();
        self.guard.cancel_pending();
    }
}

/// Start the poll loop. The first check runs right away.
pub fn start<C: PlatformClient>(guard: NameGuard<C>, interval: Duration) -> PollHandle<C> {
    let task = {
        let guard = guard.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!("poll tick");
                guard.evaluate(false).await;
            }
        })
    };
    PollHandle { guard, task }
}
