/// The name guard: keeps one conversation's display name equal to a
/// configured value without feedback loops.
///
/// Two trigger sources (the event listener and the poll loop) call
/// [`NameGuard::evaluate`]; the guard throttles redundant checks, debounces
/// corrections, and re-verifies the divergence before its single write
/// attempt. A divergence that fixes itself inside the debounce window never
/// produces a write.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::platform::PlatformClient;

/// Timing knobs for the guard, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct GuardTiming {
    /// Minimum gap between accepted non-forced evaluations per thread.
    pub throttle: Duration,
    /// Delay between detecting a divergence and re-verifying it.
    pub debounce: Duration,
}

impl Default for GuardTiming {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(2000),
            debounce: Duration::from_millis(2000),
        }
    }
}

/// Cheap-to-clone handle; every clone sees the same guard state, so both
/// triggers and the correction timers coordinate through one throttle map
/// and one in-flight flag.
pub struct NameGuard<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for NameGuard<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C> {
    client: Arc<C>,
    thread_id: String,
    locked_name: String,
    timing: GuardTiming,
    state: Mutex<GuardState>,
    /// True while a correction write cycle is running. Blocks new
    /// evaluation cycles until the attempt completes either way.
    correcting: AtomicBool,
}

/// Mutable state shared by both trigger paths. Critical sections are short
/// and never held across an await.
struct GuardState {
    /// Last accepted check per thread id. Keyed by thread so the throttle
    /// extends naturally to more watched threads.
    last_check: HashMap<String, Instant>,
    pending: Option<PendingCorrection>,
    next_generation: u64,
}

/// Handle to a scheduled-but-unfired correction timer.
struct PendingCorrection {
    generation: u64,
    cancel: oneshot::Sender<()>,
}

impl<C: PlatformClient> NameGuard<C> {
    pub fn new(
        client: Arc<C>,
        thread_id: impl Into<String>,
        locked_name: impl Into<String>,
        timing: GuardTiming,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                thread_id: thread_id.into(),
                locked_name: locked_name.into(),
                timing,
                state: Mutex::new(GuardState {
                    last_check: HashMap::new(),
                    pending: None,
                    next_generation: 0,
                }),
                correcting: AtomicBool::new(false),
            }),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.inner.thread_id
    }

    fn state(&self) -> MutexGuard<'_, GuardState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check the conversation name and schedule a correction if it diverged.
    ///
    /// `forced` bypasses the per-thread throttle; the startup check uses it
    /// so a divergence present at boot is corrected immediately.
    pub async fn evaluate(&self, forced: bool) {
        let inner = &*self.inner;
        if inner.correcting.load(Ordering::SeqCst) {
            debug!("correction in flight, skipping check");
            return;
        }

        if !forced {
            let state = self.state();
            if let Some(last) = state.last_check.get(&inner.thread_id) {
                let elapsed = last.elapsed();
                if elapsed < inner.timing.throttle {
                    debug!(elapsed_ms = elapsed.as_millis() as u64, "check throttled");
                    return;
                }
            }
        }
        self.state()
            .last_check
            .insert(inner.thread_id.clone(), Instant::now());

        let info = match inner.client.thread_info(&inner.thread_id).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, thread = %inner.thread_id, "failed to fetch thread info");
                return;
            }
        };

        if info.name == inner.locked_name {
            debug!(name = %info.name, "name already locked");
            return;
        }

        warn!(
            current = %info.name,
            locked = %inner.locked_name,
            "name diverged, scheduling correction"
        );
        self.schedule_correction();
    }

    /// Arm the debounce timer, replacing any unfired correction.
    /// Last detected divergence wins.
    fn schedule_correction(&self) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let guard = self.clone();

        let mut state = self.state();
        let generation = state.next_generation;
        state.next_generation += 1;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(guard.inner.timing.debounce) => {}
                _ = cancel_rx => return,
            }
            guard.perform_scheduled_correction(generation).await;
        });

        if let Some(prev) = state.pending.replace(PendingCorrection {
            generation,
            cancel: cancel_tx,
        }) {
            let _ = prev.cancel.send(());
        }
    }

    /// Re-verify the divergence after the debounce delay, then write once.
    ///
    /// The re-check guards against the name having been fixed, or changed
    /// again, during the delay window. The in-flight flag is cleared after
    /// the write attempt regardless of outcome. There is no retry here;
    /// the next poll tick or event catches anything left diverged.
    async fn perform_scheduled_correction(&self, generation: u64) {
        let inner = &*self.inner;
        {
            let mut state = self.state();
            if state
                .pending
                .as_ref()
                .is_some_and(|p| p.generation == generation)
            {
                state.pending = None;
            }
        }

        if inner
            .correcting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("another correction still in flight");
            return;
        }

        let verified = match inner.client.thread_info(&inner.thread_id).await {
            Ok(info) => info.name,
            Err(e) => {
                error!(error = %e, "re-check before correction failed");
                inner.correcting.store(false, Ordering::SeqCst);
                return;
            }
        };

        if verified == inner.locked_name {
            info!("name recovered during the delay window, no write needed");
            inner.correcting.store(false, Ordering::SeqCst);
            return;
        }

        info!(from = %verified, to = %inner.locked_name, "resetting conversation name");
        match inner
            .client
            .set_title(&inner.locked_name, &inner.thread_id)
            .await
        {
            Ok(()) => info!(thread = %inner.thread_id, "name reset successful"),
            Err(e) => error!(error = %e, thread = %inner.thread_id, "name reset failed"),
        }
        inner.correcting.store(false, Ordering::SeqCst);
    }

    /// Cancel any scheduled-but-unfired correction. Does not interrupt an
    /// in-flight write.
    pub fn cancel_pending(&self) {
        if let Some(pending) = self.state().pending.take() {
            let _ = pending.cancel.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::ScriptedClient;

    const LOCKED: &str = "Locked";

    fn guard(client: &Arc<ScriptedClient>) -> NameGuard<ScriptedClient> {
        NameGuard::new(
            Arc::clone(client),
            "thread-1",
            LOCKED,
            GuardTiming::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn already_correct_reads_once_and_never_writes() {
        let client = ScriptedClient::with_name(LOCKED);
        let guard = guard(&client);

        guard.evaluate(true).await;
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert_eq!(client.fetches(), 1);
        assert!(client.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn divergence_is_corrected_after_debounce() {
        let client = ScriptedClient::with_name("Hacked");
        let guard = guard(&client);

        guard.evaluate(false).await;
        // Before the debounce elapses nothing has been written.
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(client.writes().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.writes(), vec![LOCKED.to_string()]);
        // Initial check plus the double-check before the write.
        assert_eq!(client.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn self_correction_during_window_suppresses_write() {
        let client = ScriptedClient::with_name("Hacked");
        let guard = guard(&client);

        guard.evaluate(false).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        // External actor fixes the name before the timer fires.
        client.set_name(LOCKED);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(client.writes().is_empty());
        assert_eq!(client.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_check_inside_throttle_window_is_noop() {
        let client = ScriptedClient::with_name("Hacked");
        let guard = guard(&client);

        guard.evaluate(false).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        guard.evaluate(false).await;

        // The second call never reached the platform.
        assert_eq!(client.fetches(), 1);

        // Only the first detection's correction fires.
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(client.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_evaluation_bypasses_throttle() {
        let client = ScriptedClient::with_name(LOCKED);
        let guard = guard(&client);

        guard.evaluate(false).await;
        guard.evaluate(true).await;

        assert_eq!(client.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn redetection_replaces_pending_correction() {
        let client = ScriptedClient::with_name("Hacked");
        let guard = guard(&client);

        // First detection arms a correction for t=2000.
        guard.evaluate(false).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        // Second accepted detection (forced past the throttle) rearms it
        // for t=2500.
        guard.evaluate(true).await;

        tokio::time::sleep(Duration::from_millis(1700)).await; // t=2200
        assert!(client.writes().is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await; // t=2600
        assert_eq!(client.writes(), vec![LOCKED.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_error_schedules_nothing() {
        let client = ScriptedClient::with_name("Hacked");
        client.fail_fetches(true);
        let guard = guard(&client);

        guard.evaluate(true).await;
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert_eq!(client.fetches(), 1);
        assert!(client.writes().is_empty());

        // The in-flight flag was never set, so recovery needs no reset.
        client.fail_fetches(false);
        guard.evaluate(true).await;
        assert_eq!(client.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_clears_in_flight_flag() {
        let client = ScriptedClient::with_name("Hacked");
        client.fail_writes(true);
        let guard = guard(&client);

        guard.evaluate(false).await;
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(client.writes().len(), 1);

        // A later check is not blocked by the failed attempt.
        guard.evaluate(true).await;
        assert_eq!(client.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn evaluate_is_noop_while_correction_in_flight() {
        let client = ScriptedClient::with_name("Hacked");
        client.delay_writes(Duration::from_millis(500));
        let guard = guard(&client);

        guard.evaluate(false).await;
        // t=2100: the correction fired at t=2000 and its write is still
        // running until t=2500.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(client.fetches(), 2);

        guard.evaluate(true).await;
        assert_eq!(client.fetches(), 2, "evaluate must no-op while correcting");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.writes().len(), 1);
        guard.evaluate(true).await;
        assert_eq!(client.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_suppresses_scheduled_write() {
        let client = ScriptedClient::with_name("Hacked");
        let guard = guard(&client);

        guard.evaluate(false).await;
        guard.cancel_pending();
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert!(client.writes().is_empty());
        assert_eq!(client.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_correction_ends_episode() {
        let client = ScriptedClient::with_name("Hacked");
        let guard = guard(&client);

        guard.evaluate(false).await;
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(client.writes().len(), 1);

        // Name is locked again; further checks stay read-only.
        tokio::time::sleep(Duration::from_millis(2000)).await;
        guard.evaluate(false).await;
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(client.writes().len(), 1);
    }
}
