/// Event-driven trigger: watches the subscription stream for title-change
/// events on the guarded conversation and pokes the guard.
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EventsConfig;
use crate::guard::NameGuard;
use crate::platform::{PlatformClient, PlatformEvent};

/// Allow-list deciding which event categories count as a name change.
pub struct TitleEventMatcher {
    categories: Vec<String>,
    patterns: Vec<Regex>,
}

impl TitleEventMatcher {
    /// Build the matcher from config. Invalid pattern syntax is an error,
    /// fatal at startup.
    pub fn from_config(config: &EventsConfig) -> Result<Self, regex::Error> {
        let patterns = config
            .category_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            categories: config.categories.clone(),
            patterns,
        })
    }

    pub fn matches(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
            || self.patterns.iter().any(|p| p.is_match(category))
    }
}

/// Consume the event stream until it closes.
///
/// A matching event waits out the settle delay before evaluating so the
/// platform's own state has settled by the first read. Everything else is
/// skipped; a malformed or unrecognized event never ends the loop.
pub fn start<C: PlatformClient>(
    guard: NameGuard<C>,
    mut events: mpsc::Receiver<PlatformEvent>,
    matcher: TitleEventMatcher,
    settle: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(category) = event.category.as_deref() else {
                continue;
            };
            if !matcher.matches(category) {
                continue;
            }
            match event.thread_id.as_deref() {
                Some(thread_id) if thread_id == guard.thread_id() => {}
                _ => {
                    debug!(category, "title event for another thread, ignoring");
                    continue;
                }
            }

            warn!(category, "title change event received");
            tokio::time::sleep(settle).await;
            guard.evaluate(false).await;
        }
        warn!("event stream closed, polling fallback only from here");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::GuardTiming;
    use crate::platform::testing::ScriptedClient;
    use std::sync::Arc;

    fn matcher() -> TitleEventMatcher {
        TitleEventMatcher::from_config(&EventsConfig::default()).unwrap()
    }

    fn guard(client: &Arc<ScriptedClient>) -> NameGuard<ScriptedClient> {
        NameGuard::new(
            Arc::clone(client),
            "thread-1",
            "Locked",
            GuardTiming::default(),
        )
    }

    fn title_event(category: &str, thread_id: &str) -> PlatformEvent {
        PlatformEvent {
            category: Some(category.to_string()),
            thread_id: Some(thread_id.to_string()),
        }
    }

    #[test]
    fn test_matcher_accepts_exact_categories() {
        let m = matcher();
        assert!(m.matches("log:thread-name"));
        assert!(m.matches("log:thread-title"));
        assert!(m.matches("log:thread-name-change"));
    }

    #[test]
    fn test_matcher_accepts_pattern_variants() {
        let m = matcher();
        assert!(m.matches("log:thread-name-updated"));
        assert!(m.matches("thread_title_set"));
        assert!(m.matches("name-of-thread"));
    }

    #[test]
    fn test_matcher_rejects_unrelated_categories() {
        let m = matcher();
        assert!(!m.matches("log:subscribe"));
        assert!(!m.matches("log:thread-icon"));
        assert!(!m.matches("message"));
    }

    #[test]
    fn test_matcher_rejects_bad_pattern_syntax() {
        let config = EventsConfig {
            categories: vec![],
            category_patterns: vec!["(unclosed".to_string()],
        };
        assert!(TitleEventMatcher::from_config(&config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn matching_event_triggers_check_after_settle() {
        let client = ScriptedClient::with_name("Locked");
        let guard = guard(&client);
        let (tx, rx) = mpsc::channel(8);
        let task = start(
            guard.clone(),
            rx,
            matcher(),
            Duration::from_millis(500),
        );

        tx.send(title_event("log:thread-name", "thread-1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.fetches(), 0, "settle delay not yet elapsed");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.fetches(), 1);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn event_for_other_thread_is_ignored() {
        let client = ScriptedClient::with_name("Locked");
        let guard = guard(&client);
        let (tx, rx) = mpsc::channel(8);
        let task = start(
            guard.clone(),
            rx,
            matcher(),
            Duration::from_millis(500),
        );

        tx.send(title_event("log:thread-name", "someone-else"))
            .await
            .unwrap();
        tx.send(PlatformEvent {
            category: Some("log:thread-name".to_string()),
            thread_id: None,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(client.fetches(), 0);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_and_malformed_events_are_skipped() {
        let client = ScriptedClient::with_name("Locked");
        let guard = guard(&client);
        let (tx, rx) = mpsc::channel(8);
        let task = start(
            guard.clone(),
            rx,
            matcher(),
            Duration::from_millis(500),
        );

        tx.send(PlatformEvent::default()).await.unwrap();
        tx.send(title_event("log:subscribe", "thread-1"))
            .await
            .unwrap();
        // The loop is still alive after the junk.
        tx.send(title_event("log:thread-name", "thread-1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(client.fetches(), 1);

        drop(tx);
        task.await.unwrap();
    }
}
