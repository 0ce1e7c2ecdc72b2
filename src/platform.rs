/// Capability interface to the chat platform.
///
/// Everything protocol-shaped lives behind this trait: the guard and the
/// triggers only ever see thread names, title writes, and decoded events.
/// The concrete HTTP implementation is in `gateway`.
use std::future::Future;

use tokio::sync::mpsc;

/// Snapshot of a conversation as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub name: String,
}

/// A decoded realtime event from the platform's subscription stream.
///
/// Only the fields the triggers care about are decoded; the rest of the
/// payload is dropped at the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformEvent {
    /// Free-text category tag (the platform's log message type).
    pub category: Option<String>,
    /// Conversation the event belongs to, when the payload carries one.
    pub thread_id: Option<String>,
}

/// Errors reported by a platform client.
#[derive(Debug)]
pub enum PlatformError {
    /// Transport-level failure talking to the platform.
    Http { source: reqwest::Error },
    /// The platform answered with a non-success status.
    Status { context: &'static str, status: u16 },
    /// Login was rejected or the login response was unusable.
    Login { detail: String },
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::Http { source } => {
                write!(f, "platform request failed: {}", source)
            }
            PlatformError::Status { context, status } => {
                write!(f, "{} request returned status {}", context, status)
            }
            PlatformError::Login { detail } => {
                write!(f, "login failed: {}", detail)
            }
        }
    }
}

impl std::error::Error for PlatformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlatformError::Http { source } => Some(source),
            _ => None,
        }
    }
}

/// The platform operations the daemon needs. Implementations must be
/// shareable across tasks; returned futures must be `Send` because the
/// guard awaits them from spawned correction timers.
pub trait PlatformClient: Send + Sync + 'static {
    /// Fetch the current state of a conversation.
    fn thread_info(
        &self,
        thread_id: &str,
    ) -> impl Future<Output = Result<ThreadInfo, PlatformError>> + Send;

    /// Overwrite a conversation's display name.
    fn set_title(
        &self,
        title: &str,
        thread_id: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Subscribe to the realtime event stream. The receiver yields decoded
    /// events until the underlying stream ends.
    fn subscribe(&self) -> mpsc::Receiver<PlatformEvent>;
}
