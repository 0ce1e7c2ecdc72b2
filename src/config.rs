use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from threadlock.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct LockerConfig {
    pub thread: ThreadConfig,
    pub platform: PlatformConfig,
    pub timing: TimingConfig,
    pub events: EventsConfig,
    pub serve: ServeConfig,
}

/// The one conversation being guarded, set once at startup.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ThreadConfig {
    pub thread_id: String,
    /// May contain arbitrary text, including non-ASCII.
    pub locked_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL of the chat-platform gateway.
    pub base_url: String,
    /// Exported cookie bundle the gateway authenticates with.
    pub appstate_file: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Polling fallback interval.
    pub poll_interval_ms: u64,
    /// Delay between detecting a divergence and re-verifying it.
    pub debounce_ms: u64,
    /// Wait after an event before the first read, so the platform's own
    /// state has settled.
    pub settle_ms: u64,
    /// Minimum gap between accepted non-forced checks.
    pub throttle_ms: u64,
}

/// Allow-list for recognizing "name changed" events. The platform's event
/// taxonomy is undocumented free text, so the rule is configuration rather
/// than hard-coded substring matching.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Exact category strings.
    pub categories: Vec<String>,
    /// Regex patterns tried after the exact list.
    pub category_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

// --- Default implementations ---

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            appstate_file: PathBuf::from("appstate.json"),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            debounce_ms: 2_000,
            settle_ms: 500,
            throttle_ms: 2_000,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            categories: vec![
                "log:thread-name".to_string(),
                "log:thread-title".to_string(),
                "log:thread-name-change".to_string(),
            ],
            category_patterns: vec![
                "thread.*(name|title)".to_string(),
                "(name|title).*thread".to_string(),
            ],
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

impl LockerConfig {
    /// Reject configurations the daemon cannot run with. Pattern syntax is
    /// checked separately when the event matcher is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread.thread_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "thread.thread_id must be set".to_string(),
            });
        }
        if self.thread.locked_name.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "thread.locked_name must be set".to_string(),
            });
        }
        if self.platform.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "platform.base_url must be set".to_string(),
            });
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "timing.poll_interval_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid {
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid { reason } => write!(f, "invalid config: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

/// Load configuration from a toml file.
pub fn load(path: &Path) -> Result<LockerConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
