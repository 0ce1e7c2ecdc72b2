/// Session credential loader: reads the exported cookie bundle ("app
/// state") the platform client authenticates with. Any failure here is
/// fatal at startup.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One cookie entry from the exported bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CookieEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

#[derive(Debug)]
pub enum AppStateError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The bundle parsed but held no cookies; treated as corrupt.
    Empty {
        path: PathBuf,
    },
}

impl std::fmt::Display for AppStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppStateError::Read { path, source } => {
                write!(f, "failed to read appstate {}: {}", path.display(), source)
            }
            AppStateError::Parse { path, source } => {
                write!(f, "failed to parse appstate {}: {}", path.display(), source)
            }
            AppStateError::Empty { path } => {
                write!(f, "appstate {} contains no cookies", path.display())
            }
        }
    }
}

impl std::error::Error for AppStateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppStateError::Read { source, .. } => Some(source),
            AppStateError::Parse { source, .. } => Some(source),
            AppStateError::Empty { .. } => None,
        }
    }
}

/// Load the credential bundle from disk.
pub fn load(path: &Path) -> Result<Vec<CookieEntry>, AppStateError> {
    let contents = std::fs::read_to_string(path).map_err(|e| AppStateError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let entries: Vec<CookieEntry> =
        serde_json::from_str(&contents).map_err(|e| AppStateError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
    if entries.is_empty() {
        return Err(AppStateError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(entries)
}
