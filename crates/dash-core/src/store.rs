//! Client-local key-value preferences.
//!
//! A single JSON object on disk. Reads happen once at startup; every
//! `set` writes the whole file back through a temporary file.

use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const BASE_URL_KEY: &str = "base_url";
pub const NOTIFICATION_PREFS_KEY: &str = "notification_prefs";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Daily window during which notifications are held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    /// True if `time` falls in the window. Windows may wrap midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Which notifications the user wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPrefs {
    pub enabled: bool,
    pub trade_fills: bool,
    pub risk_alerts: bool,
    pub health_alerts: bool,
    pub daily_report: bool,
    pub quiet_hours: Option<QuietHours>,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            enabled: true,
            trade_fills: true,
            risk_alerts: true,
            health_alerts: true,
            daily_report: true,
            quiet_hours: None,
        }
    }
}

/// JSON-file backed preferences store.
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl LocalStore {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unreadable or corrupt one is logged and treated as empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Ignoring corrupt preferences file {path:?}: {e}");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preferences file at {path:?}, starting empty");
                Map::new()
            }
            Err(e) => {
                warn!("Failed to read preferences file {path:?}: {e}");
                Map::new()
            }
        };
        Self { path, values }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Typed read. A value that no longer decodes is treated as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Stored {key} does not decode, ignoring: {e}");
                None
            }
        }
    }

    /// Write `value` under `key` and persist.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), serde_json::to_value(value)?);
        self.persist()
    }

    /// Remove `key` and persist. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> Result<bool, StoreError> {
        let existed = self.values.remove(key).is_some();
        if existed {
            self.persist()?;
        }
        Ok(existed)
    }

    pub fn base_url(&self) -> Option<String> {
        self.get::<String>(BASE_URL_KEY).filter(|url| !url.trim().is_empty())
    }

    pub fn set_base_url(&mut self, url: &str) -> Result<(), StoreError> {
        self.set(BASE_URL_KEY, &url.trim_end_matches('/'))
    }

    pub fn notification_prefs(&self) -> NotificationPrefs {
        self.get(NOTIFICATION_PREFS_KEY).unwrap_or_default()
    }

    pub fn set_notification_prefs(&mut self, prefs: &NotificationPrefs) -> Result<(), StoreError> {
        self.set(NOTIFICATION_PREFS_KEY, prefs)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(&self.values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}
