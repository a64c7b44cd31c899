use crate::clock::Clock;
use crate::error::StorageError;
use crate::settings::ErrorLogSettings;
use crate::storage::store::Store;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const ERROR_LOGS_KEY: &str = "errorLogs";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorLogEntry {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub message: String,
    pub severity: Severity,
}

/// Capped, persisted log of things the user may need to look at later,
/// most importantly meetings that silently failed to join.
pub struct ErrorLog {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settings: ErrorLogSettings,
    write_lock: Mutex<()>,
}

impl ErrorLog {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, settings: ErrorLogSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn entries(&self) -> Result<Vec<ErrorLogEntry>, StorageError> {
        let mut values = self.store.get(&[ERROR_LOGS_KEY]).await?;
        let Some(value) = values.remove(ERROR_LOGS_KEY) else {
            return Ok(Vec::new());
        };
        match serde_json::from_value::<Vec<serde_json::Value>>(value) {
            Ok(items) => Ok(items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect()),
            Err(e) => {
                log::warn!("Stored error log is unreadable, starting fresh: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, entries: &[ErrorLogEntry]) -> Result<(), StorageError> {
        self.store
            .set(vec![(ERROR_LOGS_KEY.to_string(), serde_json::to_value(entries)?)])
            .await
    }

    /// Appends one entry, keeping only the newest `capacity` entries.
    pub async fn append(&self, severity: Severity, message: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.entries().await?;
        entries.push(ErrorLogEntry {
            timestamp: self.clock.now_ms(),
            message: message.to_string(),
            severity,
        });
        let capacity = self.settings.capacity.max(1);
        if entries.len() > capacity {
            let excess = entries.len() - capacity;
            entries.drain(..excess);
        }
        self.save(&entries).await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.save(&[]).await
    }

    /// Drops entries older than the retention window. Returns how many were removed.
    pub async fn prune_expired(&self) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let entries = self.entries().await?;
        let cutoff = self.clock.now_ms() - self.settings.retention_ms();
        let before = entries.len();
        let kept: Vec<ErrorLogEntry> = entries
            .into_iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.save(&kept).await?;
            log::info!("Pruned {} expired error log entries", removed);
        }
        Ok(removed)
    }

    /// Mirrors an event to the process log and persists warnings, errors and
    /// anything explicitly flagged. Persistence failures are only logged.
    pub async fn record(&self, severity: Severity, message: &str, persist: bool) {
        match severity {
            Severity::Info => log::info!("{}", message),
            Severity::Warning => log::warn!("{}", message),
            Severity::Error => log::error!("{}", message),
        }
        if severity >= Severity::Warning || persist {
            if let Err(e) = self.append(severity, message).await {
                log::error!("Failed to persist error log entry: {}", e);
            }
        }
    }

    pub async fn info(&self, message: &str) {
        self.record(Severity::Info, message, false).await
    }

    pub async fn warn(&self, message: &str) {
        self.record(Severity::Warning, message, false).await
    }

    pub async fn error(&self, message: &str) {
        self.record(Severity::Error, message, false).await
    }
}
