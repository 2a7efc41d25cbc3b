use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global tracing subscriber. `RUST_LOG` overrides the
/// default `info` filter. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

/// Severity of a diagnostic log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One entry in the diagnostic feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

/// Append-only in-memory diagnostic feed for one instance.
///
/// Grows without bound; the owning view clears it on close. Not persisted.
#[derive(Clone, Default)]
pub struct ConnectionLog {
    entries: Arc<RwLock<Vec<LogEntry>>>,
}

impl ConnectionLog {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry stamped with the current time.
    pub async fn push(&self, severity: Severity, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
        };
        self.entries.write().await.push(entry);
    }

    /// Returns a copy of the current feed.
    pub async fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.read().await.clone()
    }

    /// Drops all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Current number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when the feed holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
