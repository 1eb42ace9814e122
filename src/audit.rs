//! Audit trail.
//!
//! Grounded on the teacher's `audit.rs::AuditEntry`/`AuditLog`, narrowed to
//! the exact field set the message handler emits and widened with a
//! callback sink so an embedder can stream entries instead of only
//! collecting them in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::Decision;

/// One evaluated message or one removed poisoned tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    pub decision: Decision,
    pub flagged: bool,
    pub triggered_rules: Vec<String>,
    pub reasons: Vec<String>,
    pub source: String,
}

impl AuditEntry {
    pub fn now(
        tool_name: impl Into<String>,
        arguments: Option<Value>,
        decision: Decision,
        triggered_rules: Vec<String>,
        reasons: Vec<String>,
        source: impl Into<String>,
    ) -> Self {
        let flagged = decision != Decision::Allow;
        Self {
            timestamp: Utc::now(),
            tool_name: tool_name.into(),
            arguments,
            decision,
            flagged,
            triggered_rules,
            reasons,
            source: source.into(),
        }
    }
}

/// An audit callback, invoked once per [`AuditEntry`]. Must not block on
/// internal handler state — the handler never holds a lock while calling
/// it.
pub type AuditSink = Box<dyn Fn(AuditEntry) + Send + Sync>;

/// A sink that does nothing. Used when an embedder does not supply one.
pub fn noop_sink() -> AuditSink {
    Box::new(|_entry| {})
}

/// An append-only, in-memory audit log, useful for tests and for CLI runs
/// that want a queryable record instead of a streaming callback.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the entire log to JSON Lines (one JSON object per line).
    pub fn to_jsonl(&self) -> String {
        self.entries
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Wrap this log in a sink callback, sharing it via `Arc<Mutex<_>>`.
    pub fn into_sink(log: std::sync::Arc<std::sync::Mutex<Self>>) -> AuditSink {
        Box::new(move |entry| {
            if let Ok(mut guard) = log.lock() {
                guard.record(entry);
            }
        })
    }
}
