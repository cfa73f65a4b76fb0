//! Governance journal — append-only JSONL record of every decision, and the
//! periodic digest built from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

use crate::error::JournalError;
use crate::pipeline::Outcome;
use crate::score::Tier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub recorded_at: String,
    pub improvement_kind: String,
    pub action_class: Option<String>,
    pub tier: Option<Tier>,
    pub outcome: Outcome,
    pub reason: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl JournalEntry {
    pub fn new(improvement_kind: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            recorded_at: Utc::now().to_rfc3339(),
            improvement_kind: improvement_kind.into(),
            action_class: None,
            tier: None,
            outcome,
            reason: String::new(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Append-only JSONL journal. Single writer; rotation is the embedder's
/// concern.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub async fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let line =
            serde_json::to_string(entry).map_err(|e| JournalError::Append(e.to_string()))?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    /// Read every entry back, skipping corrupt lines.
    pub async fn read_all(&self) -> Vec<JournalEntry> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read journal");
                return Vec::new();
            }
        };

        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping corrupt journal line");
                    None
                }
            })
            .collect()
    }
}

// ── Digest ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub generated_at: String,
    pub since: String,
    pub total: u64,
    pub by_outcome: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<String, u64>,
    pub paused: bool,
    pub pause_reason: Option<String>,
}

/// Tracks its own last-emission timestamp; polled, never timer-driven.
pub struct DigestTracker {
    last_emitted: Mutex<DateTime<Utc>>,
}

impl DigestTracker {
    pub fn new() -> Self {
        Self {
            last_emitted: Mutex::new(Utc::now()),
        }
    }

    /// Returns the start of the pending digest window if the interval has
    /// elapsed. Does not advance the window; call [`Self::mark`] once the
    /// digest is actually emitted.
    pub fn due_since(&self, interval: chrono::Duration) -> Option<DateTime<Utc>> {
        let last = *self
            .last_emitted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        (Utc::now() - last >= interval).then_some(last)
    }

    pub fn mark(&self) {
        *self
            .last_emitted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Utc::now();
    }

    #[cfg(test)]
    fn backdate(&self, by: chrono::Duration) {
        let mut last = self
            .last_emitted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = *last - by;
    }
}

impl Default for DigestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate journal entries recorded after `since` by outcome and kind.
#[must_use]
pub fn build_digest(
    entries: &[JournalEntry],
    since: DateTime<Utc>,
    paused: bool,
    pause_reason: Option<String>,
) -> Digest {
    let mut by_outcome: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
    let mut total = 0u64;

    for entry in entries {
        let Ok(recorded_at) = DateTime::parse_from_rfc3339(&entry.recorded_at) else {
            continue;
        };
        if recorded_at.with_timezone(&Utc) < since {
            continue;
        }
        total += 1;
        *by_outcome.entry(entry.outcome.to_string()).or_default() += 1;
        *by_kind.entry(entry.improvement_kind.clone()).or_default() += 1;
    }

    Digest {
        generated_at: Utc::now().to_rfc3339(),
        since: since.to_rfc3339(),
        total,
        by_outcome,
        by_kind,
        paused,
        pause_reason,
    }
}
