//! Approvals queue — durable hand-off for Escalate-tier decisions.
//!
//! Resolution is asynchronous and happens outside this core; the queue only
//! guarantees the request is recorded.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub kind: String,
    pub description: String,
    pub reason: String,
    pub origin: String,
    pub action_class: String,
    pub diff: String,
    pub requested_at: String,
}

pub trait ApprovalsQueue: Send + Sync {
    /// Persist the request; returns its id once durably enqueued.
    fn enqueue<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

// ── In-memory queue ──────────────────────────────────────────────────────────

/// Process-local queue, mainly for embedders that forward requests over
/// their own channels, and for tests.
#[derive(Default)]
pub struct MemoryApprovalsQueue {
    pending: Mutex<Vec<ApprovalRequest>>,
}

impl MemoryApprovalsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ApprovalsQueue for MemoryApprovalsQueue {
    fn enqueue<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending.push(request.clone());
            Ok(request.id.clone())
        })
    }
}

// ── JSONL-backed queue ───────────────────────────────────────────────────────

/// Append-only file queue; each line is one pending request. Survives a
/// restart without an external service.
pub struct JsonlApprovalsQueue {
    path: PathBuf,
}

impl JsonlApprovalsQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ApprovalsQueue for JsonlApprovalsQueue {
    fn enqueue<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;

            let line = serde_json::to_string(request)?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            Ok(request.id.clone())
        })
    }
}
