//! Validation pipeline — classify, gate, score, then apply, validate, or
//! escalate a proposed self-modification.
//!
//! Every call ends in exactly one journaled outcome. A Deliberate-tier
//! mutation either commits (tests passed and review approved) or reverts to
//! the pre-call file state; no partial apply is observable.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crate::approvals::{ApprovalRequest, ApprovalsQueue, JsonlApprovalsQueue};
use crate::config::GovernorConfig;
use crate::error::{ConfigError, CustosError};
use crate::events::{EventReceiver, EventSender, GovernorEvent, event_bus};
use crate::journal::{Digest, DigestTracker, Journal, JournalEntry, build_digest};
use crate::precedent::{NullPrecedentStore, PrecedentRelay, PrecedentStore};
use crate::registry::{ActionClassRegistry, StaticClassRegistry, classify};
use crate::review::{NoopGenerator, ReviewOracle, TextGenerator};
use crate::score::{ActionDescriptor, ScoreResult, Tier, TrustSource, score};
use crate::snapshot::Snapshot;
use crate::testgate;
use crate::tripwire::{Tripwire, TripwireStats};

/// Diff bytes attached to an approval request.
const MAX_APPROVAL_DIFF_BYTES: usize = 8_192;
/// Buffered precedent signals before the relay starts dropping.
const PRECEDENT_RELAY_CAPACITY: usize = 64;
/// Event bus capacity; slow subscribers lag, they never block the pipeline.
const EVENT_BUS_CAPACITY: usize = 64;

// ── Improvement ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    /// Workspace-relative path.
    pub path: String,
    pub content: String,
}

/// A proposed self-modification, as submitted by the improvement loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Improvement {
    pub kind: String,
    pub description: String,
    pub changes: Vec<FileChange>,
    pub reason: String,
    #[serde(default)]
    pub origin: String,
}

impl Improvement {
    /// Human-readable change summary, bounded for prompts and approval
    /// requests.
    #[must_use]
    pub fn diff_summary(&self, max_bytes: usize) -> String {
        let mut out = String::new();
        for change in &self.changes {
            out.push_str("--- ");
            out.push_str(&change.path);
            out.push_str(&format!(" ({} bytes)\n", change.content.len()));
            out.push_str(&change.content);
            if !change.content.ends_with('\n') {
                out.push('\n');
            }
        }
        if out.len() > max_bytes {
            let mut cut = max_bytes;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
            out.push_str("\n... [diff truncated]");
        }
        out
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

/// Terminal outcome of one pipeline call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Applied,
    RolledBack,
    ReviewRejected,
    AwaitingApproval,
    RateLimited,
    Invalid,
    /// Internal failure (snapshot, enqueue); nothing was left applied.
    Failed,
}

/// Structured result returned to the caller; full detail is in the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReport {
    pub applied: bool,
    pub outcome: Outcome,
    pub reason: String,
    pub tier: Option<Tier>,
}

impl ProcessReport {
    fn refused(outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            applied: false,
            outcome,
            reason: reason.into(),
            tier: None,
        }
    }
}

// ── Governor ─────────────────────────────────────────────────────────────────

/// External collaborators, injected at construction.
pub struct GovernorDeps {
    pub registry: Arc<dyn ActionClassRegistry>,
    pub approvals: Arc<dyn ApprovalsQueue>,
    pub generator: Arc<dyn TextGenerator>,
    pub precedent: Arc<dyn PrecedentStore>,
}

/// The autonomy governor. Owns all mutable governance state; construct one
/// per process (or per test) inside a tokio runtime.
pub struct Governor {
    config: Arc<GovernorConfig>,
    workspace_dir: PathBuf,
    registry: Arc<dyn ActionClassRegistry>,
    approvals: Arc<dyn ApprovalsQueue>,
    oracle: ReviewOracle,
    tripwire: Tripwire,
    journal: Journal,
    digests: DigestTracker,
    relay: PrecedentRelay,
    events: EventSender,
    /// Serializes pipeline entry so counter and circuit-breaker invariants
    /// hold under concurrent callers.
    entry: tokio::sync::Mutex<()>,
    seen_classes: Mutex<HashSet<String>>,
}

impl Governor {
    pub fn new(
        config: GovernorConfig,
        workspace_dir: impl Into<PathBuf>,
        deps: GovernorDeps,
    ) -> Result<Self, CustosError> {
        config
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let workspace_dir = workspace_dir.into();
        let config = Arc::new(config);
        let (events, _) = event_bus(EVENT_BUS_CAPACITY);

        Ok(Self {
            tripwire: Tripwire::new(config.max_per_hour, config.max_per_day),
            journal: Journal::new(workspace_dir.join("journal").join("governance.jsonl")),
            digests: DigestTracker::new(),
            oracle: ReviewOracle::new(
                deps.generator,
                Duration::from_secs(config.review_timeout_secs),
            ),
            relay: PrecedentRelay::spawn(deps.precedent, PRECEDENT_RELAY_CAPACITY),
            registry: deps.registry,
            approvals: deps.approvals,
            events,
            entry: tokio::sync::Mutex::new(()),
            seen_classes: Mutex::new(HashSet::new()),
            config,
            workspace_dir,
        })
    }

    /// Governor with the built-in registry, a JSONL approvals queue under
    /// the workspace, no review backend, and no precedent sink.
    pub fn with_defaults(
        config: GovernorConfig,
        workspace_dir: impl Into<PathBuf>,
    ) -> Result<Self, CustosError> {
        let workspace_dir = workspace_dir.into();
        let approvals = JsonlApprovalsQueue::new(
            workspace_dir.join("approvals").join("pending.jsonl"),
        );
        Self::new(
            config,
            workspace_dir,
            GovernorDeps {
                registry: Arc::new(StaticClassRegistry::new()),
                approvals: Arc::new(approvals),
                generator: Arc::new(NoopGenerator),
                precedent: Arc::new(NullPrecedentStore),
            },
        )
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn stats(&self) -> TripwireStats {
        self.tripwire.stats()
    }

    pub fn pause(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tripwire.pause(reason.clone());
        self.emit(GovernorEvent::Paused { reason });
    }

    pub fn resume(&self) {
        self.tripwire.resume();
        self.emit(GovernorEvent::Resumed);
    }

    /// Mark a class as already holding history, e.g. restored from an
    /// external precedent store at startup. Without this, the first action
    /// seen in a class escalates.
    pub fn prime_class(&self, class: &str) {
        self.seen_lock().insert(class.to_string());
    }

    /// Score a descriptor against this governor's registry and config
    /// without running the pipeline.
    #[must_use]
    pub fn score(&self, descriptor: &ActionDescriptor) -> ScoreResult {
        score(descriptor, self.registry.as_ref(), &self.config)
    }

    /// Run one improvement through the pipeline. Never errors; every
    /// condition maps to a structured report plus a journal entry.
    pub async fn process(&self, improvement: &Improvement) -> ProcessReport {
        let _entry = self.entry.lock().await;

        if let Some(reason) = invalid_reason(improvement) {
            let report = ProcessReport::refused(Outcome::Invalid, reason);
            self.record(improvement, None, None, &report, serde_json::Value::Null)
                .await;
            return report;
        }

        if !self.config.enabled {
            return self.refuse(improvement, "governor disabled").await;
        }
        if let Err(refusal) = self.tripwire.check_entry() {
            return self.refuse(improvement, refusal.describe()).await;
        }

        let class = classify(&improvement.kind);
        let descriptor = ActionDescriptor {
            trust: TrustSource::from_origin(&improvement.origin),
            first_in_class: !self.seen_lock().contains(class),
            ..ActionDescriptor::new(class)
        };
        let scored = score(&descriptor, self.registry.as_ref(), &self.config);
        self.seen_lock().insert(class.to_string());
        self.relay.action(class, &improvement.description);

        tracing::debug!(
            class,
            tier = %scored.tier,
            composite = scored.composite,
            reason = %scored.reason,
            "improvement scored"
        );

        let report = match scored.tier {
            Tier::Act => self.apply_directly(improvement, class, &scored).await,
            Tier::Deliberate => self.validate_then_apply(improvement, class, &scored).await,
            Tier::Escalate => self.escalate(improvement, class, &scored).await,
        };

        self.relay.outcome(
            class,
            report.outcome == Outcome::Applied,
            outcome_severity(report.outcome),
        );
        report
    }

    /// Emit a digest if the configured interval has elapsed since the last
    /// one. Poll-driven; no internal timer.
    pub async fn check_digest_due(&self) -> Option<Digest> {
        let interval = i64::try_from(self.config.digest_interval_mins)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or_else(|| chrono::Duration::days(36_500));
        let since = self.digests.due_since(interval)?;

        let entries = self.journal.read_all().await;
        let stats = self.tripwire.stats();
        let digest = build_digest(&entries, since, stats.paused, stats.pause_reason);
        self.digests.mark();

        self.write_digest_report(&digest).await;
        self.emit(GovernorEvent::Digest {
            total: digest.total,
        });
        Some(digest)
    }

    // ── Tier branches ────────────────────────────────────────────────────

    async fn apply_directly(
        &self,
        improvement: &Improvement,
        class: &str,
        scored: &ScoreResult,
    ) -> ProcessReport {
        // Snapshot even here: a failed multi-file apply must not leave
        // partial state behind.
        let snapshot = match Snapshot::capture(self.target_paths(improvement)).await {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail(improvement, class, scored, e.to_string()).await,
        };

        if let Err(e) = self.apply_changes(improvement).await {
            let rollback_errors = snapshot.rollback().await;
            return self
                .rolled_back(
                    improvement,
                    class,
                    scored,
                    format!("apply failed: {e}"),
                    serde_json::json!({ "rollback_errors": rollback_errors }),
                    false,
                )
                .await;
        }

        self.commit(improvement, class, scored).await
    }

    async fn validate_then_apply(
        &self,
        improvement: &Improvement,
        class: &str,
        scored: &ScoreResult,
    ) -> ProcessReport {
        let snapshot = match Snapshot::capture(self.target_paths(improvement)).await {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail(improvement, class, scored, e.to_string()).await,
        };

        if let Err(e) = self.apply_changes(improvement).await {
            let rollback_errors = snapshot.rollback().await;
            return self
                .rolled_back(
                    improvement,
                    class,
                    scored,
                    format!("apply failed: {e}"),
                    serde_json::json!({ "rollback_errors": rollback_errors }),
                    false,
                )
                .await;
        }

        let verdict = testgate::run(
            &self.config.test_command,
            Duration::from_secs(self.config.test_timeout_secs),
            &self.workspace_dir,
        )
        .await;

        if !verdict.passed {
            let rollback_errors = snapshot.rollback().await;
            return self
                .rolled_back(
                    improvement,
                    class,
                    scored,
                    "validation tests failed",
                    serde_json::json!({
                        "test_output": verdict.output,
                        "rollback_errors": rollback_errors,
                    }),
                    true,
                )
                .await;
        }

        let review = self.oracle.review(improvement).await;
        if !review.approved {
            let rollback_errors = snapshot.rollback().await;
            let streak = self.note_failure();
            let report = ProcessReport {
                applied: false,
                outcome: Outcome::ReviewRejected,
                reason: "review rejected the change".into(),
                tier: Some(Tier::Deliberate),
            };
            self.record(
                improvement,
                Some(class),
                Some(Tier::Deliberate),
                &report,
                serde_json::json!({
                    "concerns": review.concerns,
                    "rollback_errors": rollback_errors,
                    "consecutive_failures": streak,
                }),
            )
            .await;
            self.emit(GovernorEvent::ReviewRejected {
                improvement_kind: improvement.kind.clone(),
                class: class.to_string(),
                concerns: review.concerns,
            });
            return report;
        }

        self.commit(improvement, class, scored).await
    }

    async fn escalate(
        &self,
        improvement: &Improvement,
        class: &str,
        scored: &ScoreResult,
    ) -> ProcessReport {
        let request = ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            kind: improvement.kind.clone(),
            description: improvement.description.clone(),
            reason: improvement.reason.clone(),
            origin: improvement.origin.clone(),
            action_class: class.to_string(),
            diff: improvement.diff_summary(MAX_APPROVAL_DIFF_BYTES),
            requested_at: Utc::now().to_rfc3339(),
        };

        let request_id = match self.approvals.enqueue(&request).await {
            Ok(id) => id,
            Err(e) => {
                return self
                    .fail(
                        improvement,
                        class,
                        scored,
                        format!("failed to enqueue approval request: {e}"),
                    )
                    .await;
            }
        };

        let report = ProcessReport {
            applied: false,
            outcome: Outcome::AwaitingApproval,
            reason: scored.reason.clone(),
            tier: Some(Tier::Escalate),
        };
        self.record(
            improvement,
            Some(class),
            Some(Tier::Escalate),
            &report,
            serde_json::json!({ "request_id": request_id }),
        )
        .await;
        self.emit(GovernorEvent::AwaitingApproval {
            improvement_kind: improvement.kind.clone(),
            class: class.to_string(),
            request_id,
        });
        report
    }

    // ── Shared steps ─────────────────────────────────────────────────────

    async fn commit(
        &self,
        improvement: &Improvement,
        class: &str,
        scored: &ScoreResult,
    ) -> ProcessReport {
        self.tripwire.record_application();
        self.tripwire.reset_failures();

        let report = ProcessReport {
            applied: true,
            outcome: Outcome::Applied,
            reason: scored.reason.clone(),
            tier: Some(scored.tier),
        };
        self.record(
            improvement,
            Some(class),
            Some(scored.tier),
            &report,
            serde_json::json!({ "composite": scored.composite }),
        )
        .await;
        self.emit(GovernorEvent::Applied {
            improvement_kind: improvement.kind.clone(),
            class: class.to_string(),
            tier: scored.tier,
        });
        report
    }

    async fn rolled_back(
        &self,
        improvement: &Improvement,
        class: &str,
        scored: &ScoreResult,
        reason: impl Into<String>,
        mut metadata: serde_json::Value,
        count_failure: bool,
    ) -> ProcessReport {
        let reason = reason.into();
        if count_failure {
            let streak = self.note_failure();
            if let Some(map) = metadata.as_object_mut() {
                map.insert("consecutive_failures".into(), streak.into());
            }
        }

        let report = ProcessReport {
            applied: false,
            outcome: Outcome::RolledBack,
            reason: reason.clone(),
            tier: Some(scored.tier),
        };
        self.record(improvement, Some(class), Some(scored.tier), &report, metadata)
            .await;
        self.emit(GovernorEvent::RolledBack {
            improvement_kind: improvement.kind.clone(),
            class: class.to_string(),
            reason,
        });
        report
    }

    /// Count a validation failure; trip the circuit breaker at the
    /// configured streak.
    fn note_failure(&self) -> u32 {
        let streak = self.tripwire.record_failure();
        let threshold = self.config.pause_on_consecutive_failures;
        if threshold > 0 && streak >= threshold && !self.tripwire.is_paused() {
            let reason = format!("{streak} consecutive validation failures");
            tracing::warn!(streak, "circuit breaker tripped; pausing governor");
            self.tripwire.pause(reason.clone());
            self.emit(GovernorEvent::Paused { reason });
        }
        streak
    }

    async fn refuse(&self, improvement: &Improvement, reason: impl Into<String>) -> ProcessReport {
        let reason = reason.into();
        let report = ProcessReport::refused(Outcome::RateLimited, reason.clone());
        self.record(improvement, None, None, &report, serde_json::Value::Null)
            .await;
        self.emit(GovernorEvent::RateLimited { reason });
        report
    }

    async fn fail(
        &self,
        improvement: &Improvement,
        class: &str,
        scored: &ScoreResult,
        reason: String,
    ) -> ProcessReport {
        let report = ProcessReport {
            applied: false,
            outcome: Outcome::Failed,
            reason,
            tier: Some(scored.tier),
        };
        self.record(
            improvement,
            Some(class),
            Some(scored.tier),
            &report,
            serde_json::Value::Null,
        )
        .await;
        report
    }

    async fn record(
        &self,
        improvement: &Improvement,
        class: Option<&str>,
        tier: Option<Tier>,
        report: &ProcessReport,
        metadata: serde_json::Value,
    ) {
        let entry = JournalEntry {
            recorded_at: Utc::now().to_rfc3339(),
            improvement_kind: improvement.kind.clone(),
            action_class: class.map(str::to_string),
            tier,
            outcome: report.outcome,
            reason: report.reason.clone(),
            metadata,
        };
        if let Err(e) = self.journal.append(&entry).await {
            tracing::warn!(error = %e, "failed to journal governance decision");
        }
    }

    async fn apply_changes(&self, improvement: &Improvement) -> anyhow::Result<()> {
        for change in &improvement.changes {
            let target = self.workspace_dir.join(&change.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &change.content).await?;
        }
        Ok(())
    }

    fn target_paths(&self, improvement: &Improvement) -> Vec<PathBuf> {
        improvement
            .changes
            .iter()
            .map(|change| self.workspace_dir.join(&change.path))
            .collect()
    }

    async fn write_digest_report(&self, digest: &Digest) {
        let reports_dir = self.workspace_dir.join("reports");
        if let Err(e) = tokio::fs::create_dir_all(&reports_dir).await {
            tracing::warn!(error = %e, "failed to create reports dir");
            return;
        }
        let path = reports_dir.join("governor_digest_latest.json");
        match serde_json::to_string_pretty(digest) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&path, json).await {
                    tracing::warn!(error = %e, "failed to write digest report");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize digest"),
        }
    }

    fn emit(&self, event: GovernorEvent) {
        // No receivers is fine; events are best-effort observability.
        let _ = self.events.send(event);
    }

    fn seen_lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.seen_classes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn invalid_reason(improvement: &Improvement) -> Option<String> {
    if improvement.kind.trim().is_empty() {
        return Some("improvement kind is empty".into());
    }
    if improvement.changes.is_empty() {
        return Some("changes must be a non-empty list".into());
    }
    for change in &improvement.changes {
        if change.path.trim().is_empty() {
            return Some("change path is empty".into());
        }
        let path = Path::new(&change.path);
        if path.is_absolute()
            || path
                .components()
                .any(|component| matches!(component, Component::ParentDir))
        {
            return Some(format!("change path escapes workspace: {}", change.path));
        }
    }
    None
}

fn outcome_severity(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::RolledBack | Outcome::ReviewRejected => "medium",
        Outcome::Failed => "high",
        Outcome::Applied
        | Outcome::AwaitingApproval
        | Outcome::RateLimited
        | Outcome::Invalid => "low",
    }
}
