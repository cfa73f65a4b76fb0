use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use custos::approvals::MemoryApprovalsQueue;
use custos::pipeline::{FileChange, Governor, GovernorDeps, Improvement, Outcome};
use custos::precedent::NullPrecedentStore;
use custos::registry::StaticClassRegistry;
use custos::review::{NoopGenerator, TextGenerator};
use custos::score::Tier;
use custos::{GovernorConfig, GovernorEvent};
use tempfile::TempDir;

struct FixedGenerator(String);

impl TextGenerator for FixedGenerator {
    fn generate<'a>(
        &'a self,
        _prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        let output = self.0.clone();
        Box::pin(async move { Ok(output) })
    }
}

struct Harness {
    workspace: TempDir,
    queue: Arc<MemoryApprovalsQueue>,
    governor: Governor,
}

fn harness_with(config: GovernorConfig, generator: Arc<dyn TextGenerator>) -> Harness {
    let workspace = TempDir::new().expect("workspace tempdir");
    let queue = Arc::new(MemoryApprovalsQueue::new());
    let governor = Governor::new(
        config,
        workspace.path(),
        GovernorDeps {
            registry: Arc::new(StaticClassRegistry::new()),
            approvals: queue.clone(),
            generator,
            precedent: Arc::new(NullPrecedentStore),
        },
    )
    .expect("governor construction");
    Harness {
        workspace,
        queue,
        governor,
    }
}

fn test_config() -> GovernorConfig {
    let mut config = GovernorConfig::default();
    config.test_command = "true".into();
    config.test_timeout_secs = 30;
    config.review_timeout_secs = 5;
    config.max_per_hour = 10;
    config.max_per_day = 20;
    config
}

/// Weights that let a clean reflection-class change clear the act threshold.
fn act_tier_config() -> GovernorConfig {
    let mut config = test_config();
    config.weights.reversibility = 1.0;
    config.weights.precedent = 0.0;
    config.weights.blast_radius = 1.0;
    config
}

fn reflection(path: &str, content: &str) -> Improvement {
    Improvement {
        kind: "reflection".into(),
        description: "update learned heuristics".into(),
        changes: vec![FileChange {
            path: path.into(),
            content: content.into(),
        }],
        reason: "nightly reflection pass".into(),
        origin: "self".into(),
    }
}

// ── Scenario A: Act tier ─────────────────────────────────────────────────────

#[tokio::test]
async fn act_tier_applies_and_bumps_hourly_counter() {
    let h = harness_with(act_tier_config(), Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");

    let report = h
        .governor
        .process(&reflection("notes/heuristics.md", "prefer smaller diffs\n"))
        .await;

    assert!(report.applied);
    assert_eq!(report.outcome, Outcome::Applied);
    assert_eq!(report.tier, Some(Tier::Act));

    let written =
        std::fs::read_to_string(h.workspace.path().join("notes/heuristics.md")).unwrap();
    assert_eq!(written, "prefer smaller diffs\n");
    assert_eq!(h.governor.stats().hourly_count, 1);
}

// ── Scenario B: Deliberate tier, failing tests ───────────────────────────────

#[tokio::test]
async fn deliberate_failing_tests_roll_back_exactly() {
    let mut config = test_config();
    config.test_command = "false".into();
    let h = harness_with(config, Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");

    let existing = h.workspace.path().join("notes/heuristics.md");
    std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
    std::fs::write(&existing, "original heuristics\n").unwrap();

    let improvement = Improvement {
        changes: vec![
            FileChange {
                path: "notes/heuristics.md".into(),
                content: "rewritten\n".into(),
            },
            FileChange {
                path: "notes/brand_new.md".into(),
                content: "should not survive\n".into(),
            },
        ],
        ..reflection("notes/heuristics.md", "unused")
    };

    let report = h.governor.process(&improvement).await;

    assert!(!report.applied);
    assert_eq!(report.outcome, Outcome::RolledBack);
    assert_eq!(report.tier, Some(Tier::Deliberate));

    // Pre-existing file byte-identical, new file gone.
    assert_eq!(
        std::fs::read_to_string(&existing).unwrap(),
        "original heuristics\n"
    );
    assert!(!h.workspace.path().join("notes/brand_new.md").exists());
    assert_eq!(h.governor.stats().consecutive_failures, 1);
    assert_eq!(h.governor.stats().hourly_count, 0);
}

// ── Scenario C: Escalate tier ────────────────────────────────────────────────

#[tokio::test]
async fn first_in_class_escalates_without_mutation() {
    let h = harness_with(act_tier_config(), Arc::new(NoopGenerator));

    let report = h
        .governor
        .process(&reflection("notes/heuristics.md", "anything\n"))
        .await;

    assert!(!report.applied);
    assert_eq!(report.outcome, Outcome::AwaitingApproval);
    assert_eq!(report.tier, Some(Tier::Escalate));

    let pending = h.queue.pending();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].id.is_empty());
    assert_eq!(pending[0].action_class, "self.reflection");
    assert!(pending[0].diff.contains("notes/heuristics.md"));

    assert!(!h.workspace.path().join("notes/heuristics.md").exists());
}

#[tokio::test]
async fn unknown_kind_escalates_under_hard_ceiling() {
    let h = harness_with(act_tier_config(), Arc::new(NoopGenerator));

    let improvement = Improvement {
        kind: "firmware".into(),
        ..reflection("fw/blob.bin", "data")
    };
    let report = h.governor.process(&improvement).await;

    assert_eq!(report.outcome, Outcome::AwaitingApproval);
    assert_eq!(h.queue.pending()[0].action_class, "self.unclassified");
}

// ── Deliberate tier, happy path ──────────────────────────────────────────────

#[tokio::test]
async fn deliberate_commit_requires_tests_and_review() {
    let h = harness_with(
        test_config(),
        Arc::new(FixedGenerator(
            "{\"approved\": true, \"concerns\": []}".into(),
        )),
    );
    h.governor.prime_class("self.reflection");

    let report = h
        .governor
        .process(&reflection("notes/heuristics.md", "refined\n"))
        .await;

    assert!(report.applied);
    assert_eq!(report.outcome, Outcome::Applied);
    assert_eq!(report.tier, Some(Tier::Deliberate));
    assert_eq!(
        std::fs::read_to_string(h.workspace.path().join("notes/heuristics.md")).unwrap(),
        "refined\n"
    );
    assert_eq!(h.governor.stats().hourly_count, 1);
    assert_eq!(h.governor.stats().consecutive_failures, 0);
}

#[tokio::test]
async fn review_rejection_rolls_back_and_counts_failure() {
    let h = harness_with(
        test_config(),
        Arc::new(FixedGenerator(
            "{\"approved\": false, \"concerns\": [\"touches credential handling\"]}".into(),
        )),
    );
    h.governor.prime_class("self.reflection");

    let report = h
        .governor
        .process(&reflection("notes/heuristics.md", "suspicious\n"))
        .await;

    assert!(!report.applied);
    assert_eq!(report.outcome, Outcome::ReviewRejected);
    assert!(!h.workspace.path().join("notes/heuristics.md").exists());
    assert_eq!(h.governor.stats().consecutive_failures, 1);
}

#[tokio::test]
async fn review_failure_fails_open() {
    // No generator configured: review errors, which must not block a change
    // that already passed its tests.
    let h = harness_with(test_config(), Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");

    let report = h
        .governor
        .process(&reflection("notes/heuristics.md", "fine\n"))
        .await;

    assert!(report.applied);
    assert_eq!(report.outcome, Outcome::Applied);
}

// ── Tripwire ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn hourly_cap_rejects_with_zero_mutation() {
    let mut config = act_tier_config();
    config.max_per_hour = 1;
    let h = harness_with(config, Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");

    let first = h
        .governor
        .process(&reflection("notes/one.md", "first\n"))
        .await;
    assert_eq!(first.outcome, Outcome::Applied);

    let second = h
        .governor
        .process(&reflection("notes/two.md", "second\n"))
        .await;
    assert_eq!(second.outcome, Outcome::RateLimited);
    assert!(second.reason.contains("hourly"));
    assert!(!h.workspace.path().join("notes/two.md").exists());
}

#[tokio::test]
async fn circuit_breaker_pauses_after_consecutive_failures() {
    let mut config = test_config();
    config.test_command = "false".into();
    config.pause_on_consecutive_failures = 2;
    let h = harness_with(config, Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");

    for _ in 0..2 {
        let report = h
            .governor
            .process(&reflection("notes/heuristics.md", "retry\n"))
            .await;
        assert_eq!(report.outcome, Outcome::RolledBack);
    }

    let stats = h.governor.stats();
    assert!(stats.paused);
    assert!(stats.pause_reason.unwrap().contains("consecutive"));

    let refused = h
        .governor
        .process(&reflection("notes/heuristics.md", "again\n"))
        .await;
    assert_eq!(refused.outcome, Outcome::RateLimited);
    assert!(refused.reason.contains("paused"));

    h.governor.resume();
    assert!(!h.governor.stats().paused);
    assert_eq!(h.governor.stats().consecutive_failures, 0);

    let after_resume = h
        .governor
        .process(&reflection("notes/heuristics.md", "once more\n"))
        .await;
    assert_eq!(after_resume.outcome, Outcome::RolledBack);
}

#[tokio::test]
async fn disabled_governor_refuses_everything() {
    let mut config = act_tier_config();
    config.enabled = false;
    let h = harness_with(config, Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");

    let report = h
        .governor
        .process(&reflection("notes/heuristics.md", "nope\n"))
        .await;

    assert_eq!(report.outcome, Outcome::RateLimited);
    assert!(report.reason.contains("disabled"));
    assert!(!h.workspace.path().join("notes/heuristics.md").exists());
}

// ── Input validation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_change_list_is_invalid() {
    let h = harness_with(test_config(), Arc::new(NoopGenerator));

    let improvement = Improvement {
        changes: Vec::new(),
        ..reflection("unused", "unused")
    };
    let report = h.governor.process(&improvement).await;

    assert_eq!(report.outcome, Outcome::Invalid);
    assert!(!report.applied);
}

#[tokio::test]
async fn path_traversal_is_invalid_before_side_effects() {
    let h = harness_with(act_tier_config(), Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");

    let improvement = Improvement {
        changes: vec![FileChange {
            path: "../escape.md".into(),
            content: "out\n".into(),
        }],
        ..reflection("unused", "unused")
    };
    let report = h.governor.process(&improvement).await;

    assert_eq!(report.outcome, Outcome::Invalid);
    assert!(!h.workspace.path().parent().unwrap().join("escape.md").exists());
    assert_eq!(h.governor.stats().hourly_count, 0);
}

// ── Events and digest ────────────────────────────────────────────────────────

#[tokio::test]
async fn applied_improvement_emits_one_event() {
    let h = harness_with(act_tier_config(), Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");
    let mut events = h.governor.subscribe();

    h.governor
        .process(&reflection("notes/heuristics.md", "event test\n"))
        .await;

    match events.try_recv().unwrap() {
        GovernorEvent::Applied {
            improvement_kind,
            class,
            tier,
        } => {
            assert_eq!(improvement_kind, "reflection");
            assert_eq!(class, "self.reflection");
            assert_eq!(tier, Tier::Act);
        }
        other => panic!("expected Applied event, got {other:?}"),
    }
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn escalation_event_carries_request_id() {
    let h = harness_with(test_config(), Arc::new(NoopGenerator));
    let mut events = h.governor.subscribe();

    h.governor
        .process(&reflection("notes/heuristics.md", "new class\n"))
        .await;

    match events.try_recv().unwrap() {
        GovernorEvent::AwaitingApproval { request_id, .. } => {
            assert_eq!(request_id, h.queue.pending()[0].id);
        }
        other => panic!("expected AwaitingApproval event, got {other:?}"),
    }
}

#[tokio::test]
async fn digest_aggregates_recent_outcomes() {
    let mut config = act_tier_config();
    config.digest_interval_mins = 0;
    let h = harness_with(config, Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");

    h.governor
        .process(&reflection("notes/a.md", "a\n"))
        .await;
    h.governor
        .process(&Improvement {
            kind: "firmware".into(),
            ..reflection("fw/x.bin", "x")
        })
        .await;

    let digest = h.governor.check_digest_due().await.expect("digest due");
    assert_eq!(digest.total, 2);
    assert_eq!(digest.by_outcome.get("applied"), Some(&1));
    assert_eq!(digest.by_outcome.get("awaiting_approval"), Some(&1));
    assert_eq!(digest.by_kind.get("reflection"), Some(&1));
    assert!(!digest.paused);

    let report_path = h
        .workspace
        .path()
        .join("reports/governor_digest_latest.json");
    assert!(report_path.exists());
}

// ── Journal ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_decision_lands_in_the_journal() {
    let h = harness_with(act_tier_config(), Arc::new(NoopGenerator));
    h.governor.prime_class("self.reflection");

    h.governor
        .process(&reflection("notes/a.md", "a\n"))
        .await;
    h.governor
        .process(&Improvement {
            changes: Vec::new(),
            ..reflection("unused", "unused")
        })
        .await;

    let raw = std::fs::read_to_string(
        h.workspace.path().join("journal/governance.jsonl"),
    )
    .unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("\"applied\""));
    assert!(lines[1].contains("\"invalid\""));
}
