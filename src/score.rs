//! Risk scoring — three-axis confidence score and tier decision.
//!
//! Pure function over an action descriptor plus registry defaults. Never
//! panics; malformed axis inputs degrade to the floor, not to NaN.

use serde::{Deserialize, Serialize};

use crate::config::{GovernorConfig, PRECEDENT_CEILING, ScoreThresholds, ScoreWeights};
use crate::registry::ActionClassRegistry;

// ── Tier ─────────────────────────────────────────────────────────────────────

/// Autonomy tier a scored action resolves to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    /// Apply autonomously, no validation pipeline.
    Act,
    /// Validate-then-execute: snapshot, apply, test, review.
    Deliberate,
    /// Requires a human decision.
    Escalate,
}

// ── Trust source ─────────────────────────────────────────────────────────────

/// Provenance of the proposal. Modifies the blast-radius axis only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrustSource {
    Hostile,
    #[default]
    Untrusted,
    Verified,
    Trusted,
}

impl TrustSource {
    /// Map a free-form improvement origin onto a trust tier. Unknown origins
    /// stay untrusted.
    #[must_use]
    pub fn from_origin(origin: &str) -> Self {
        match origin {
            "operator" | "cli" => Self::Trusted,
            "self" | "reflection" | "agent" => Self::Verified,
            "hostile" => Self::Hostile,
            _ => Self::Untrusted,
        }
    }
}

// ── Descriptor and result ────────────────────────────────────────────────────

/// Input to the scorer: the resolved action class plus optional per-call
/// overrides of the three axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub class: String,
    /// Override for the reversibility axis; registry default otherwise.
    pub reversibility: Option<f64>,
    /// Precedent earned from history. Defaults to 0 — no history.
    pub precedent: Option<f64>,
    /// Override for the blast-radius axis; registry default otherwise.
    pub blast_radius: Option<f64>,
    #[serde(default)]
    pub trust: TrustSource,
    /// First-ever action in this class always escalates.
    #[serde(default)]
    pub first_in_class: bool,
}

impl ActionDescriptor {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            reversibility: None,
            precedent: None,
            blast_radius: None,
            trust: TrustSource::default(),
            first_in_class: false,
        }
    }
}

/// Scoring outcome, carrying the weights and thresholds actually applied so
/// a journal reader can reproduce the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub reversibility: f64,
    pub precedent: f64,
    pub blast_radius: f64,
    pub composite: f64,
    pub tier: Tier,
    pub reason: String,
    pub weights: ScoreWeights,
    pub thresholds: ScoreThresholds,
}

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Score a descriptor against registry policy and configuration.
///
/// Axis resolution: descriptor override, else registry default; every axis
/// clamped to [0, 1] with non-finite values mapped to 0. Precedent is
/// additionally capped below certainty. Trust modifies blast radius only.
#[must_use]
pub fn score(
    descriptor: &ActionDescriptor,
    registry: &dyn ActionClassRegistry,
    config: &GovernorConfig,
) -> ScoreResult {
    let class = descriptor.class.as_str();

    let reversibility = clamp_axis(
        descriptor
            .reversibility
            .unwrap_or_else(|| registry.default_reversibility(class)),
    );
    let precedent = clamp_axis(descriptor.precedent.unwrap_or(0.0)).min(PRECEDENT_CEILING);
    let raw_blast = clamp_axis(
        descriptor
            .blast_radius
            .unwrap_or_else(|| registry.default_blast_radius(class)),
    );
    let blast_radius = apply_trust(raw_blast, descriptor.trust);

    // Weights are clamped too, and the clamped values are what gets
    // reported back for reproducibility.
    let weights = ScoreWeights {
        reversibility: clamp_axis(config.weights.reversibility),
        precedent: clamp_axis(config.weights.precedent),
        blast_radius: clamp_axis(config.weights.blast_radius),
    };
    let composite = (reversibility * weights.reversibility
        + precedent * weights.precedent
        + blast_radius * weights.blast_radius)
        .clamp(0.0, 1.0);

    let act_threshold = config.thresholds.effective_act();
    let escalate_threshold = config.thresholds.effective_escalate();

    // First matching rule wins. Ceilings outrank every score; a deliberation
    // minimum raises the floor, never lowers the ceiling of caution.
    let (tier, reason) = if registry.has_hard_ceiling(class) {
        (Tier::Escalate, format!("class {class} carries a hard ceiling"))
    } else if descriptor.first_in_class {
        (Tier::Escalate, format!("first action in class {class}"))
    } else if descriptor.trust == TrustSource::Hostile {
        (Tier::Escalate, "hostile trust source".to_string())
    } else if registry.requires_deliberation(class) {
        if composite < escalate_threshold {
            (
                Tier::Escalate,
                format!("composite {composite:.2} below escalate threshold {escalate_threshold:.2}"),
            )
        } else {
            (
                Tier::Deliberate,
                format!("class {class} requires deliberation"),
            )
        }
    } else if composite >= act_threshold {
        (
            Tier::Act,
            format!("composite {composite:.2} meets act threshold {act_threshold:.2}"),
        )
    } else if composite >= escalate_threshold {
        (
            Tier::Deliberate,
            format!("composite {composite:.2} meets escalate threshold {escalate_threshold:.2}"),
        )
    } else {
        (
            Tier::Escalate,
            format!("composite {composite:.2} below escalate threshold {escalate_threshold:.2}"),
        )
    };

    ScoreResult {
        reversibility,
        precedent,
        blast_radius,
        composite,
        tier,
        reason,
        weights,
        thresholds: ScoreThresholds {
            act: act_threshold,
            escalate: escalate_threshold,
        },
    }
}

fn clamp_axis(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn apply_trust(blast_radius: f64, trust: TrustSource) -> f64 {
    match trust {
        TrustSource::Hostile => blast_radius.min(0.05),
        TrustSource::Untrusted => (blast_radius - 0.2).clamp(0.0, 1.0),
        TrustSource::Verified => blast_radius,
        TrustSource::Trusted => (blast_radius + 0.05).clamp(0.0, 1.0),
    }
}
