//! Governor configuration — weights, thresholds, rate caps, and the
//! validation that keeps them inside safe operating bands.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard floor for the Act-tier threshold. Configuration can raise the bar
/// for autonomous application, never lower it below this value.
pub const ACT_THRESHOLD_FLOOR: f64 = 0.8;

/// Precedent never reaches certainty, whatever history says.
pub const PRECEDENT_CEILING: f64 = 0.95;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,
    #[serde(default = "default_max_per_day")]
    pub max_per_day: u32,
    /// Consecutive Deliberate-tier failures before the governor pauses
    /// itself. Zero disables the circuit breaker.
    #[serde(default = "default_pause_on_consecutive_failures")]
    pub pause_on_consecutive_failures: u32,
    #[serde(default = "default_test_command")]
    pub test_command: String,
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_review_timeout_secs")]
    pub review_timeout_secs: u64,
    #[serde(default = "default_digest_interval_mins")]
    pub digest_interval_mins: u64,
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default)]
    pub thresholds: ScoreThresholds,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub reversibility: f64,
    pub precedent: f64,
    pub blast_radius: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreThresholds {
    pub act: f64,
    pub escalate: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_per_hour() -> u32 {
    3
}

fn default_max_per_day() -> u32 {
    10
}

fn default_pause_on_consecutive_failures() -> u32 {
    3
}

fn default_test_command() -> String {
    "cargo test --quiet".to_string()
}

fn default_test_timeout_secs() -> u64 {
    300
}

fn default_review_timeout_secs() -> u64 {
    30
}

fn default_digest_interval_mins() -> u64 {
    1440
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            reversibility: 0.30,
            precedent: 0.35,
            blast_radius: 0.35,
        }
    }
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            act: ACT_THRESHOLD_FLOOR,
            escalate: 0.5,
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_per_hour: default_max_per_hour(),
            max_per_day: default_max_per_day(),
            pause_on_consecutive_failures: default_pause_on_consecutive_failures(),
            test_command: default_test_command(),
            test_timeout_secs: default_test_timeout_secs(),
            review_timeout_secs: default_review_timeout_secs(),
            digest_interval_mins: default_digest_interval_mins(),
            weights: ScoreWeights::default(),
            thresholds: ScoreThresholds::default(),
        }
    }
}

impl ScoreThresholds {
    /// Act threshold actually applied: configuration raises it, the floor
    /// catches anything lower (including NaN).
    #[must_use]
    pub fn effective_act(self) -> f64 {
        if self.act.is_finite() {
            self.act.max(ACT_THRESHOLD_FLOOR).min(1.0)
        } else {
            ACT_THRESHOLD_FLOOR
        }
    }

    /// Escalate threshold actually applied; non-finite values fall back to
    /// the default.
    #[must_use]
    pub fn effective_escalate(self) -> f64 {
        if self.escalate.is_finite() {
            self.escalate.clamp(0.0, 1.0)
        } else {
            Self::default().escalate
        }
    }
}

impl GovernorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, raw)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Default config location under the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "haru0416", "custos")
            .map(|dirs| dirs.config_dir().join("governor.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        validate_unit("weights.reversibility", self.weights.reversibility)?;
        validate_unit("weights.precedent", self.weights.precedent)?;
        validate_unit("weights.blast_radius", self.weights.blast_radius)?;
        validate_unit("thresholds.act", self.thresholds.act)?;
        validate_unit("thresholds.escalate", self.thresholds.escalate)?;

        if self.thresholds.effective_escalate() > self.thresholds.effective_act() {
            anyhow::bail!(
                "thresholds.escalate must be <= the effective act threshold ({})",
                self.thresholds.effective_act()
            );
        }
        if self.test_command.trim().is_empty() {
            anyhow::bail!("test_command must not be empty");
        }
        if self.test_timeout_secs == 0 {
            anyhow::bail!("test_timeout_secs must be >= 1");
        }
        Ok(())
    }
}

fn validate_unit(label: &str, value: f64) -> Result<()> {
    if value.is_nan() {
        anyhow::bail!("{label} must not be NaN");
    }
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{label} must be in [0.0, 1.0]");
    }
    Ok(())
}
