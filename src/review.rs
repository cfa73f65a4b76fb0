//! Review oracle — advisory LLM diff review.
//!
//! The test gate is the primary safety net; review is secondary. Any
//! generator failure, timeout, or unparseable response fails open.

use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::Improvement;

/// Maximum diff bytes included in a review prompt.
const MAX_PROMPT_DIFF_BYTES: usize = 4_096;

/// External text-generation function. Implementations wrap whatever model
/// backend the embedder uses.
pub trait TextGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

/// Generator used when no backend is wired up. Always errors, which the
/// oracle converts into a fail-open approval.
pub struct NoopGenerator;

impl TextGenerator for NoopGenerator {
    fn generate<'a>(
        &'a self,
        _prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async { Err(anyhow::anyhow!("no text generator configured")) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewVerdict {
    pub approved: bool,
    pub concerns: Vec<String>,
}

impl ReviewVerdict {
    fn fail_open() -> Self {
        Self {
            approved: true,
            concerns: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    approved: bool,
    #[serde(default)]
    concerns: Vec<String>,
}

pub struct ReviewOracle {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl ReviewOracle {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Review a proposed improvement. Never blocks past the configured
    /// timeout and never errors: anything short of an explicit, parseable
    /// rejection is an approval.
    pub async fn review(&self, improvement: &Improvement) -> ReviewVerdict {
        let prompt = build_prompt(improvement);

        let output =
            match tokio::time::timeout(self.timeout, self.generator.generate(&prompt)).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "review generator failed; failing open");
                    return ReviewVerdict::fail_open();
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.timeout.as_secs(),
                        "review timed out; failing open"
                    );
                    return ReviewVerdict::fail_open();
                }
            };

        match parse_review(&output) {
            Some(verdict) => verdict,
            None => {
                tracing::warn!("review response was not parseable; failing open");
                ReviewVerdict::fail_open()
            }
        }
    }
}

fn build_prompt(improvement: &Improvement) -> String {
    format!(
        "You are reviewing a proposed self-modification before it is committed.\n\
         Respond with JSON only: {{\"approved\": true|false, \"concerns\": [\"...\"]}}.\n\
         Reject only changes that look unsafe or unrelated to the stated reason.\n\n\
         Kind: {}\nReason: {}\n\nChanges:\n{}",
        improvement.kind,
        improvement.reason,
        improvement.diff_summary(MAX_PROMPT_DIFF_BYTES)
    )
}

fn parse_review(output: &str) -> Option<ReviewVerdict> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }
    let response: ReviewResponse = serde_json::from_str(&output[start..=end]).ok()?;
    Some(ReviewVerdict {
        approved: response.approved,
        concerns: response.concerns,
    })
}
