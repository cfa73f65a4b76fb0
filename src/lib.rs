#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod approvals;
pub mod config;
pub mod error;
pub mod events;
pub mod journal;
pub mod pipeline;
pub mod precedent;
pub mod registry;
pub mod review;
pub mod score;
pub mod snapshot;
pub mod telemetry;
pub mod testgate;
pub mod tripwire;

pub use approvals::{ApprovalRequest, ApprovalsQueue};
pub use config::{ACT_THRESHOLD_FLOOR, GovernorConfig, ScoreThresholds, ScoreWeights};
pub use error::{CustosError, Result};
pub use events::GovernorEvent;
pub use journal::Digest;
pub use pipeline::{
    FileChange, Governor, GovernorDeps, Improvement, Outcome, ProcessReport,
};
pub use precedent::PrecedentStore;
pub use registry::{ActionClassRegistry, StaticClassRegistry};
pub use review::TextGenerator;
pub use score::{ActionDescriptor, ScoreResult, Tier, TrustSource, score};
pub use tripwire::TripwireStats;
