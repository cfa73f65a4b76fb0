use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::score::Tier;

/// Events emitted by the governor for observability and coordination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GovernorEvent {
    Applied {
        improvement_kind: String,
        class: String,
        tier: Tier,
    },
    RolledBack {
        improvement_kind: String,
        class: String,
        reason: String,
    },
    ReviewRejected {
        improvement_kind: String,
        class: String,
        concerns: Vec<String>,
    },
    AwaitingApproval {
        improvement_kind: String,
        class: String,
        request_id: String,
    },
    RateLimited {
        reason: String,
    },
    Paused {
        reason: String,
    },
    Resumed,
    Digest {
        total: u64,
    },
}

pub type EventSender = broadcast::Sender<GovernorEvent>;
pub type EventReceiver = broadcast::Receiver<GovernorEvent>;

/// Create a broadcast event bus with the given capacity.
pub fn event_bus(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}
