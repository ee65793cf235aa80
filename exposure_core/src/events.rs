use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FinishedSnapshot;

/// Every state change of the session controller produces an event.
/// Front ends render them; the runtime forwards them to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    Started {
        planned_end_time: DateTime<Utc>,
        uv_index: f64,
        burn_limit_dose: f64,
        at: DateTime<Utc>,
    },
    Ticked {
        remaining_seconds: i64,
        elapsed_seconds: i64,
        accumulated_dose: f64,
        at: DateTime<Utc>,
    },
    UvIndexUpdated {
        uv_index: f64,
        planned_end_time: DateTime<Utc>,
        remaining_seconds: i64,
        at: DateTime<Utc>,
    },
    Extended {
        burn_limit_dose: f64,
        planned_end_time: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// A persisted session picked up after a restart or suspension
    Resumed {
        remaining_seconds: i64,
        accumulated_dose: f64,
        at: DateTime<Utc>,
    },
    Suspended {
        accumulated_dose: f64,
        at: DateTime<Utc>,
    },
    Finished {
        snapshot: FinishedSnapshot,
    },
}

impl SessionEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionEvent::Finished { .. })
    }
}
