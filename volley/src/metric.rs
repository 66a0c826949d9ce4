use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use volley_macros::{record, status};

/// Lifecycle state of one action slot.
#[status]
#[derive(Default)]
#[serde(rename_all = "camelCase")]
pub enum ActionStatus {
    /// Completed without error.
    #[default]
    Normal,
    /// `execute` returned an error.
    Warn,
    /// `execute` ran past the scene's action timeout.
    Frozen,
    /// Still executing.
    Creating,
    /// Skipped on purpose, e.g. by fail-fast after an earlier failure.
    Closed,
    /// Marked for removal.
    Deleted,
}

/// The outcome of one action for one robot in one round.
///
/// Written once into the robot's result slot and never mutated afterwards.
#[record]
#[derive(Default)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Whatever `execute` returned; `Null` for skipped or failed actions.
    pub value: Value,
    pub error: Option<String>,
    pub status: ActionStatus,
    pub time_create: Option<DateTime<Utc>>,
    pub time_finish: Option<DateTime<Utc>>,
    pub time_spent: Duration,
}

impl ActionResult {
    /// A slot skipped without running anything.
    pub fn closed() -> Self {
        Self {
            status: ActionStatus::Closed,
            ..Default::default()
        }
    }

    pub fn is_normal(&self) -> bool {
        self.status == ActionStatus::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_slot_carries_no_error() {
        let r = ActionResult::closed();
        assert_eq!(r.status, ActionStatus::Closed);
        assert!(r.error.is_none());
        assert!(!r.is_normal());
        assert_eq!(r.time_spent, Duration::ZERO);
    }

    #[test]
    fn status_names_are_camel_case() {
        let json = serde_json::to_string(&ActionStatus::Frozen).unwrap();
        assert_eq!(json, "\"frozen\"");
    }
}
