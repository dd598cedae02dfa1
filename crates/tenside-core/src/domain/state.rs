//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// TaskStatus はタスクの状態を表現
///
/// State transitions:
/// - Pending -> Running -> Done
/// - Pending -> Running -> Error
///
/// Done and Error are terminal. A record left in Running after a worker
/// crash stays visibly Running; nothing moves it back to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Queued, waiting for `run_next`.
    Pending,

    /// Claimed by a worker process.
    Running,

    /// Finished successfully.
    Done,

    /// Finished with a failure.
    Error,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Done => "DONE",
            TaskStatus::Error => "ERROR",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Done)
                | (TaskStatus::Running, TaskStatus::Error)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::claim(TaskStatus::Pending, TaskStatus::Running)]
    #[case::finish(TaskStatus::Running, TaskStatus::Done)]
    #[case::fail(TaskStatus::Running, TaskStatus::Error)]
    fn allowed_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_running(TaskStatus::Pending, TaskStatus::Done)]
    #[case::back_to_pending(TaskStatus::Running, TaskStatus::Pending)]
    #[case::restart_done(TaskStatus::Done, TaskStatus::Running)]
    #[case::restart_error(TaskStatus::Error, TaskStatus::Running)]
    #[case::rerun(TaskStatus::Running, TaskStatus::Running)]
    fn rejected_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn wire_form_is_upper_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        let parsed: TaskStatus = serde_json::from_str("\"DONE\"").unwrap();
        assert_eq!(parsed, TaskStatus::Done);
        assert!(parsed.is_terminal());
    }
}
