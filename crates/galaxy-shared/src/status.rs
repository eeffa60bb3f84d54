//! Status enums and the advancement ordering used to merge two views of the
//! same task (see `synchronizer::merge` in `galaxy-orchestration`).

use serde::{Deserialize, Serialize};

/// Lifecycle status of a device in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Registered,
    Connecting,
    Connected,
    Idle,
    Busy,
    Disconnected,
    Failed,
}

impl DeviceStatus {
    /// `true` for any status where `current_task_id` must be set.
    pub fn requires_current_task(self) -> bool {
        matches!(self, DeviceStatus::Busy)
    }
}

/// Lifecycle status of a task (star).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    WaitingDependency,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are absorbing: once reached, no further transition
    /// is observed for that task within the same constellation instance.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Rank in the advancement order `PENDING < WAITING_DEPENDENCY < RUNNING
    /// < {COMPLETED, FAILED, CANCELLED}`. Terminal statuses share a rank:
    /// once either view is terminal, that view wins regardless of *which*
    /// terminal status it is — the merge never needs to prefer COMPLETED
    /// over FAILED or vice versa, only "terminal over non-terminal".
    fn advancement_rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::WaitingDependency => 1,
            TaskStatus::Running => 2,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => 3,
        }
    }

    /// `true` if `self` is at least as advanced as `other` per the
    /// advancement order, i.e. `self` should win a merge against `other`.
    pub fn is_at_least_as_advanced_as(self, other: TaskStatus) -> bool {
        self.advancement_rank() >= other.advancement_rank()
    }

    /// `true` if `self` is strictly more advanced than `other`.
    pub fn is_more_advanced_than(self, other: TaskStatus) -> bool {
        self.advancement_rank() > other.advancement_rank()
    }
}

/// Overall state of a constellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstellationState {
    Created,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// Kind of a dependency edge, determining when it is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyKind {
    /// Satisfied only when the from-task reaches `COMPLETED`.
    SuccessOnly,
    /// Satisfied once the from-task reaches any terminal state.
    Unconditional,
    /// Satisfied when the from-task completes and its result matches a
    /// trigger keyword carried alongside the edge.
    ConditionWithKeyword,
}

/// Scheduling priority of a task. Currently informational only — the
/// round-robin assignment strategy does not yet weight by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancement_order_is_monotonic() {
        assert!(TaskStatus::WaitingDependency.is_more_advanced_than(TaskStatus::Pending));
        assert!(TaskStatus::Running.is_more_advanced_than(TaskStatus::WaitingDependency));
        assert!(TaskStatus::Completed.is_more_advanced_than(TaskStatus::Running));
        assert!(!TaskStatus::Pending.is_more_advanced_than(TaskStatus::Running));
    }

    #[test]
    fn terminal_statuses_tie_at_the_top() {
        assert!(TaskStatus::Failed.is_at_least_as_advanced_as(TaskStatus::Completed));
        assert!(TaskStatus::Completed.is_at_least_as_advanced_as(TaskStatus::Cancelled));
        assert!(!TaskStatus::Completed.is_more_advanced_than(TaskStatus::Failed));
    }

    #[test]
    fn terminal_statuses_are_absorbing() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
