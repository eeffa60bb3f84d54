//! Pure data shape of a task (star) and a dependency (line). The DAG that
//! owns these — [`galaxy_orchestration`]'s `Constellation` — is where
//! structural invariants are enforced; these structs only carry fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, TaskId};
use crate::status::{DependencyKind, Priority, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub device_id: Option<DeviceId>,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub priority: Priority,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            device_id: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            priority: Priority::default(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn assigned_to(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: crate::ids::DependencyId,
    pub from_task: TaskId,
    pub to_task: TaskId,
    pub kind: DependencyKind,
    pub trigger_keyword: Option<String>,
}

impl Dependency {
    pub fn new(
        id: crate::ids::DependencyId,
        from_task: TaskId,
        to_task: TaskId,
        kind: DependencyKind,
    ) -> Self {
        Self {
            id,
            from_task,
            to_task,
            kind,
            trigger_keyword: None,
        }
    }

    /// Evaluates whether this edge is satisfied given the from-task's
    /// current status and (for keyword-conditional edges) its result.
    pub fn is_satisfied(&self, from_status: TaskStatus, from_result: Option<&serde_json::Value>) -> bool {
        match self.kind {
            DependencyKind::SuccessOnly => from_status == TaskStatus::Completed,
            DependencyKind::Unconditional => from_status.is_terminal(),
            DependencyKind::ConditionWithKeyword => {
                if from_status != TaskStatus::Completed {
                    return false;
                }
                match (&self.trigger_keyword, from_result) {
                    (Some(keyword), Some(value)) => value
                        .as_str()
                        .map(|s| s.contains(keyword.as_str()))
                        .unwrap_or(false),
                    _ => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DependencyId as SharedDependencyId;

    #[test]
    fn success_only_requires_completed() {
        let dep = Dependency::new(
            SharedDependencyId::new("e1"),
            TaskId::new("a"),
            TaskId::new("b"),
            DependencyKind::SuccessOnly,
        );
        assert!(dep.is_satisfied(TaskStatus::Completed, None));
        assert!(!dep.is_satisfied(TaskStatus::Failed, None));
    }

    #[test]
    fn unconditional_accepts_any_terminal_status() {
        let dep = Dependency::new(
            SharedDependencyId::new("e1"),
            TaskId::new("a"),
            TaskId::new("b"),
            DependencyKind::Unconditional,
        );
        assert!(dep.is_satisfied(TaskStatus::Failed, None));
        assert!(dep.is_satisfied(TaskStatus::Cancelled, None));
        assert!(!dep.is_satisfied(TaskStatus::Running, None));
    }

    #[test]
    fn condition_with_keyword_checks_result_substring() {
        let mut dep = Dependency::new(
            SharedDependencyId::new("e1"),
            TaskId::new("a"),
            TaskId::new("b"),
            DependencyKind::ConditionWithKeyword,
        );
        dep.trigger_keyword = Some("retry".to_string());
        let result = serde_json::json!("please retry later");
        assert!(dep.is_satisfied(TaskStatus::Completed, Some(&result)));
        let other = serde_json::json!("all good");
        assert!(!dep.is_satisfied(TaskStatus::Completed, Some(&other)));
    }
}
