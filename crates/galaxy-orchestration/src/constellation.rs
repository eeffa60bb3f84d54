//! The Constellation DAG model (§3, §4.6): tasks (stars), dependencies
//! (lines), and the structural invariants binding them. Pure data and
//! synchronous transitions — no I/O, no suspension points. The orchestrator
//! is the only writer of runtime fields (status, result, timestamps); the
//! planner (external) is the only writer of structure (add/remove task or
//! dependency). Those two write sets never interleave within one
//! `Constellation` instance because the caller serializes them through
//! `ModificationSynchronizer::merge`.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use galaxy_shared::error::{GalaxyError, GalaxyResult};
use galaxy_shared::event::ConstellationStatistics;
use galaxy_shared::ids::{ConstellationId, DependencyId, TaskId};
use galaxy_shared::status::{ConstellationState, TaskStatus};
use galaxy_shared::task::{Dependency, Task};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constellation {
    pub id: ConstellationId,
    pub state: ConstellationState,
    pub created_at: DateTime<Utc>,
    pub(crate) tasks: HashMap<TaskId, Task>,
    pub(crate) dependencies: HashMap<DependencyId, Dependency>,
}

impl Constellation {
    pub fn new(id: ConstellationId) -> Self {
        Self {
            id,
            state: ConstellationState::Created,
            created_at: Utc::now(),
            tasks: HashMap::new(),
            dependencies: HashMap::new(),
        }
    }

    pub fn tasks(&self) -> &HashMap<TaskId, Task> {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut HashMap<TaskId, Task> {
        &mut self.tasks
    }

    pub fn dependencies(&self) -> &HashMap<DependencyId, Dependency> {
        &self.dependencies
    }

    pub fn set_state(&mut self, state: ConstellationState) {
        self.state = state;
    }

    /// Adds `task`. Re-adding an id already present updates it in place,
    /// mirroring `DeviceRegistry::register`'s idempotent-upsert convention.
    pub fn add_task(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Removes `task_id` and every dependency touching it.
    pub fn remove_task(&mut self, task_id: &TaskId) -> GalaxyResult<()> {
        if self.tasks.remove(task_id).is_none() {
            return Err(GalaxyError::TaskNotFound(task_id.clone()));
        }
        self.dependencies
            .retain(|_, dep| &dep.from_task != task_id && &dep.to_task != task_id);
        Ok(())
    }

    /// Adds `dependency`, rejecting it if either endpoint is unknown or if it
    /// would introduce a cycle (§3 invariant (b)).
    pub fn add_dependency(&mut self, dependency: Dependency) -> GalaxyResult<()> {
        if !self.tasks.contains_key(&dependency.from_task) {
            return Err(GalaxyError::TaskNotFound(dependency.from_task.clone()));
        }
        if !self.tasks.contains_key(&dependency.to_task) {
            return Err(GalaxyError::TaskNotFound(dependency.to_task.clone()));
        }
        if self.path_exists(&dependency.to_task, &dependency.from_task) {
            return Err(GalaxyError::CycleDetected {
                dependency: dependency.id.clone(),
                via: dependency.from_task.clone(),
            });
        }

        let to_task = dependency.to_task.clone();
        self.dependencies.insert(dependency.id.clone(), dependency);
        self.refresh_status(&to_task);
        Ok(())
    }

    pub fn remove_dependency(&mut self, dependency_id: &DependencyId) -> GalaxyResult<()> {
        let removed = self
            .dependencies
            .remove(dependency_id)
            .ok_or_else(|| GalaxyError::DependencyNotFound(dependency_id.clone()))?;
        self.refresh_status(&removed.to_task);
        Ok(())
    }

    /// `true` if a directed path exists from `from` to `to` over the current
    /// dependency set. Used by `add_dependency` to detect the cycle a new
    /// `from->to` edge would close: a path already existing `to -> ... ->
    /// from` means adding `from -> to` closes the loop.
    fn path_exists(&self, from: &TaskId, to: &TaskId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.clone());
        visited.insert(from.clone());
        while let Some(current) = queue.pop_front() {
            for dep in self.dependencies.values() {
                if dep.from_task == current {
                    if &dep.to_task == to {
                        return true;
                    }
                    if visited.insert(dep.to_task.clone()) {
                        queue.push_back(dep.to_task.clone());
                    }
                }
            }
        }
        false
    }

    fn inbound_dependencies(&self, task_id: &TaskId) -> impl Iterator<Item = &Dependency> {
        self.dependencies.values().filter(move |dep| &dep.to_task == task_id)
    }

    fn dependents_of<'a>(&'a self, task_id: &'a TaskId) -> impl Iterator<Item = TaskId> + 'a {
        self.dependencies
            .values()
            .filter(move |dep| &dep.from_task == task_id)
            .map(|dep| dep.to_task.clone())
    }

    fn inbound_satisfied(&self, task_id: &TaskId) -> bool {
        self.inbound_dependencies(task_id).all(|dep| {
            self.tasks
                .get(&dep.from_task)
                .map(|from_task| dep.is_satisfied(from_task.status, from_task.result.as_ref()))
                .unwrap_or(false)
        })
    }

    /// Recomputes whether `task_id` should be WAITING_DEPENDENCY or PENDING
    /// given its current inbound edges. A no-op for RUNNING or terminal
    /// tasks — structural edits never revive or preempt a task already past
    /// PENDING. Returns `true` if the task just became ready (transitioned
    /// WAITING_DEPENDENCY -> PENDING).
    fn refresh_status(&mut self, task_id: &TaskId) -> bool {
        let satisfied = self.inbound_satisfied(task_id);
        let Some(task) = self.tasks.get_mut(task_id) else { return false };
        if task.status.is_terminal() || task.status == TaskStatus::Running {
            return false;
        }
        let was_waiting = task.status == TaskStatus::WaitingDependency;
        task.status = if satisfied { TaskStatus::Pending } else { TaskStatus::WaitingDependency };
        was_waiting && task.status == TaskStatus::Pending
    }

    /// Structural validation (§4.6 `validate`): every dependency's endpoints
    /// exist and the graph is acyclic.
    pub fn validate(&self) -> (bool, Vec<String>) {
        let mut errors = Vec::new();
        for dep in self.dependencies.values() {
            if !self.tasks.contains_key(&dep.from_task) {
                errors.push(format!("dependency {} references unknown from-task {}", dep.id, dep.from_task));
            }
            if !self.tasks.contains_key(&dep.to_task) {
                errors.push(format!("dependency {} references unknown to-task {}", dep.id, dep.to_task));
            }
        }
        if self.topological_order().is_err() {
            errors.push("dependency graph contains a cycle".to_string());
        }
        (errors.is_empty(), errors)
    }

    /// All tasks whose every inbound edge is satisfied and that are
    /// themselves in PENDING or WAITING_DEPENDENCY (§4.6 `ready_tasks`).
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|task| matches!(task.status, TaskStatus::Pending | TaskStatus::WaitingDependency))
            .filter(|task| self.inbound_satisfied(&task.id))
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn mark_task_started(&mut self, task_id: &TaskId) -> GalaxyResult<()> {
        let task = self.tasks.get_mut(task_id).ok_or_else(|| GalaxyError::TaskNotFound(task_id.clone()))?;
        if task.status.is_terminal() {
            return Err(GalaxyError::TerminalTaskMutation(task_id.clone()));
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        Ok(())
    }

    /// Transitions `task_id` to a terminal state and returns the tasks that
    /// became newly ready as a consequence (§4.6). Terminal states are
    /// absorbing: calling this again on an already-terminal task is
    /// rejected rather than silently ignored, since a planner or
    /// orchestrator bug double-resolving a task is a real invariant
    /// violation (§8).
    pub fn mark_task_completed(
        &mut self,
        task_id: &TaskId,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> GalaxyResult<Vec<TaskId>> {
        {
            let task = self.tasks.get_mut(task_id).ok_or_else(|| GalaxyError::TaskNotFound(task_id.clone()))?;
            if task.status.is_terminal() {
                return Err(GalaxyError::TerminalTaskMutation(task_id.clone()));
            }
            task.status = if success { TaskStatus::Completed } else { TaskStatus::Failed };
            task.result = result;
            task.error = error;
            task.finished_at = Some(Utc::now());
        }

        let dependents: Vec<TaskId> = self.dependents_of(task_id).collect();
        let mut newly_ready = Vec::new();
        for dependent in dependents {
            if self.refresh_status(&dependent) {
                newly_ready.push(dependent);
            }
        }
        Ok(newly_ready)
    }

    /// `true` iff the ready-set is empty and no task is RUNNING (§3
    /// invariant (d)).
    pub fn is_complete(&self) -> bool {
        let no_running = !self.tasks.values().any(|task| task.status == TaskStatus::Running);
        no_running && self.ready_tasks().is_empty()
    }

    pub fn statistics(&self) -> ConstellationStatistics {
        let mut stats = ConstellationStatistics {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                _ => {}
            }
        }
        stats
    }

    /// Kahn's algorithm. Returns `Err` if the graph contains a cycle, which
    /// should be unreachable given `add_dependency`'s rejection, but
    /// `validate()` uses this as its own independent check.
    pub fn topological_order(&self) -> GalaxyResult<Vec<TaskId>> {
        let mut in_degree: HashMap<TaskId, usize> = self.tasks.keys().map(|id| (id.clone(), 0)).collect();
        for dep in self.dependencies.values() {
            if let Some(degree) = in_degree.get_mut(&dep.to_task) {
                *degree += 1;
            }
        }

        let mut queue: VecDeque<TaskId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(task_id) = queue.pop_front() {
            order.push(task_id.clone());
            for dependent in self.dependents_of(&task_id) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != self.tasks.len() {
            return Err(GalaxyError::InvalidConstellation(vec![
                "dependency graph contains a cycle".to_string(),
            ]));
        }
        Ok(order)
    }
}
