//! DAG task graph data model and the pure topological-sort/cycle-check
//! algorithm. The runner that actually executes tasks against the
//! audit store and task-run repository lives in
//! `flightledger-engine::dag`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One unit of work in a DAG. `run` is boxed rather than generic so that
/// a `DAG` can hold a heterogeneous list of tasks, mirroring the
/// original's `Callable[[], Any]` — a task may return any JSON-shaped
/// result, not just `()`.
pub struct Task {
    /// Unique name within the owning DAG.
    pub name: String,
    /// Names of tasks that must complete (successfully or not) before
    /// this one runs.
    pub depends_on: Vec<String>,
    /// The work itself. Returns `Ok(value)` on success (wrapped as
    /// `{"value": ...}` by the runner unless the value is already a JSON
    /// object) or `Err(message)` on failure — a failed task never
    /// unwinds the runner.
    #[allow(clippy::type_complexity)]
    pub run: Box<dyn Fn() -> Result<serde_json::Value, String> + Send + Sync>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// A named collection of tasks forming one close-cycle pipeline.
#[derive(Debug)]
pub struct Dag {
    pub name: String,
    pub tasks: Vec<Task>,
}

/// A task declared a dependency on a task name that doesn't exist in the
/// same DAG. Raised at construction; the run never starts.
#[derive(Debug, Error)]
#[error("task '{task}' depends on unknown task '{dependency}'")]
pub struct ConfigError {
    pub task: String,
    pub dependency: String,
}

/// The DAG's dependency graph contains a cycle. Raised at construction;
/// the run never starts.
#[derive(Debug, Error)]
#[error("circular dependency detected in DAG")]
pub struct CycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Validates that every dependency resolves to a declared task, then
/// computes a topological execution order by depth-first traversal in
/// declaration order.
///
/// A task currently `Gray` (on the current DFS path) that is revisited
/// signals a cycle, the standard tri-color DFS cycle check.
///
/// # Errors
/// Returns [`ConfigError`] for an unknown dependency, or [`CycleError`]
/// if the graph contains a cycle.
pub fn topological_order(tasks: &[Task]) -> Result<Vec<String>, DagValidationError> {
    let index: std::collections::HashMap<&str, &Task> =
        tasks.iter().map(|t| (t.name.as_str(), t)).collect();

    for task in tasks {
        for dep in &task.depends_on {
            if !index.contains_key(dep.as_str()) {
                return Err(DagValidationError::Config(ConfigError {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                }));
            }
        }
    }

    let mut color: std::collections::HashMap<&str, Color> =
        tasks.iter().map(|t| (t.name.as_str(), Color::White)).collect();
    let mut order = Vec::with_capacity(tasks.len());

    fn visit<'a>(
        name: &'a str,
        index: &std::collections::HashMap<&'a str, &'a Task>,
        color: &mut std::collections::HashMap<&'a str, Color>,
        order: &mut Vec<String>,
    ) -> Result<(), CycleError> {
        match color.get(name) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => return Err(CycleError),
            _ => {}
        }
        color.insert(name, Color::Gray);
        let task = index[name];
        for dep in &task.depends_on {
            visit(dep, index, color, order)?;
        }
        color.insert(name, Color::Black);
        order.push(name.to_string());
        Ok(())
    }

    for task in tasks {
        visit(&task.name, &index, &mut color, &mut order).map_err(DagValidationError::Cycle)?;
    }
    Ok(order)
}

/// Either failure mode from DAG construction.
#[derive(Debug, Error)]
pub enum DagValidationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Status of one task-run row, tracked across the single execution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Whether this status cascades as `skipped` to dependents.
    #[must_use]
    pub const fn cascades_as_skip(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

/// Overall status of one DAG run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DagRunStatus {
    Running,
    Succeeded,
    Failed,
}

/// A persisted DAG run header row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRunRow {
    pub id: Uuid,
    pub dag_name: String,
    pub status: DagRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A persisted per-task row within one DAG run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunRow {
    pub id: Uuid,
    pub dag_run_id: Uuid,
    pub task_name: String,
    pub status: TaskStatus,
    pub depends_on: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, deps: &[&str]) -> Task {
        Task {
            name: name.to_string(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            run: Box::new(|| Ok(serde_json::Value::Null)),
        }
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let tasks = vec![task("c", &["a", "b"]), task("a", &[]), task("b", &[])];
        let order = topological_order(&tasks).unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn unknown_dependency_is_config_error() {
        let tasks = vec![task("a", &["ghost"])];
        assert!(matches!(
            topological_order(&tasks),
            Err(DagValidationError::Config(_))
        ));
    }

    #[test]
    fn cycle_is_detected() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        assert!(matches!(
            topological_order(&tasks),
            Err(DagValidationError::Cycle(_))
        ));
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn task(name: String, deps: Vec<String>) -> Task {
        Task {
            name,
            depends_on: deps,
            run: Box::new(|| Ok(serde_json::Value::Null)),
        }
    }

    /// Generates an acyclic DAG: `n` tasks named `t0..tn`, each allowed
    /// to depend only on lower-numbered tasks, so the name ordering
    /// itself is already a valid (if uninteresting) topological order we
    /// can check the computed one against.
    fn acyclic_dag() -> impl Strategy<Value = Vec<(usize, Vec<usize>)>> {
        (2_usize..12).prop_flat_map(|n| {
            let deps_per_task: Vec<_> = (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..i.min(3)))
                .collect();
            deps_per_task.prop_map(move |deps| {
                (0..n)
                    .map(|i| {
                        let mut d: Vec<usize> = deps[i].iter().copied().filter(|&x| x < i).collect();
                        d.sort_unstable();
                        d.dedup();
                        (i, d)
                    })
                    .collect()
            })
        })
    }

    proptest! {
        #[test]
        fn every_dependency_is_ordered_before_its_dependents(spec in acyclic_dag()) {
            let tasks: Vec<Task> = spec
                .iter()
                .map(|(i, deps)| {
                    task(
                        format!("t{i}"),
                        deps.iter().map(|d| format!("t{d}")).collect(),
                    )
                })
                .collect();

            let order = topological_order(&tasks).unwrap();
            prop_assert_eq!(order.len(), tasks.len());

            let position = |name: &str| order.iter().position(|x| x == name).unwrap();
            for (i, deps) in &spec {
                for dep in deps {
                    prop_assert!(position(&format!("t{dep}")) < position(&format!("t{i}")));
                }
            }
        }
    }
}
