//! Executes a validated [`Dag`] against the audit store and task-run
//! repository. Grounded in `original_source/.../orchestrator/dag.py`'s
//! two-pass design: every task gets a `pending` row before any of them
//! run, then the topological pass executes them and cascades skips.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use flightledger_core::audit::AuditEntry;
use flightledger_core::clock::Clock;
use flightledger_core::dag::{
    topological_order, Dag, DagRunRow, DagRunStatus, DagValidationError, TaskRunRow, TaskStatus,
};
use flightledger_core::error::{BackendError, NotFoundError};
use flightledger_core::repository::{DagRunRepository, TaskRunRepository};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::AuditStore;

/// Failure modes of [`DagRunner::new`] and [`DagRunner::get_run`].
#[derive(Debug, Error)]
pub enum DagError {
    #[error(transparent)]
    Validation(#[from] DagValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A validated DAG bound to a particular run, ready to execute. Holds
/// the computed topological order so validation happens once, at
/// construction, never mid-run.
pub struct DagRunner {
    dag: Dag,
    order: Vec<String>,
    run_repository: Arc<dyn DagRunRepository>,
    task_repository: Arc<dyn TaskRunRepository>,
    audit: Option<Arc<AuditStore>>,
    clock: Arc<dyn Clock>,
    run_id: Uuid,
}

impl DagRunner {
    /// Validates `dag` (unknown dependencies, cycles) and persists the
    /// run header plus one `pending` [`TaskRunRow`] per task before
    /// returning. The run has not executed yet; call [`DagRunner::run`].
    ///
    /// # Errors
    /// Returns [`DagError::Validation`] if the DAG doesn't validate, or
    /// [`DagError::Backend`] if persisting the initial rows fails.
    pub fn new(
        dag: Dag,
        run_repository: Arc<dyn DagRunRepository>,
        task_repository: Arc<dyn TaskRunRepository>,
        audit: Option<Arc<AuditStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DagError> {
        let order = topological_order(&dag.tasks)?;

        let run_id = Uuid::new_v4();
        let started_at = clock.now();
        run_repository.insert(DagRunRow {
            id: run_id,
            dag_name: dag.name.clone(),
            status: DagRunStatus::Running,
            started_at,
            completed_at: None,
        })?;

        for task in &dag.tasks {
            task_repository.insert(TaskRunRow {
                id: Uuid::new_v4(),
                dag_run_id: run_id,
                task_name: task.name.clone(),
                status: TaskStatus::Pending,
                depends_on: task.depends_on.clone(),
                started_at: None,
                completed_at: None,
                error_message: None,
                result: None,
            })?;
        }

        Ok(Self {
            dag,
            order,
            run_repository,
            task_repository,
            audit,
            clock,
            run_id,
        })
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The validated execution order, dependencies before dependents.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.order
    }

    /// Executes every task in topological order. A task whose `run`
    /// returns `Err` fails without unwinding; any dependent not yet run
    /// is skipped rather than attempted, and that skip cascades further
    /// down the graph. The run's final status is `succeeded` only if
    /// every task succeeded.
    ///
    /// # Errors
    /// Returns [`DagError::Backend`] if persisting a task or run update
    /// fails partway through; tasks already recorded keep their result.
    pub fn run(&self) -> Result<DagRunStatus, DagError> {
        let rows = self.task_repository.get_by_run(self.run_id)?;
        let mut skipped: BTreeSet<String> = BTreeSet::new();
        let mut any_failed = false;

        for task_name in &self.order {
            let task = self
                .dag
                .tasks
                .iter()
                .find(|t| &t.name == task_name)
                .expect("execution order only contains declared tasks");
            let row = rows
                .iter()
                .find(|r| &r.task_name == task_name)
                .expect("every task has a pre-inserted run row")
                .clone();

            let blocked_on = task.depends_on.iter().find(|dep| skipped.contains(*dep));
            if let Some(dep) = blocked_on {
                skipped.insert(task_name.clone());
                any_failed = true;
                self.task_repository.update(
                    row.id,
                    TaskStatus::Skipped,
                    None,
                    Some(self.clock.now()),
                    Some(format!("skipped: dependency '{dep}' did not succeed")),
                    None,
                )?;
                self.log_task(task_name, "task_skipped", None);
                continue;
            }

            let started_at = self.clock.now();
            self.task_repository.update(
                row.id,
                TaskStatus::Running,
                Some(started_at),
                None,
                None,
                None,
            )?;

            match (task.run)() {
                Ok(value) => {
                    let result = normalize_result(value);
                    self.task_repository.update(
                        row.id,
                        TaskStatus::Succeeded,
                        Some(started_at),
                        Some(self.clock.now()),
                        None,
                        Some(result.clone()),
                    )?;
                    self.log_task(task_name, "task_succeeded", Some(result));
                }
                Err(message) => {
                    any_failed = true;
                    skipped.insert(task_name.clone());
                    self.task_repository.update(
                        row.id,
                        TaskStatus::Failed,
                        Some(started_at),
                        Some(self.clock.now()),
                        Some(message.clone()),
                        None,
                    )?;
                    self.log_task(task_name, "task_failed", None);
                }
            }
        }

        let final_status = if any_failed {
            DagRunStatus::Failed
        } else {
            DagRunStatus::Succeeded
        };
        self.run_repository
            .update_status(self.run_id, final_status, Some(self.clock.now()))?;
        Ok(final_status)
    }

    /// The run header plus every task row, sorted by `task_name`.
    ///
    /// # Errors
    /// Returns [`DagError::NotFound`] if `run_id` is unknown.
    pub fn get_run(
        run_id: Uuid,
        run_repository: &dyn DagRunRepository,
        task_repository: &dyn TaskRunRepository,
    ) -> Result<(DagRunRow, Vec<TaskRunRow>), DagError> {
        let run = run_repository
            .get(run_id)?
            .ok_or_else(|| NotFoundError::new("dag run", run_id.to_string()))?;
        let mut tasks = task_repository.get_by_run(run_id)?;
        tasks.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        Ok((run, tasks))
    }

    fn log_task(&self, task_name: &str, action: &str, result: Option<serde_json::Value>) {
        let Some(audit) = &self.audit else {
            return;
        };
        let mut detail = serde_json::Map::new();
        detail.insert("dag_name".to_string(), serde_json::json!(self.dag.name));
        detail.insert("task_name".to_string(), serde_json::json!(task_name));
        let entry = AuditEntry::new(action, "dag_runner")
            .with_output_reference(self.run_id.to_string())
            .with_detail(match result {
                Some(value) => {
                    detail.insert("result".to_string(), value);
                    serde_json::Value::Object(detail)
                }
                None => serde_json::Value::Object(detail),
            });
        // Audit logging failures never abort a DAG run; they're visible
        // only via the audit log's own absence, which is acceptable for
        // a side channel that doesn't gate task execution.
        let _ = audit.log(entry);
    }
}

/// Wraps a task's raw return value as `{"value": ...}` unless it's
/// already a JSON object.
fn normalize_result(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(_) => value,
        other => serde_json::json!({ "value": other }),
    }
}

#[cfg(test)]
mod tests {
    use flightledger_core::clock::SystemClock;
    use flightledger_core::dag::Task;
    use flightledger_memory::MemoryBackend;

    use super::*;

    fn task(name: &str, deps: &[&str], ok: bool) -> Task {
        Task {
            name: name.to_string(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            run: if ok {
                Box::new(|| Ok(serde_json::json!(42)))
            } else {
                Box::new(|| Err("boom".to_string()))
            },
        }
    }

    #[test]
    fn fan_in_succeeds_when_all_dependencies_succeed() {
        let backend = Arc::new(MemoryBackend::new());
        let dag = Dag {
            name: "close".to_string(),
            tasks: vec![
                task("a", &[], true),
                task("b", &[], true),
                task("merge", &["a", "b"], true),
            ],
        };
        let runner = DagRunner::new(dag, backend.clone(), backend.clone(), None, Arc::new(SystemClock))
            .unwrap();
        let status = runner.run().unwrap();
        assert_eq!(status, DagRunStatus::Succeeded);

        let (run, tasks) = DagRunner::get_run(runner.run_id(), backend.as_ref(), backend.as_ref()).unwrap();
        assert_eq!(run.status, DagRunStatus::Succeeded);
        let merge = tasks.iter().find(|t| t.task_name == "merge").unwrap();
        assert_eq!(merge.status, TaskStatus::Succeeded);
    }

    #[test]
    fn failure_cascades_as_skip_to_dependents() {
        let backend = Arc::new(MemoryBackend::new());
        let dag = Dag {
            name: "close".to_string(),
            tasks: vec![
                task("extract", &[], false),
                task("transform", &["extract"], true),
                task("load", &["transform"], true),
            ],
        };
        let runner = DagRunner::new(dag, backend.clone(), backend.clone(), None, Arc::new(SystemClock))
            .unwrap();
        let status = runner.run().unwrap();
        assert_eq!(status, DagRunStatus::Failed);

        let (_, tasks) = DagRunner::get_run(runner.run_id(), backend.as_ref(), backend.as_ref()).unwrap();
        let by_name = |name: &str| tasks.iter().find(|t| t.task_name == name).unwrap().status;
        assert_eq!(by_name("extract"), TaskStatus::Failed);
        assert_eq!(by_name("transform"), TaskStatus::Skipped);
        assert_eq!(by_name("load"), TaskStatus::Skipped);
    }

    #[test]
    fn unrelated_branch_still_succeeds_after_sibling_failure() {
        let backend = Arc::new(MemoryBackend::new());
        let dag = Dag {
            name: "close".to_string(),
            tasks: vec![task("broken", &[], false), task("independent", &[], true)],
        };
        let runner = DagRunner::new(dag, backend.clone(), backend.clone(), None, Arc::new(SystemClock))
            .unwrap();
        runner.run().unwrap();

        let (_, tasks) = DagRunner::get_run(runner.run_id(), backend.as_ref(), backend.as_ref()).unwrap();
        let independent = tasks.iter().find(|t| t.task_name == "independent").unwrap();
        assert_eq!(independent.status, TaskStatus::Succeeded);
    }

    #[test]
    fn unknown_dependency_is_rejected_before_any_row_is_written() {
        let backend = Arc::new(MemoryBackend::new());
        let dag = Dag {
            name: "close".to_string(),
            tasks: vec![task("a", &["ghost"], true)],
        };
        let result = DagRunner::new(dag, backend.clone(), backend, None, Arc::new(SystemClock));
        assert!(matches!(result, Err(DagError::Validation(_))));
    }
}
