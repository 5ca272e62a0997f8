//! The task queue: durable, ordered by priority then insertion order, with a lazy
//! timeout-based reclamation step folded into `get_single_available_task`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mackenzie_core::db::{Db, JsonTree};
use mackenzie_core::error::{MackenzieError, Result};
use mackenzie_core::time::now_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Available,
    Assigned,
    Completed,
    Failed,
    Processed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub data: Value,
    pub priority: i32,
    pub state: TaskState,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<i64>,
    pub result: Option<Value>,
    /// Monotonically increasing insertion sequence number; breaks priority ties in
    /// insertion order, since `sled`'s own key order is lexicographic on task id.
    pub seq: u64,
}

pub struct TaskStore {
    tasks: JsonTree,
    seq: sled::Tree,
}

const SEQ_KEY: &[u8] = b"seq";

impl TaskStore {
    pub fn new(db: &Db) -> Result<Self> {
        Ok(Self {
            tasks: db.tree("task")?,
            seq: db.raw_tree("task_seq")?,
        })
    }

    fn next_seq(&self) -> Result<u64> {
        let v = self
            .seq
            .update_and_fetch(SEQ_KEY, |old| {
                let n = old
                    .map(|b| u64::from_be_bytes(b.try_into().unwrap_or([0; 8])))
                    .unwrap_or(0);
                Some((n + 1).to_be_bytes().to_vec())
            })?
            .expect("update_and_fetch always produces a value");
        Ok(u64::from_be_bytes(v.as_ref().try_into().unwrap()))
    }

    /// Insert a new task in the `available` state. Fails with a semantic conflict if
    /// `id` is already known — callers (task sources) may catch and ignore this for
    /// idempotent re-runs.
    pub fn add_new_task(&self, id: &str, task_type: &str, data: Value, priority: i32) -> Result<()> {
        if self.tasks.contains(id)? {
            return Err(MackenzieError::SemanticConflict(format!(
                "task {id:?} already exists"
            )));
        }
        let task = Task {
            id: id.to_string(),
            task_type: task_type.to_string(),
            data,
            priority,
            state: TaskState::Available,
            assigned_to: None,
            assigned_at: None,
            result: None,
            seq: self.next_seq()?,
        };
        self.tasks.insert(id, &task)
    }

    /// Reclaim any lease older than `task_timeout` seconds, then hand out the
    /// highest-priority available task (ties: insertion order) to `cluster`.
    pub fn get_single_available_task(
        &self,
        cluster: &str,
        task_timeout: i64,
    ) -> Result<Option<Task>> {
        let now = now_secs();
        let mut all: Vec<Task> = self.tasks.scan_all()?;

        for task in all.iter_mut() {
            if task.state == TaskState::Assigned {
                if let Some(assigned_at) = task.assigned_at {
                    if assigned_at < now - task_timeout {
                        tracing::warn!(task_id = %task.id, assigned_at, "reclaiming expired task lease");
                        task.state = TaskState::Available;
                        task.assigned_to = None;
                        task.assigned_at = None;
                        self.tasks.insert(&task.id, task)?;
                    }
                }
            }
        }

        let chosen = all
            .into_iter()
            .filter(|t| t.state == TaskState::Available)
            .min_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));

        let Some(mut task) = chosen else {
            return Ok(None);
        };

        task.state = TaskState::Assigned;
        task.assigned_to = Some(cluster.to_string());
        task.assigned_at = Some(now);
        self.tasks.insert(&task.id, &task)?;
        Ok(Some(task))
    }

    /// Idempotent: a task already `processed` ignores a late completion rather than
    /// erroring, so a reclaimed-and-reassigned task's original completer is harmless.
    pub fn set_task_completed(&self, id: &str, result: Value) -> Result<()> {
        let Some(mut task) = self.tasks.get::<Task>(id)? else {
            return Err(MackenzieError::NotFound(format!("task {id:?}")));
        };
        if task.state == TaskState::Processed {
            return Ok(());
        }
        task.state = TaskState::Completed;
        task.result = Some(result);
        self.tasks.insert(id, &task)
    }

    pub fn set_task_failed(&self, id: &str) -> Result<()> {
        let Some(mut task) = self.tasks.get::<Task>(id)? else {
            return Err(MackenzieError::NotFound(format!("task {id:?}")));
        };
        if matches!(task.state, TaskState::Completed | TaskState::Processed) {
            return Ok(());
        }
        task.state = TaskState::Failed;
        self.tasks.insert(id, &task)
    }

    pub fn get_all_completed_tasks(&self) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .scan_all::<Task>()?
            .into_iter()
            .filter(|t| t.state == TaskState::Completed)
            .collect())
    }

    pub fn set_task_processed(&self, id: &str) -> Result<()> {
        let Some(mut task) = self.tasks.get::<Task>(id)? else {
            return Err(MackenzieError::NotFound(format!("task {id:?}")));
        };
        if task.state == TaskState::Completed {
            task.state = TaskState::Processed;
            self.tasks.insert(id, &task)?;
        }
        Ok(())
    }

    pub fn counts_by_state(&self) -> Result<(u64, u64)> {
        let all = self.tasks.scan_all::<Task>()?;
        let available = all.iter().filter(|t| t.state == TaskState::Available).count() as u64;
        let assigned = all.iter().filter(|t| t.state == TaskState::Assigned).count() as u64;
        Ok((available, assigned))
    }
}
