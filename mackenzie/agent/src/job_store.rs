//! Agent-local mirror of in-flight tasks plus the batch-scheduler's per-attempt
//! bookkeeping. Lives in the agent's own `sled` store, independent of the
//! controller's task queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mackenzie_core::db::{Db, JsonTree};
use mackenzie_core::error::{MackenzieError, Result};
use mackenzie_core::time::now_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Ready,
    Running,
    Failed,
    Completed,
    Aborted,
    Processed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub job_type: String,
    pub data: Value,
    pub priority: i32,
    pub sbatch_script_path: String,
    pub load: i32,
    pub max_fails: i32,
    pub result: Option<Value>,
    pub batch_job_id: Option<i64>,
    pub state: JobState,
    pub failure_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub batch_job_id: i64,
    pub job_id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub accounting_blob: Option<String>,
}

pub struct JobStore {
    jobs: JsonTree,
    batch_jobs: JsonTree,
}

impl JobStore {
    pub fn new(db: &Db) -> Result<Self> {
        Ok(Self {
            jobs: db.tree("job")?,
            batch_jobs: db.tree("batch_job")?,
        })
    }

    pub fn add_job(
        &self,
        job_id: &str,
        job_type: &str,
        data: Value,
        priority: i32,
        sbatch_script_path: String,
        load: i32,
        max_fails: i32,
    ) -> Result<()> {
        let job = Job {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            data,
            priority,
            sbatch_script_path,
            load,
            max_fails,
            result: None,
            batch_job_id: None,
            state: JobState::Ready,
            failure_count: 0,
        };
        self.jobs.insert(job_id, &job)
    }

    fn get(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .get(job_id)?
            .ok_or_else(|| MackenzieError::NotFound(format!("job {job_id:?}")))
    }

    pub fn set_job_ready(&self, job_id: &str, sbatch_script_path: String) -> Result<()> {
        let mut job = self.get(job_id)?;
        job.sbatch_script_path = sbatch_script_path;
        job.state = JobState::Ready;
        self.jobs.insert(job_id, &job)
    }

    pub fn set_job_running(&self, job_id: &str, batch_job_id: i64) -> Result<()> {
        let mut job = self.get(job_id)?;
        job.state = JobState::Running;
        job.batch_job_id = Some(batch_job_id);
        self.jobs.insert(job_id, &job)
    }

    pub fn set_job_failed(&self, job_id: &str) -> Result<()> {
        let mut job = self.get(job_id)?;
        job.state = JobState::Failed;
        job.failure_count += 1;
        self.jobs.insert(job_id, &job)
    }

    pub fn set_job_completed(&self, job_id: &str, result: Value) -> Result<()> {
        let mut job = self.get(job_id)?;
        job.state = JobState::Completed;
        job.result = Some(result);
        self.jobs.insert(job_id, &job)
    }

    pub fn set_job_aborted(&self, job_id: &str) -> Result<()> {
        let mut job = self.get(job_id)?;
        job.state = JobState::Aborted;
        self.jobs.insert(job_id, &job)
    }

    pub fn all_with_state(&self, state: JobState) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .scan_all::<Job>()?
            .into_iter()
            .filter(|j| j.state == state)
            .collect())
    }

    pub fn get_live_load(&self) -> Result<i32> {
        Ok(self
            .jobs
            .scan_all::<Job>()?
            .into_iter()
            .filter(|j| {
                matches!(
                    j.state,
                    JobState::Ready | JobState::Running | JobState::Failed
                )
            })
            .map(|j| j.load)
            .sum())
    }

    pub fn get_running_load(&self) -> Result<i32> {
        Ok(self
            .jobs
            .scan_all::<Job>()?
            .into_iter()
            .filter(|j| j.state == JobState::Running)
            .map(|j| j.load)
            .sum())
    }

    pub fn add_batch_job(&self, batch_job_id: i64, job_id: &str) -> Result<()> {
        let batch_job = BatchJob {
            batch_job_id,
            job_id: job_id.to_string(),
            start_time: now_secs(),
            end_time: None,
            accounting_blob: None,
        };
        self.batch_jobs.insert(&batch_job_id.to_string(), &batch_job)
    }

    pub fn set_batch_job_completion_info(
        &self,
        batch_job_id: i64,
        accounting_blob: String,
    ) -> Result<()> {
        let key = batch_job_id.to_string();
        let Some(mut batch_job) = self.batch_jobs.get::<BatchJob>(&key)? else {
            return Err(MackenzieError::NotFound(format!("batch job {batch_job_id}")));
        };
        batch_job.end_time = Some(now_secs());
        batch_job.accounting_blob = Some(accounting_blob);
        self.batch_jobs.insert(&key, &batch_job)
    }
}
