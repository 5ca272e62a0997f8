//! JSON payloads carried as the opaque `data`/`result` fields of a `Task`.
//! These shapes are the stable wire contract between the task sources that
//! mint tasks and the agent handlers that drive them; both sides depend on
//! this crate rather than maintaining parallel copies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibTaskData {
    pub setup_name: String,
    pub cell: String,
    pub place: String,
    pub raw_params: Vec<f64>,
    pub multiplier: i32,
    pub max_runtime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibTask {
    pub task_id: String,
    pub task_data: CalibTaskData,
    pub output_dir: String,
    pub minimizer_id: String,
    pub task_group: String,
    pub num_replicates: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibTaskResult {
    pub cluster: String,
    pub output_dir: String,
    pub objective: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjTaskData {
    pub setup_name: String,
    pub cell: String,
    pub place: String,
    pub batch: i32,
    pub replicate: i32,
    pub multiplier: i32,
    pub max_runtime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjTask {
    pub task_id: String,
    pub task_data: ProjTaskData,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjTaskResult {
    pub cluster: String,
    pub output_dir: String,
}
