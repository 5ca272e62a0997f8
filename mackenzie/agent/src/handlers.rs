//! Task-type handler tables. `setup_task` renders a batch-scheduler script for a
//! task and reports its resource cost; `get_task_result` inspects a finished
//! job's output directory and reports whether — and with what payload — it
//! succeeded. The concrete simulation staging a real deployment performs
//! (rendering scenario files, checking run logs) is this workspace's external
//! collaborator; handlers here only uphold the directory/result contract.

use std::path::{Path, PathBuf};

use serde_json::Value;

use mackenzie_calibration::{CalibTask, CalibTaskResult, ProjTask, ProjTaskResult};
use mackenzie_core::error::{MackenzieError, Result};

use crate::output_dir::mkdir_output_dir;

/// Default retry budget for a task type absent a more specific override.
pub const DEFAULT_MAX_FAILS: i32 = 100;

pub trait TaskHandler: Send + Sync {
    /// Render the output directory and batch script for `data`, returning
    /// `(script_path, load, max_fails)`.
    fn setup_task(&self, setup_root: &Path, output_root: &Path, data: &Value) -> Result<(PathBuf, i32, i32)>;

    /// Inspect the task's output directory; `Ok(None)` means not yet determined
    /// to have succeeded (treated as a failed attempt by the pipeline).
    fn get_task_result(&self, setup_root: &Path, output_root: &Path, data: &Value) -> Result<Option<Value>>;
}

pub struct CalibrationHandler {
    pub cluster: String,
}

impl TaskHandler for CalibrationHandler {
    fn setup_task(&self, setup_root: &Path, output_root: &Path, data: &Value) -> Result<(PathBuf, i32, i32)> {
        let task: CalibTask = serde_json::from_value(data.clone())?;
        let output_dir = output_root.join(&task.output_dir);
        mkdir_output_dir(&output_dir)?;

        std::fs::write(
            output_dir.join("taskData.json"),
            serde_json::to_vec(&task)?,
        )?;

        let setup_dir = setup_root.join(&task.task_data.setup_name);
        let script_path = output_dir.join("run.sbatch");
        std::fs::write(
            &script_path,
            render_sbatch_script(&setup_dir, &output_dir, &task.task_data.max_runtime),
        )?;

        Ok((script_path, task.task_data.multiplier.max(1), DEFAULT_MAX_FAILS))
    }

    fn get_task_result(&self, _setup_root: &Path, output_root: &Path, data: &Value) -> Result<Option<Value>> {
        let task: CalibTask = serde_json::from_value(data.clone())?;
        let output_dir = output_root.join(&task.output_dir);
        let objective_file = output_dir.join("objective.txt");

        let Ok(text) = std::fs::read_to_string(&objective_file) else {
            return Ok(None);
        };
        let Ok(objective) = text.trim().parse::<f64>() else {
            return Ok(None);
        };

        let result = CalibTaskResult {
            cluster: self.cluster.clone(),
            output_dir: output_dir.to_string_lossy().into_owned(),
            objective,
        };
        Ok(Some(serde_json::to_value(result)?))
    }
}

pub struct ProjectionHandler {
    pub cluster: String,
}

impl TaskHandler for ProjectionHandler {
    fn setup_task(&self, setup_root: &Path, output_root: &Path, data: &Value) -> Result<(PathBuf, i32, i32)> {
        let task: ProjTask = serde_json::from_value(data.clone())?;
        let output_dir = output_root.join(&task.output_dir);
        mkdir_output_dir(&output_dir)?;

        std::fs::write(
            output_dir.join("taskData.json"),
            serde_json::to_vec(&task)?,
        )?;

        let setup_dir = setup_root.join(&task.task_data.setup_name);
        let script_path = output_dir.join("run.sbatch");
        std::fs::write(
            &script_path,
            render_sbatch_script(&setup_dir, &output_dir, &task.task_data.max_runtime),
        )?;

        Ok((script_path, task.task_data.multiplier.max(1), DEFAULT_MAX_FAILS))
    }

    fn get_task_result(&self, _setup_root: &Path, output_root: &Path, data: &Value) -> Result<Option<Value>> {
        let task: ProjTask = serde_json::from_value(data.clone())?;
        let output_dir = output_root.join(&task.output_dir);

        if !output_dir.join("SUCCESS").exists() {
            return Ok(None);
        }

        let result = ProjTaskResult {
            cluster: self.cluster.clone(),
            output_dir: output_dir.to_string_lossy().into_owned(),
        };
        Ok(Some(serde_json::to_value(result)?))
    }
}

fn render_sbatch_script(setup_dir: &Path, output_dir: &Path, max_runtime: &str) -> String {
    format!(
        "#!/bin/bash\n#SBATCH --time={max_runtime}\n#SBATCH --output={out}/slurm-%j.out\n\
         cd {setup}\nexec ./run.sh {out}\n",
        max_runtime = max_runtime,
        out = output_dir.display(),
        setup = setup_dir.display(),
    )
}

/// The handler table keyed by task `type`, wired up the same way in both
/// `process_new`/`process_failed` (setup) and `process_running` (result).
pub fn build_handlers(cluster: &str) -> Vec<(&'static str, Box<dyn TaskHandler>)> {
    vec![
        (
            "calibration",
            Box::new(CalibrationHandler {
                cluster: cluster.to_string(),
            }) as Box<dyn TaskHandler>,
        ),
        (
            "projection",
            Box::new(ProjectionHandler {
                cluster: cluster.to_string(),
            }) as Box<dyn TaskHandler>,
        ),
    ]
}

pub fn lookup<'a>(
    handlers: &'a [(&'static str, Box<dyn TaskHandler>)],
    task_type: &str,
) -> Result<&'a dyn TaskHandler> {
    handlers
        .iter()
        .find(|(t, _)| *t == task_type)
        .map(|(_, h)| h.as_ref())
        .ok_or_else(|| MackenzieError::Configuration(format!("no handler for task type {task_type:?}")))
}
