//! Shell-based driver over the batch scheduler, wrapping every command
//! invocation in a bounded retry envelope: keep retrying transient failures for
//! up to `RETRY_TIME`, sleeping `INTER_RETRY` between attempts, each attempt
//! bounded by `PER_CALL_TIMEOUT`; on exhaustion the error escapes to the caller.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::timeout;

use mackenzie_core::error::{MackenzieError, Result};

const RETRY_TIME: Duration = Duration::from_secs(30 * 60);
const INTER_RETRY: Duration = Duration::from_secs(30);
const PER_CALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

fn exe(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

async fn retrying<F, Fut, T>(op_name: &'static str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    loop {
        match timeout(PER_CALL_TIMEOUT, attempt()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(op = op_name, error = %e, "scheduler command failed");
                if start.elapsed() > RETRY_TIME {
                    tracing::error!(op = op_name, "retry envelope exhausted");
                    return Err(e);
                }
                tokio::time::sleep(INTER_RETRY).await;
            }
            Err(_) => {
                tracing::warn!(op = op_name, "scheduler command timed out");
                if start.elapsed() > RETRY_TIME {
                    tracing::error!(op = op_name, "retry envelope exhausted");
                    return Err(MackenzieError::Transient(format!(
                        "{op_name} timed out after retry envelope exhausted"
                    )));
                }
                tokio::time::sleep(INTER_RETRY).await;
            }
        }
    }
}

fn log_failure(cmd_str: &str, stdout: &[u8], stderr: &[u8]) {
    tracing::warn!(
        cmd = cmd_str,
        stdout = %String::from_utf8_lossy(stdout),
        stderr = %String::from_utf8_lossy(stderr),
        "command exited non-zero"
    );
}

/// The running batch-job ids visible to the current user (`squeue -u $USER --noheader -o %A`).
pub async fn list_running() -> Result<HashSet<i64>> {
    retrying("squeue", || async {
        let squeue = exe("SQUEUE_EXE", "squeue");
        let user = std::env::var("USER")
            .map_err(|_| MackenzieError::Configuration("USER is not set".into()))?;
        let output = Command::new(&squeue)
            .args(["-u", &user, "--noheader", "-o", "%A"])
            .output()
            .await
            .map_err(|e| MackenzieError::Transient(format!("spawning {squeue}: {e}")))?;
        if !output.status.success() {
            log_failure(&squeue, &output.stdout, &output.stderr);
            return Err(MackenzieError::Transient(format!(
                "{squeue} exited with {:?}",
                output.status.code()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .split_whitespace()
            .map(|tok| {
                tok.parse::<i64>()
                    .map_err(|e| MackenzieError::Transient(format!("parsing job id {tok:?}: {e}")))
            })
            .collect()
    })
    .await
}

/// The accounting blob for a finished batch job (`sacct -j ID -o ALL -P`).
pub async fn fetch_accounting(batch_job_id: i64) -> Result<String> {
    retrying("sacct", || async move {
        let sacct = exe("SACCT_EXE", "sacct");
        let output = Command::new(&sacct)
            .args(["-j", &batch_job_id.to_string(), "-o", "ALL", "-P"])
            .output()
            .await
            .map_err(|e| MackenzieError::Transient(format!("spawning {sacct}: {e}")))?;
        if !output.status.success() {
            log_failure(&sacct, &output.stdout, &output.stderr);
            return Err(MackenzieError::Transient(format!(
                "{sacct} exited with {:?}",
                output.status.code()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    })
    .await
}

/// Submit `script_path` via `sbatch`, propagating only `USER`/`HOME`/`PATH` plus
/// `env_overrides` — any inherited batch-scheduler environment (e.g. this agent
/// itself running inside a job) is deliberately stripped.
pub async fn submit(script_path: &str, env_overrides: &[(String, String)]) -> Result<i64> {
    let script_path = script_path.to_string();
    let env_overrides = env_overrides.to_vec();
    retrying("sbatch", move || {
        let script_path = script_path.clone();
        let env_overrides = env_overrides.clone();
        async move {
            let sbatch = exe("SBATCH_EXE", "sbatch");
            let mut cmd = Command::new(&sbatch);
            cmd.arg(&script_path).env_clear();
            for key in ["USER", "HOME", "PATH"] {
                if let Ok(value) = std::env::var(key) {
                    cmd.env(key, value);
                }
            }
            for (key, value) in &env_overrides {
                cmd.env(key, value);
            }
            let output = cmd
                .output()
                .await
                .map_err(|e| MackenzieError::Transient(format!("spawning {sbatch}: {e}")))?;
            if !output.status.success() {
                log_failure(&sbatch, &output.stdout, &output.stderr);
                return Err(MackenzieError::Transient(format!(
                    "{sbatch} exited with {:?}",
                    output.status.code()
                )));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let last = stdout
                .split_whitespace()
                .last()
                .ok_or_else(|| MackenzieError::Transient(format!("{sbatch} produced no output")))?;
            last.parse::<i64>()
                .map_err(|e| MackenzieError::Transient(format!("parsing batch job id {last:?}: {e}")))
        }
    })
    .await
}
