//! The agent's outer loop: five sub-phases run in strict order every tick, each
//! seeing the effects of the earlier phases in the same iteration.

use std::path::Path;

use mackenzie_core::error::{MackenzieError, Result};
use mackenzie_core::proto::controller_client::ControllerClient;
use mackenzie_core::proto::{
    GetSetupDirTarRequest, GetSingleAvailableTaskRequest, SetTaskCompletedRequest,
    SetTaskFailedRequest,
};
use mackenzie_core::setup_store::SetupStore;
use tonic::transport::Channel;

use crate::handlers::{lookup, TaskHandler};
use crate::job_store::{JobState, JobStore};
use crate::scheduler_adaptor;

pub type Handlers = Vec<(&'static str, Box<dyn TaskHandler>)>;

/// Fetch the controller's setup catalog and install anything missing locally.
#[tracing::instrument(skip(client, setups))]
pub async fn sync_setups(
    client: &mut ControllerClient<Channel>,
    setups: &SetupStore,
) -> Result<()> {
    let controller_names = client
        .get_all_setup_names(mackenzie_core::proto::Empty {})
        .await
        .map_err(MackenzieError::Rpc)?
        .into_inner()
        .names;

    let local_names: std::collections::HashSet<String> =
        setups.all_names()?.into_iter().collect();

    for name in controller_names {
        if local_names.contains(&name) {
            continue;
        }
        let tar = client
            .get_setup_dir_tar(GetSetupDirTarRequest { name: name.clone() })
            .await
            .map_err(MackenzieError::Rpc)?
            .into_inner()
            .tar;
        setups.install(&name, &tar)?;
        tracing::info!(setup = %name, "installed setup from controller");
    }
    Ok(())
}

/// If there's room in the load budget, fetch one available task and stage it.
#[tracing::instrument(skip(client, jobs, handlers), fields(cluster = %cluster))]
pub async fn process_new(
    client: &mut ControllerClient<Channel>,
    jobs: &JobStore,
    setup_root: &Path,
    output_root: &Path,
    cluster: &str,
    max_load: i32,
    handlers: &Handlers,
) -> Result<()> {
    if jobs.get_live_load()? >= max_load {
        return Ok(());
    }

    let resp = client
        .get_single_available_task(GetSingleAvailableTaskRequest {
            cluster: cluster.to_string(),
        })
        .await
        .map_err(MackenzieError::Rpc)?
        .into_inner();

    if !resp.present {
        return Ok(());
    }

    let data: serde_json::Value = serde_json::from_str(&resp.data_json)?;
    let handler = lookup(handlers, &resp.task_type)?;
    let (script_path, load, max_fails) = handler.setup_task(setup_root, output_root, &data)?;

    jobs.add_job(
        &resp.id,
        &resp.task_type,
        data,
        resp.priority,
        script_path.to_string_lossy().into_owned(),
        load,
        max_fails,
    )?;
    tracing::info!(job_id = %resp.id, "job ready");
    Ok(())
}

/// For every running job whose batch id has left the scheduler's running set,
/// fetch its accounting info and decide completion via the type's result handler.
#[tracing::instrument(skip(client, jobs, handlers))]
pub async fn process_running(
    client: &mut ControllerClient<Channel>,
    jobs: &JobStore,
    setup_root: &Path,
    output_root: &Path,
    handlers: &Handlers,
) -> Result<()> {
    let running_ids = scheduler_adaptor::list_running().await?;

    for job in jobs.all_with_state(JobState::Running)? {
        let Some(batch_job_id) = job.batch_job_id else {
            continue;
        };
        if running_ids.contains(&batch_job_id) {
            continue;
        }

        let accounting = scheduler_adaptor::fetch_accounting(batch_job_id).await?;
        jobs.set_batch_job_completion_info(batch_job_id, accounting)?;

        let handler = lookup(handlers, &job.job_type)?;
        let result = handler.get_task_result(setup_root, output_root, &job.data)?;

        match result {
            Some(result) => {
                client
                    .set_task_completed(SetTaskCompletedRequest {
                        id: job.job_id.clone(),
                        result_json: result.to_string(),
                    })
                    .await
                    .map_err(MackenzieError::Rpc)?;
                jobs.set_job_completed(&job.job_id, result)?;
                tracing::info!(job_id = %job.job_id, batch_job_id, "job completed");
            }
            None => {
                jobs.set_job_failed(&job.job_id)?;
                tracing::warn!(job_id = %job.job_id, batch_job_id, "job failed");
            }
        }
    }
    Ok(())
}

/// Retry budget check; either push a terminal failure upstream or re-stage.
#[tracing::instrument(skip(client, jobs, handlers))]
pub async fn process_failed(
    client: &mut ControllerClient<Channel>,
    jobs: &JobStore,
    setup_root: &Path,
    output_root: &Path,
    handlers: &Handlers,
) -> Result<()> {
    for job in jobs.all_with_state(JobState::Failed)? {
        if job.failure_count > job.max_fails {
            client
                .set_task_failed(SetTaskFailedRequest {
                    id: job.job_id.clone(),
                })
                .await
                .map_err(MackenzieError::Rpc)?;
            jobs.set_job_aborted(&job.job_id)?;
            tracing::error!(job_id = %job.job_id, failure_count = job.failure_count, "job aborted");
            continue;
        }

        let handler = lookup(handlers, &job.job_type)?;
        let (script_path, _load, _max_fails) =
            handler.setup_task(setup_root, output_root, &job.data)?;
        jobs.set_job_ready(&job.job_id, script_path.to_string_lossy().into_owned())?;
        tracing::info!(job_id = %job.job_id, failure_count = job.failure_count, "job ready (retry)");
    }
    Ok(())
}

/// Submit ready jobs, highest priority first, while respecting `max_load`
/// against the load of already-running jobs.
#[tracing::instrument(skip(jobs))]
pub async fn process_ready(jobs: &JobStore, max_load: i32) -> Result<()> {
    let mut cur_load = jobs.get_running_load()?;

    let mut ready = jobs.all_with_state(JobState::Ready)?;
    ready.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.load.cmp(&a.load))
            .then(a.job_id.cmp(&b.job_id))
    });

    for job in ready {
        if cur_load + job.load > max_load {
            break;
        }
        cur_load += job.load;

        let batch_job_id = scheduler_adaptor::submit(&job.sbatch_script_path, &[]).await?;
        jobs.set_job_running(&job.job_id, batch_job_id)?;
        jobs.add_batch_job(batch_job_id, &job.job_id)?;
        tracing::info!(job_id = %job.job_id, batch_job_id, "job running");
    }
    Ok(())
}

/// Run one full outer-loop iteration, in the fixed phase order the invariants
/// depend on.
#[allow(clippy::too_many_arguments)]
pub async fn run_once(
    client: &mut ControllerClient<Channel>,
    jobs: &JobStore,
    setups: &SetupStore,
    setup_root: &Path,
    output_root: &Path,
    cluster: &str,
    max_load: i32,
    handlers: &Handlers,
) -> Result<()> {
    sync_setups(client, setups).await?;
    process_new(client, jobs, setup_root, output_root, cluster, max_load, handlers).await?;
    process_running(client, jobs, setup_root, output_root, handlers).await?;
    process_failed(client, jobs, setup_root, output_root, handlers).await?;
    process_ready(jobs, max_load).await?;
    Ok(())
}
