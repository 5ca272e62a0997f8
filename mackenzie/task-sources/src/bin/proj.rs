//! Mints every projection task for a run up front: one task per
//! `(batch, cell, place, replicate)`, with later batches given lower
//! priority so the scheduler drains earlier batches first. There is no
//! minimizer here, so nothing is persisted locally — task identity alone
//! makes a restart idempotent (`add_new_task_ignore_conflict` swallows the
//! resulting duplicate-id conflicts).

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;

use mackenzie_calibration::{parse_projection_setup, ProjTask, ProjTaskData, ProjTaskResult};
use mackenzie_core::error::Result;
use mackenzie_core::tls::TlsMaterial;
use mackenzie_task_sources::cli::{load_env_file, EnvFileArgs};
use mackenzie_task_sources::config::ProjConfig;
use mackenzie_task_sources::controller_client;
use mackenzie_task_sources::status_csv::{write_status_csv, StatusRow};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

type Client = mackenzie_core::proto::controller_client::ControllerClient<tonic::transport::Channel>;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("proj-task-source: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = EnvFileArgs::parse();
    if let Some(env_file) = &args.env_file {
        load_env_file(env_file)?;
    }

    let config = ProjConfig::from_env()?;
    let _log_guard = mackenzie_core::logging::init(config.log_dir.as_deref());

    let tls = TlsMaterial::load(&config.cert_file, &config.key_file)?;
    let mut client = controller_client::connect(&config.endpoint(), &tls).await?;

    let setup = parse_projection_setup(&config.setup_dir)?;

    // `total_batches` counts this run's batches on top of whatever `start_batch`
    // batches a prior run already submitted, so priority stays comparable across
    // a resumed run's batches and an earlier run's.
    let total_batches = config.start_batch + config.num_replicates.len() as i32;

    let mut totals: HashMap<(String, String), i32> = HashMap::new();
    for (i, &num_replicates) in config.num_replicates.iter().enumerate() {
        let batch = config.start_batch + i as i32;
        let priority = config.start_batch + (total_batches - batch);
        for cell in &setup.cells {
            for place in &cell.places {
                *totals.entry((cell.cell_name.clone(), place.place_name.clone())).or_insert(0) += num_replicates;

                for replicate in 0..num_replicates {
                    submit_task(&mut client, &config, &setup.setup_name, &cell.cell_name, &place.place_name, batch, replicate, priority).await?;
                }
            }
        }
    }

    let mut completed_counts: HashMap<(String, String), i32> = HashMap::new();
    loop {
        poll_completed(&mut client, &mut completed_counts).await?;
        write_status(&config.status_file, &totals, &completed_counts)?;
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn submit_task(
    client: &mut Client,
    config: &ProjConfig,
    setup_name: &str,
    cell: &str,
    place: &str,
    batch: i32,
    replicate: i32,
    priority: i32,
) -> Result<()> {
    let task_id = format!("{}:{setup_name}:{cell}:{place}:{batch}:{replicate}", config.run_name);
    let task = ProjTask {
        task_id: task_id.clone(),
        task_data: ProjTaskData {
            setup_name: setup_name.to_string(),
            cell: cell.to_string(),
            place: place.to_string(),
            batch,
            replicate,
            multiplier: config.multiplier,
            max_runtime: config.max_runtime.clone(),
        },
        output_dir: format!("{}/{setup_name}/{cell}/{place}/batch_{batch}/replicate_{replicate}", config.run_name),
    };

    tracing::info!(%task_id, "creating task");
    controller_client::add_new_task_ignore_conflict(
        client,
        task_id,
        "projection".to_string(),
        serde_json::to_string(&task)?,
        priority,
    )
    .await;
    Ok(())
}

async fn poll_completed(client: &mut Client, completed_counts: &mut HashMap<(String, String), i32>) -> Result<()> {
    let completed = controller_client::get_all_completed_tasks(client).await?;

    for task in &completed {
        if task.task_type != "projection" {
            continue;
        }
        let task_data: ProjTask = serde_json::from_str(&task.data_json)?;
        let _task_result: ProjTaskResult = serde_json::from_str(&task.result_json)?;

        controller_client::set_task_processed(client, task.id.clone()).await?;
        *completed_counts
            .entry((task_data.task_data.cell.clone(), task_data.task_data.place.clone()))
            .or_insert(0) += 1;
    }

    Ok(())
}

fn write_status(path: &std::path::Path, totals: &HashMap<(String, String), i32>, completed: &HashMap<(String, String), i32>) -> Result<()> {
    let mut rows = Vec::new();
    for ((cell, place), total) in totals {
        let done = completed.get(&(cell.clone(), place.clone())).copied().unwrap_or(0);
        let mut row = StatusRow::new();
        row.insert("cell".to_string(), cell.clone());
        row.insert("place".to_string(), place.clone());
        row.insert("completed".to_string(), done.to_string());
        row.insert("total".to_string(), total.to_string());
        rows.push(row);
    }
    write_status_csv(path, &rows)
}
