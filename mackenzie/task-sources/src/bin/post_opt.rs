//! Re-runs each cell/place at the best-predicted point from a prior
//! Bayesian-optimization run, replicated `num_evals` times, to get a clean
//! read on the objective at the point the optimizer converged to. Reads its
//! input from that prior run's `status.csv` (the `best_pred_<param>` columns
//! written by `bayes-task-source`). Unlike the csm/bayes sources this is a
//! one-shot fan-out, not a polling loop: it submits every replicate task,
//! drains and acks whatever has already completed, writes one status report,
//! and exits. Re-running it against a partially-completed batch is safe —
//! every task id is a deterministic function of the minimizer id and
//! replicate, and `add_new_task_ignore_conflict` swallows the resulting
//! duplicate-id responses.

use std::collections::{BTreeMap, HashMap};

use clap::Parser;

use mackenzie_calibration::{parse_calibration_setup, CalibTask, CalibTaskData, CalibTaskResult};
use mackenzie_core::error::{MackenzieError, Result};
use mackenzie_core::tls::TlsMaterial;
use mackenzie_task_sources::cli::{load_env_file, EnvFileArgs};
use mackenzie_task_sources::config::PostOptConfig;
use mackenzie_task_sources::controller_client;
use mackenzie_task_sources::status_csv::{write_status_csv, StatusRow};

type Client = mackenzie_core::proto::controller_client::ControllerClient<tonic::transport::Channel>;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("post-opt-task-source: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = EnvFileArgs::parse();
    if let Some(env_file) = &args.env_file {
        load_env_file(env_file)?;
    }

    let config = PostOptConfig::from_env()?;
    let _log_guard = mackenzie_core::logging::init(config.log_dir.as_deref());

    let tls = TlsMaterial::load(&config.cert_file, &config.key_file)?;
    let mut client = controller_client::connect(&config.endpoint(), &tls).await?;

    let setup = parse_calibration_setup(&config.setup_dir)?;
    let best_points = read_best_points(&config.opt_status_file, &setup)?;

    let mut min_ids = Vec::new();
    for ((cell, place), raw_params) in &best_points {
        let priority = setup
            .cells
            .iter()
            .find(|c| &c.cell_name == cell)
            .and_then(|c| c.places.iter().find(|p| &p.place_name == place))
            .map(|p| p.priority)
            .unwrap_or(1);

        let min_id = format!("{}:{}:{cell}:{place}", config.run_name, setup.setup_name);
        min_ids.push(min_id.clone());

        for replicate in 0..config.num_evals {
            let task_id = format!("post:{min_id}:{replicate}");
            let task = CalibTask {
                task_id: task_id.clone(),
                task_data: CalibTaskData {
                    setup_name: setup.setup_name.clone(),
                    cell: cell.clone(),
                    place: place.clone(),
                    raw_params: raw_params.clone(),
                    multiplier: config.multiplier,
                    max_runtime: config.max_runtime.clone(),
                },
                output_dir: format!("{}/{}/post_opt/{cell}/{place}/replicate_{replicate}", config.run_name, setup.setup_name),
                minimizer_id: min_id.clone(),
                task_group: min_id.clone(),
                num_replicates: config.num_evals,
            };

            tracing::info!(%task_id, "creating task");
            controller_client::add_new_task_ignore_conflict(
                &mut client,
                task_id,
                "calibration".to_string(),
                serde_json::to_string(&task)?,
                priority,
            )
            .await;
        }
    }

    let mut objectives: HashMap<String, Vec<f64>> = HashMap::new();
    drain_completed(&mut client, &min_ids, &mut objectives).await?;

    let output_path = config
        .opt_status_file
        .parent()
        .map(|p| p.join("post_opt_status.csv"))
        .unwrap_or_else(|| std::path::PathBuf::from("post_opt_status.csv"));
    write_status(&output_path, &objectives)
}

/// Parses the prior run's `status.csv`, matching rows to setup cells/places
/// and pulling each `best_pred_<param>` column back into a normalized
/// `[0, 1]` vector in the cell's declared parameter order.
fn read_best_points(
    path: &std::path::Path,
    setup: &mackenzie_calibration::CalibrationSetup,
) -> Result<BTreeMap<(String, String), Vec<f64>>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| MackenzieError::Configuration(format!("reading {path:?}: {e}")))?;
    let headers = reader
        .headers()
        .map_err(|e| MackenzieError::Configuration(format!("reading {path:?} headers: {e}")))?
        .clone();

    let mut out = BTreeMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| MackenzieError::Configuration(format!("reading {path:?}: {e}")))?;
        let row: HashMap<&str, &str> = headers.iter().zip(record.iter()).collect();

        let Some(cell_name) = row.get("cell") else { continue };
        let Some(place_name) = row.get("place") else { continue };
        let Some(cell) = setup.cells.iter().find(|c| c.cell_name == *cell_name) else { continue };

        let mut raw_params = Vec::with_capacity(cell.param_ranges.parameters.len());
        for param in &cell.param_ranges.parameters {
            let column = format!("best_pred_{}", param.name);
            let Some(value) = row.get(column.as_str()).and_then(|v| v.parse::<f64>().ok()) else {
                continue;
            };
            let normalized = ((value - param.min) / (param.max - param.min)).clamp(0.0, 1.0);
            raw_params.push(normalized);
        }

        if raw_params.len() == cell.param_ranges.parameters.len() {
            out.insert((cell_name.to_string(), place_name.to_string()), raw_params);
        }
    }

    Ok(out)
}

async fn drain_completed(client: &mut Client, min_ids: &[String], objectives: &mut HashMap<String, Vec<f64>>) -> Result<()> {
    let completed = controller_client::get_all_completed_tasks(client).await?;

    for task in &completed {
        if task.task_type != "calibration" {
            continue;
        }
        let task_data: CalibTask = serde_json::from_str(&task.data_json)?;
        if !min_ids.contains(&task_data.minimizer_id) {
            continue;
        }
        let task_result: CalibTaskResult = serde_json::from_str(&task.result_json)?;

        controller_client::set_task_processed(client, task.id.clone()).await?;
        objectives.entry(task_data.minimizer_id.clone()).or_default().push(task_result.objective);
    }

    Ok(())
}

fn write_status(path: &std::path::Path, objectives: &HashMap<String, Vec<f64>>) -> Result<()> {
    let mut rows = Vec::new();
    for (min_id, ys) in objectives {
        let mean = ys.iter().sum::<f64>() / ys.len() as f64;
        let mut row = StatusRow::new();
        row.insert("min_id".to_string(), min_id.clone());
        row.insert("num_completed".to_string(), ys.len().to_string());
        row.insert("mean_objective".to_string(), mean.to_string());
        rows.push(row);
    }
    write_status_csv(path, &rows)
}
