//! Mints and drains calibration tasks for every multi-parameter cell/place in
//! a calibration setup, driving one Bayesian-optimization minimizer per
//! `(cell, place)` pair. Unlike the convex-scalar source, every task here
//! stands alone: there is no replicate grouping, each observed objective
//! feeds the minimizer as soon as its single task completes.

use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use mackenzie_calibration::{parse_calibration_setup, CalibTask, CalibTaskData, CalibTaskResult, ParamRanges};
use mackenzie_core::db::Db;
use mackenzie_core::error::Result;
use mackenzie_core::tls::TlsMaterial;
use mackenzie_minimizers::bayes_opt::{BayesOptMinimizer, NextX};
use mackenzie_minimizers::{MinimizerRecord, MinimizerStore, MinimizerType};
use mackenzie_task_sources::cli::{load_env_file, EnvFileArgs};
use mackenzie_task_sources::config::BayesConfig;
use mackenzie_task_sources::controller_client;
use mackenzie_task_sources::status_csv::{write_status_csv, StatusRow};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BayesMinimizerContext {
    run: String,
    setup: String,
    cell: String,
    place: String,
    multiplier: i32,
    max_runtime: String,
    task_priority: i32,
    param_ranges: ParamRanges,
}

type Client = mackenzie_core::proto::controller_client::ControllerClient<tonic::transport::Channel>;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("bayes-task-source: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = EnvFileArgs::parse();
    if let Some(env_file) = &args.env_file {
        load_env_file(env_file)?;
    }

    let config = BayesConfig::from_env()?;
    let _log_guard = mackenzie_core::logging::init(config.log_dir.as_deref());

    std::fs::create_dir_all(&config.work_dir)?;
    let db = Db::open(&config.work_dir.join("minimizer.db"))?;
    let store = MinimizerStore::new(&db)?;

    let tls = TlsMaterial::load(&config.cert_file, &config.key_file)?;
    let mut client = controller_client::connect(&config.endpoint(), &tls).await?;

    let setup = parse_calibration_setup(&config.setup_dir)?;

    for cell in &setup.cells {
        for place in &cell.places {
            let min_id = format!("{}:{}:{}:{}", config.run_name, setup.setup_name, cell.cell_name, place.place_name);

            if store.contains(&min_id)? {
                fill_pipeline(&mut client, &store, &min_id).await?;
                continue;
            }

            tracing::info!(%min_id, "creating minimizer");
            let mut minimizer = BayesOptMinimizer::new(
                cell.param_ranges.parameters.len(),
                config.init_evals,
                config.explore_evals,
                config.exploit_evals,
                config.parallel_evals,
                config.kappa_initial,
                config.kappa_scale,
            );
            let context = BayesMinimizerContext {
                run: config.run_name.clone(),
                setup: setup.setup_name.clone(),
                cell: cell.cell_name.clone(),
                place: place.place_name.clone(),
                multiplier: config.multiplier,
                max_runtime: config.max_runtime.clone(),
                task_priority: place.priority,
                param_ranges: cell.param_ranges.clone(),
            };

            let points = minimizer.get_initial_xs();
            store
                .add(
                    &min_id,
                    MinimizerType::Bayes,
                    serde_json::to_value(&minimizer.state)?,
                    serde_json::to_value(&context)?,
                )
                .await?;

            for (round, x) in points.into_iter().enumerate() {
                submit_point(&mut client, &min_id, &context, round, x).await?;
            }
        }
    }

    loop {
        handle_completed_tasks(&mut client, &store).await?;
        write_status(&store, &config.work_dir.join("status.csv"))?;
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn load(record: &MinimizerRecord) -> Result<(BayesOptMinimizer, BayesMinimizerContext)> {
    Ok((
        BayesOptMinimizer {
            state: serde_json::from_value(record.state.clone())?,
        },
        serde_json::from_value(record.context.clone())?,
    ))
}

async fn submit_point(client: &mut Client, min_id: &str, context: &BayesMinimizerContext, round: usize, x: Vec<f64>) -> Result<()> {
    let task_id = format!("{min_id}:{round}");
    let task_data = CalibTask {
        task_id: task_id.clone(),
        task_data: CalibTaskData {
            setup_name: context.setup.clone(),
            cell: context.cell.clone(),
            place: context.place.clone(),
            raw_params: x,
            multiplier: context.multiplier,
            max_runtime: context.max_runtime.clone(),
        },
        output_dir: format!("{}/{}/{}/{}/round_{round}", context.run, context.setup, context.cell, context.place),
        minimizer_id: min_id.to_string(),
        task_group: task_id.clone(),
        num_replicates: 1,
    };

    tracing::info!(%task_id, "creating task");
    controller_client::add_new_task(
        client,
        task_id,
        "calibration".to_string(),
        serde_json::to_string(&task_data)?,
        context.task_priority,
    )
    .await
}

/// Suggest one more point for a minimizer if it isn't waiting on its initial
/// batch or already finished. Returns whether a point was actually submitted,
/// so callers that need to keep several slots filled know when to stop.
async fn try_create_next_task(client: &mut Client, store: &MinimizerStore<'_>, min_id: &str) -> Result<bool> {
    let Some(record) = store.get(min_id)? else {
        return Ok(false);
    };
    let (mut minimizer, context) = load(&record)?;

    let round = minimizer.state.points_probed as usize;
    match minimizer.get_next_x() {
        NextX::Wait => Ok(false),
        NextX::Complete(reason) => {
            tracing::info!(%min_id, %reason, "minimization complete");
            Ok(false)
        }
        NextX::Point(x) => {
            store.update_state(min_id, serde_json::to_value(&minimizer.state)?).await?;
            submit_point(client, min_id, &context, round, x).await?;
            Ok(true)
        }
    }
}

/// Top up a restarted minimizer's in-flight suggestions until `parallel_evals`
/// points are outstanding (`points_probed - eval_cache.len()`), or it signals
/// it has nothing left to suggest.
async fn fill_pipeline(client: &mut Client, store: &MinimizerStore<'_>, min_id: &str) -> Result<()> {
    loop {
        let Some(record) = store.get(min_id)? else {
            return Ok(());
        };
        let (minimizer, _context) = load(&record)?;
        let in_flight = minimizer.state.points_probed.saturating_sub(minimizer.state.eval_cache.len() as u32);
        if in_flight >= minimizer.state.parallel_evals {
            return Ok(());
        }
        if !try_create_next_task(client, store, min_id).await? {
            return Ok(());
        }
    }
}

async fn handle_completed_tasks(client: &mut Client, store: &MinimizerStore<'_>) -> Result<()> {
    let completed = controller_client::get_all_completed_tasks(client).await?;

    for task in &completed {
        if task.task_type != "calibration" {
            continue;
        }
        let task_data: CalibTask = serde_json::from_str(&task.data_json)?;
        let task_result: CalibTaskResult = serde_json::from_str(&task.result_json)?;

        let Some(record) = store.get(&task_data.minimizer_id)? else {
            tracing::warn!(min_id = %task_data.minimizer_id, "minimizer not found for completed task");
            continue;
        };
        if record.min_type != MinimizerType::Bayes {
            continue;
        }

        controller_client::set_task_processed(client, task.id.clone()).await?;

        let (mut minimizer, _context) = load(&record)?;
        minimizer.set_y(&task_data.task_data.raw_params, &[task_result.objective]);
        store.update_state(&task_data.minimizer_id, serde_json::to_value(&minimizer.state)?).await?;

        try_create_next_task(client, store, &task_data.minimizer_id).await?;
    }

    Ok(())
}

fn write_status(store: &MinimizerStore<'_>, path: &std::path::Path) -> Result<()> {
    let mut rows = Vec::new();
    for record in store.all()? {
        if record.min_type != MinimizerType::Bayes {
            continue;
        }
        let (minimizer, context) = load(&record)?;
        let status = minimizer.status();

        let mut row = StatusRow::new();
        row.insert("run".to_string(), context.run);
        row.insert("setup".to_string(), context.setup);
        row.insert("cell".to_string(), context.cell);
        row.insert("place".to_string(), context.place);
        row.insert("state".to_string(), status.state);
        row.insert("points_probed".to_string(), status.points_probed.to_string());
        row.insert("points_seen".to_string(), status.points_seen.to_string());
        if let Some(best_seen_y) = status.best_seen_y {
            row.insert("best_seen_y".to_string(), best_seen_y.to_string());
        }
        if let Some(mean) = status.best_pred_y_mean {
            row.insert("best_pred_y_mean".to_string(), mean.to_string());
        }
        if let Some(std) = status.best_pred_y_std {
            row.insert("best_pred_y_std".to_string(), std.to_string());
        }
        if let Some(best_pred_x) = &status.best_pred_x {
            for (param, scaled) in context.param_ranges.parameters.iter().zip(best_pred_x.iter()) {
                let value = scaled * (param.max - param.min) + param.min;
                row.insert(format!("best_pred_{}", param.name), value.to_string());
            }
        }
        rows.push(row);
    }

    write_status_csv(path, &rows)
}
