//! Mints and drains calibration tasks for every single-parameter cell/place
//! in a calibration setup, driving one convex-scalar minimizer per
//! `(cell, place)` pair.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use mackenzie_calibration::{parse_calibration_setup, CalibTask, CalibTaskData, CalibTaskResult, ParamRange};
use mackenzie_core::db::Db;
use mackenzie_core::error::Result;
use mackenzie_core::tls::TlsMaterial;
use mackenzie_minimizers::convex_scalar::{ConvexScalarMinimizer, NextX};
use mackenzie_minimizers::{MinimizerStore, MinimizerType};
use mackenzie_task_sources::cli::{load_env_file, EnvFileArgs};
use mackenzie_task_sources::config::CsmConfig;
use mackenzie_task_sources::controller_client;
use mackenzie_task_sources::status_csv::{write_status_csv, StatusRow};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsmMinimizerContext {
    run: String,
    setup: String,
    cell: String,
    place: String,
    num_replicates: i32,
    multiplier: i32,
    max_runtime: String,
    task_priority: i32,
    param_range: ParamRange,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("csm-task-source: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = EnvFileArgs::parse();
    if let Some(env_file) = &args.env_file {
        load_env_file(env_file)?;
    }

    let config = CsmConfig::from_env()?;
    let _log_guard = mackenzie_core::logging::init(config.log_dir.as_deref());

    std::fs::create_dir_all(&config.work_dir)?;
    let db = Db::open(&config.work_dir.join("minimizer.db"))?;
    let store = MinimizerStore::new(&db)?;

    let tls = TlsMaterial::load(&config.cert_file, &config.key_file)?;
    let mut client = controller_client::connect(&config.endpoint(), &tls).await?;

    let setup = parse_calibration_setup(&config.setup_dir)?;

    for cell in &setup.cells {
        if cell.param_ranges.parameters.len() != 1 {
            tracing::info!(cell = %cell.cell_name, "skipping cell with more than one parameter");
            continue;
        }
        for place in &cell.places {
            let min_id = format!("{}:{}:{}:{}", config.run_name, setup.setup_name, cell.cell_name, place.place_name);

            if let Some(record) = store.get(&min_id)? {
                let minimizer = ConvexScalarMinimizer {
                    state: serde_json::from_value(record.state)?,
                };
                let context: CsmMinimizerContext = serde_json::from_value(record.context)?;
                create_next_tasks(&mut client, &min_id, minimizer, context).await?;
                continue;
            }

            tracing::info!(%min_id, "creating minimizer");
            let minimizer = ConvexScalarMinimizer::new(
                config.max_evals,
                config.n_iter_no_change,
                config.min_rel_improvement,
                config.make_y_positive,
            );
            let context = CsmMinimizerContext {
                run: config.run_name.clone(),
                setup: setup.setup_name.clone(),
                cell: cell.cell_name.clone(),
                place: place.place_name.clone(),
                num_replicates: config.num_replicates,
                multiplier: config.multiplier,
                max_runtime: config.max_runtime.clone(),
                task_priority: place.priority,
                param_range: cell.param_ranges.parameters[0].clone(),
            };
            store.add(
                &min_id,
                MinimizerType::Csm,
                serde_json::to_value(&minimizer.state)?,
                serde_json::to_value(&context)?,
            ).await?;

            create_next_tasks(&mut client, &min_id, minimizer, context).await?;
        }
    }

    loop {
        handle_completed_tasks(&mut client, &store).await?;
        write_status(&store, &config.work_dir.join("status.csv"))?;
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn create_next_tasks(
    client: &mut mackenzie_core::proto::controller_client::ControllerClient<tonic::transport::Channel>,
    min_id: &str,
    mut minimizer: ConvexScalarMinimizer,
    context: CsmMinimizerContext,
) -> Result<()> {
    let round = minimizer.state.eval_cache.len();
    let task_group = format!("{min_id}:{round}");

    let next_x = match minimizer.get_next_x() {
        NextX::Next(x) => x,
        NextX::Complete(reason) => {
            tracing::info!(%min_id, %reason, "minimization complete");
            return Ok(());
        }
    };

    for replicate in 0..context.num_replicates {
        let task_id = format!("{task_group}:{replicate}");
        let output_dir = format!(
            "{}/{}/{}/{}/round_{round}/replicate_{replicate}",
            context.run, context.setup, context.cell, context.place
        );

        let task_data = CalibTask {
            task_id: task_id.clone(),
            task_data: CalibTaskData {
                setup_name: context.setup.clone(),
                cell: context.cell.clone(),
                place: context.place.clone(),
                raw_params: vec![next_x],
                multiplier: context.multiplier,
                max_runtime: context.max_runtime.clone(),
            },
            output_dir,
            minimizer_id: min_id.to_string(),
            task_group: task_group.clone(),
            num_replicates: context.num_replicates,
        };

        tracing::info!(%task_id, "creating task");
        controller_client::add_new_task_ignore_conflict(
            client,
            task_id,
            "calibration".to_string(),
            serde_json::to_string(&task_data)?,
            context.task_priority,
        )
        .await;
    }

    Ok(())
}

#[derive(Default)]
struct GroupedDatum {
    task_ids: Vec<String>,
    num_replicates: i32,
    min_id: String,
    x: f64,
    ys: Vec<f64>,
}

async fn handle_completed_tasks(
    client: &mut mackenzie_core::proto::controller_client::ControllerClient<tonic::transport::Channel>,
    store: &MinimizerStore<'_>,
) -> Result<()> {
    let completed = controller_client::get_all_completed_tasks(client).await?;

    let mut grouped: HashMap<String, GroupedDatum> = HashMap::new();
    for task in &completed {
        if task.task_type != "calibration" {
            continue;
        }
        let task_data: CalibTask = serde_json::from_str(&task.data_json)?;
        let task_result: CalibTaskResult = serde_json::from_str(&task.result_json)?;

        let entry = grouped.entry(task_data.task_group.clone()).or_default();
        entry.task_ids.push(task.id.clone());
        entry.num_replicates = task_data.num_replicates;
        entry.min_id = task_data.minimizer_id.clone();
        entry.x = task_data.task_data.raw_params[0];
        entry.ys.push(task_result.objective);
    }

    for (task_group, gd) in grouped {
        if gd.num_replicates != gd.ys.len() as i32 {
            continue;
        }
        tracing::info!(%task_group, "task group completed");

        for task_id in &gd.task_ids {
            controller_client::set_task_processed(client, task_id.clone()).await?;
        }

        let Some(record) = store.get(&gd.min_id)? else {
            tracing::warn!(min_id = %gd.min_id, "minimizer not found for completed group");
            continue;
        };
        let mut minimizer = ConvexScalarMinimizer {
            state: serde_json::from_value(record.state)?,
        };
        let context: CsmMinimizerContext = serde_json::from_value(record.context)?;

        minimizer.set_ys(gd.x, &gd.ys);
        store.update_state(&gd.min_id, serde_json::to_value(&minimizer.state)?).await?;
        create_next_tasks(client, &gd.min_id, minimizer, context).await?;
    }

    Ok(())
}

fn write_status(store: &MinimizerStore<'_>, path: &std::path::Path) -> Result<()> {
    let mut rows = Vec::new();
    for record in store.all()? {
        if record.min_type != MinimizerType::Csm {
            continue;
        }
        let minimizer = ConvexScalarMinimizer {
            state: serde_json::from_value(record.state)?,
        };
        let context: CsmMinimizerContext = serde_json::from_value(record.context)?;
        let status = minimizer.status();

        let mut row = StatusRow::new();
        row.insert("run".to_string(), context.run);
        row.insert("setup".to_string(), context.setup);
        row.insert("cell".to_string(), context.cell);
        row.insert("place".to_string(), context.place);
        row.insert("state".to_string(), status.state);
        row.insert("n_evals".to_string(), status.n_evals.to_string());
        if let (Some(best_round), Some(best_x), Some(best_y)) = (status.best_round, status.best_x, status.best_y) {
            let best_param = best_x * (context.param_range.max - context.param_range.min) + context.param_range.min;
            row.insert("best_round".to_string(), best_round.to_string());
            row.insert("best_x".to_string(), best_x.to_string());
            row.insert("best_y".to_string(), best_y.to_string());
            row.insert("best_param".to_string(), best_param.to_string());
        }
        rows.push(row);
    }

    write_status_csv(path, &rows)
}
