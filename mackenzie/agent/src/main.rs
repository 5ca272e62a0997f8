use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tonic::transport::{Channel, Endpoint};

use mackenzie_agent::config::AgentConfig;
use mackenzie_agent::handlers::build_handlers;
use mackenzie_agent::job_store::JobStore;
use mackenzie_agent::pipeline::run_once;
use mackenzie_core::db::Db;
use mackenzie_core::error::{MackenzieError, Result};
use mackenzie_core::proto::controller_client::ControllerClient;
use mackenzie_core::setup_store::SetupStore;
use mackenzie_core::tls::TlsMaterial;

const CONNECT_RETRY: Duration = Duration::from_secs(5 * 60);
const CONNECT_INTER_RETRY: Duration = Duration::from_secs(5);
const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "agent")]
struct Cli {
    /// Optional `KEY=VALUE` file loaded into the process environment before
    /// `AGENT_*` variables are read.
    #[arg(short = 'e', long)]
    env_file: Option<PathBuf>,

    /// Root directory for per-task output directories; overrides `AGENT_output_root`.
    #[arg(short = 'o', long)]
    output_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("agent: {e}");
        std::process::exit(1);
    }
}

fn load_env_file(path: &PathBuf) -> Result<()> {
    let contents = std::fs::read_to_string(path)?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            std::env::set_var(key.trim(), value.trim());
        }
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    if let Some(env_file) = &cli.env_file {
        load_env_file(env_file)?;
    }

    let config = AgentConfig::from_env(cli.output_root)?;
    let _log_guard = mackenzie_core::logging::init(config.log_dir.as_deref());

    std::fs::create_dir_all(&config.output_root)?;

    let tls = TlsMaterial::load(&config.cert_file, &config.key_file)?;
    let db = Db::open(&config.db_path)?;
    let jobs = JobStore::new(&db)?;
    let setups = SetupStore::new(&db, config.setup_root.clone())?;
    let handlers = build_handlers(&config.cluster);

    let endpoint = config.endpoint();
    let mut client = connect_with_retry(&endpoint, &tls).await?;

    tracing::info!(cluster = %config.cluster, "agent started");

    loop {
        let result = run_once(
            &mut client,
            &jobs,
            &setups,
            &config.setup_root,
            &config.output_root,
            &config.cluster,
            config.max_load,
            &handlers,
        )
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "outer loop iteration failed");
            if matches!(e, MackenzieError::Rpc(_) | MackenzieError::Transient(_)) {
                client = connect_with_retry(&endpoint, &tls).await?;
            }
        }

        tokio::time::sleep(TICK_INTERVAL).await;
    }
}

async fn connect_with_retry(
    endpoint: &mackenzie_core::config::ControllerEndpoint,
    tls: &TlsMaterial,
) -> Result<ControllerClient<Channel>> {
    let start = std::time::Instant::now();
    loop {
        let attempt = Endpoint::from_shared(endpoint.uri())
            .map_err(|e| MackenzieError::Configuration(format!("invalid controller uri: {e}")))
            .and_then(|ep| {
                ep.tls_config(tls.client_config())
                    .map_err(|e| MackenzieError::Tls(format!("configuring client TLS: {e}")))
            });

        let connected = match attempt {
            Ok(ep) => ep.connect().await,
            Err(e) => return Err(e),
        };

        match connected {
            Ok(channel) => return Ok(ControllerClient::new(channel)),
            Err(e) => {
                tracing::warn!(error = %e, "connecting to controller failed");
                if start.elapsed() > CONNECT_RETRY {
                    return Err(MackenzieError::Transient(format!(
                        "could not connect to controller: {e}"
                    )));
                }
                tokio::time::sleep(CONNECT_INTER_RETRY).await;
            }
        }
    }
}
