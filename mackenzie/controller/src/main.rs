use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tonic::transport::Server;

use mackenzie_core::db::Db;
use mackenzie_core::error::{MackenzieError, Result};
use mackenzie_core::proto::controller_client::ControllerClient;
use mackenzie_core::proto::controller_server::ControllerServer;
use mackenzie_core::proto::AddSetupRequest;
use mackenzie_core::setup_store::SetupStore;
use mackenzie_core::tls::{make_cert, TlsMaterial};

use mackenzie_controller::config::{CmdConfig, ControllerConfig};
use mackenzie_controller::{ControllerService, TaskStore};

#[derive(Parser)]
#[command(name = "controller")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller RPC server (default when no subcommand is given).
    Serve,
    /// Upload a setup tarball to a running controller.
    AddSetup {
        #[arg(long)]
        setup_dir: PathBuf,
    },
    /// Generate a fresh self-signed cert/key pair.
    Makecert {
        name: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("controller: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::AddSetup { setup_dir } => add_setup(&setup_dir).await,
        Command::Makecert { name, out_dir } => make_cert(&out_dir, &name),
    }
}

async fn serve() -> Result<()> {
    let config = ControllerConfig::from_env()?;
    let _log_guard = mackenzie_core::logging::init(config.log_dir.as_deref());

    let tls = TlsMaterial::load(&config.cert_file, &config.key_file)?;
    let db = Db::open(&config.db_path)?;
    let setups = SetupStore::new(&db, config.setup_root.clone())?;
    let tasks = TaskStore::new(&db)?;
    let service = ControllerService::new(db, setups, tasks, config.task_timeout);

    let addr = format!("{}:{}", config.controller_host, config.controller_port)
        .parse()
        .map_err(|e| MackenzieError::Configuration(format!("invalid listen address: {e}")))?;

    tracing::info!(%addr, "starting controller");

    #[cfg(feature = "prometheus-metrics")]
    if let Some(port) = config.metrics_port {
        let metrics_addr = (config.controller_host.clone(), port);
        tokio::spawn(async move {
            let route = warp::path("metrics").and_then(|| async {
                mackenzie_core::metrics::get_metrics()
                    .map_err(|_| warp::reject::not_found())
            });
            warp::serve(route)
                .run(
                    format!("{}:{}", metrics_addr.0, metrics_addr.1)
                        .parse::<std::net::SocketAddr>()
                        .expect("metrics address"),
                )
                .await;
        });
    }

    Server::builder()
        .tls_config(tls.server_config())
        .map_err(|e| MackenzieError::Tls(format!("configuring server TLS: {e}")))?
        .add_service(ControllerServer::new(service))
        .serve(addr)
        .await
        .map_err(|e| MackenzieError::Transient(format!("server exited: {e}")))
}

async fn add_setup(setup_dir: &PathBuf) -> Result<()> {
    let config = CmdConfig::from_env()?;
    let endpoint = config.endpoint();
    let tls = TlsMaterial::load(&config.cert_file, &config.key_file)?;

    let name = setup_dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MackenzieError::Configuration(format!("invalid setup dir {setup_dir:?}")))?
        .to_string();

    let tar = build_tar_gz(setup_dir)?;

    let channel = tonic::transport::Channel::from_shared(endpoint.uri())
        .map_err(|e| MackenzieError::Configuration(format!("invalid controller uri: {e}")))?
        .tls_config(tls.client_config())
        .map_err(|e| MackenzieError::Tls(format!("configuring client TLS: {e}")))?
        .connect()
        .await
        .map_err(|e| MackenzieError::Transient(format!("connecting to controller: {e}")))?;

    let mut client = ControllerClient::new(channel);
    client
        .add_setup(AddSetupRequest { name, tar })
        .await
        .map_err(MackenzieError::Rpc)?;
    Ok(())
}

fn build_tar_gz(dir: &PathBuf) -> Result<Vec<u8>> {
    let buf = Vec::new();
    let encoder = flate2::write::GzEncoder::new(buf, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("setup")
        .to_string();
    builder.append_dir_all(&name, dir)?;
    let encoder = builder.into_inner().map_err(MackenzieError::Io)?;
    encoder.finish().map_err(MackenzieError::Io)
}
