use std::path::PathBuf;

use mackenzie_core::config::{ControllerEndpoint, EnvSource};
use mackenzie_core::error::Result;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    pub setup_root: PathBuf,
    pub task_timeout: i64,
    pub controller_host: String,
    pub controller_port: u16,
    pub db_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    /// Port for the Prometheus `/metrics` endpoint; absent disables it. No-op when
    /// the `prometheus-metrics` feature is off.
    pub metrics_port: Option<u16>,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self> {
        let mut src = EnvSource::new("CONTROLLER_");
        let cfg = Self {
            key_file: src.require_path("key_file"),
            cert_file: src.require_path("cert_file"),
            setup_root: src.require_path("setup_root"),
            task_timeout: src.require("task_timeout"),
            controller_host: src.require("controller_host"),
            controller_port: src.require("controller_port"),
            db_path: src.optional("db_path", PathBuf::from("controller.db")),
            log_dir: src.optional_string("log_dir").map(PathBuf::from),
            metrics_port: src.optional_string("metrics_port").and_then(|s| s.parse().ok()),
        };
        src.finish()?;
        Ok(cfg)
    }
}

/// Configuration for the `add-setup` CLI subcommand, a thin RPC client that only
/// needs enough to reach the controller — no `setup_root`/`task_timeout`.
#[derive(Debug, Clone)]
pub struct CmdConfig {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    pub controller_host: String,
    pub controller_port: u16,
}

impl CmdConfig {
    pub fn from_env() -> Result<Self> {
        let mut src = EnvSource::new("CMD_");
        let endpoint = ControllerEndpoint::read(&mut src);
        src.finish()?;
        Ok(Self {
            key_file: endpoint.key_file,
            cert_file: endpoint.cert_file,
            controller_host: endpoint.controller_host,
            controller_port: endpoint.controller_port,
        })
    }

    pub fn endpoint(&self) -> ControllerEndpoint {
        ControllerEndpoint {
            key_file: self.key_file.clone(),
            cert_file: self.cert_file.clone(),
            controller_host: self.controller_host.clone(),
            controller_port: self.controller_port,
        }
    }
}
