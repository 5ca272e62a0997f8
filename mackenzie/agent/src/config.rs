use std::path::PathBuf;

use mackenzie_core::config::{ControllerEndpoint, EnvSource};
use mackenzie_core::error::Result;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    pub setup_root: PathBuf,
    pub cluster: String,
    pub max_load: i32,
    pub controller_host: String,
    pub controller_port: u16,
    pub db_path: PathBuf,
    pub output_root: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl AgentConfig {
    pub fn from_env(output_root_override: Option<PathBuf>) -> Result<Self> {
        let mut src = EnvSource::new("AGENT_");
        let cfg = Self {
            key_file: src.require_path("key_file"),
            cert_file: src.require_path("cert_file"),
            setup_root: src.require_path("setup_root"),
            cluster: src.require("cluster"),
            max_load: src.require("max_load"),
            controller_host: src.require("controller_host"),
            controller_port: src.require("controller_port"),
            db_path: src.optional("db_path", PathBuf::from("agent.db")),
            output_root: output_root_override
                .unwrap_or_else(|| src.require_path("output_root")),
            log_dir: src.optional_string("log_dir").map(PathBuf::from),
        };
        src.finish()?;
        Ok(cfg)
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
