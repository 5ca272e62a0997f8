use std::path::PathBuf;

use mackenzie_core::config::{ControllerEndpoint, EnvSource};
use mackenzie_core::error::Result;

fn endpoint_of(
    key_file: &std::path::Path,
    cert_file: &std::path::Path,
    controller_host: &str,
    controller_port: u16,
) -> ControllerEndpoint {
    ControllerEndpoint {
        key_file: key_file.to_path_buf(),
        cert_file: cert_file.to_path_buf(),
        controller_host: controller_host.to_string(),
        controller_port,
    }
}

#[derive(Debug, Clone)]
pub struct CsmConfig {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    pub controller_host: String,
    pub controller_port: u16,
    pub work_dir: PathBuf,
    pub run_name: String,
    pub setup_dir: PathBuf,
    pub num_replicates: i32,
    pub multiplier: i32,
    pub max_runtime: String,
    pub max_evals: u32,
    pub n_iter_no_change: u32,
    pub min_rel_improvement: f64,
    pub make_y_positive: bool,
    pub log_dir: Option<PathBuf>,
}

impl CsmConfig {
    pub fn from_env() -> Result<Self> {
        let mut src = EnvSource::new("CSMTS_");
        let cfg = Self {
            key_file: src.require_path("key_file"),
            cert_file: src.require_path("cert_file"),
            controller_host: src.require("controller_host"),
            controller_port: src.require("controller_port"),
            work_dir: src.require_path("work_dir"),
            run_name: src.require("run_name"),
            setup_dir: src.require_path("setup_dir"),
            num_replicates: src.require("num_replicates"),
            multiplier: src.require("multiplier"),
            max_runtime: src.require("max_runtime"),
            max_evals: src.require("max_evals"),
            n_iter_no_change: src.require("n_iter_no_change"),
            min_rel_improvement: src.require("min_rel_improvement"),
            make_y_positive: src.optional("make_y_positive", true),
            log_dir: src.optional_string("log_dir").map(PathBuf::from),
        };
        src.finish()?;
        Ok(cfg)
    }

    pub fn endpoint(&self) -> ControllerEndpoint {
        endpoint_of(&self.key_file, &self.cert_file, &self.controller_host, self.controller_port)
    }
}

#[derive(Debug, Clone)]
pub struct BayesConfig {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    pub controller_host: String,
    pub controller_port: u16,
    pub work_dir: PathBuf,
    pub run_name: String,
    pub setup_dir: PathBuf,
    pub multiplier: i32,
    pub max_runtime: String,
    pub init_evals: u32,
    pub explore_evals: u32,
    pub exploit_evals: u32,
    pub parallel_evals: u32,
    pub kappa_initial: f64,
    pub kappa_scale: f64,
    pub log_dir: Option<PathBuf>,
}

impl BayesConfig {
    pub fn from_env() -> Result<Self> {
        let mut src = EnvSource::new("BOTS_");
        let cfg = Self {
            key_file: src.require_path("key_file"),
            cert_file: src.require_path("cert_file"),
            controller_host: src.require("controller_host"),
            controller_port: src.require("controller_port"),
            work_dir: src.require_path("work_dir"),
            run_name: src.require("run_name"),
            setup_dir: src.require_path("setup_dir"),
            multiplier: src.require("multiplier"),
            max_runtime: src.require("max_runtime"),
            init_evals: src.require("init_evals"),
            explore_evals: src.require("explore_evals"),
            exploit_evals: src.require("exploit_evals"),
            parallel_evals: src.require("parallel_evals"),
            kappa_initial: src.require("kappa_initial"),
            kappa_scale: src.require("kappa_scale"),
            log_dir: src.optional_string("log_dir").map(PathBuf::from),
        };
        src.finish()?;
        Ok(cfg)
    }

    pub fn endpoint(&self) -> ControllerEndpoint {
        endpoint_of(&self.key_file, &self.cert_file, &self.controller_host, self.controller_port)
    }
}

#[derive(Debug, Clone)]
pub struct ProjConfig {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    pub controller_host: String,
    pub controller_port: u16,
    pub run_name: String,
    pub setup_dir: PathBuf,
    pub multiplier: i32,
    pub max_runtime: String,
    pub start_batch: i32,
    pub num_replicates: Vec<i32>,
    pub status_file: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl ProjConfig {
    pub fn from_env() -> Result<Self> {
        let mut src = EnvSource::new("PTS_");
        let cfg = Self {
            key_file: src.require_path("key_file"),
            cert_file: src.require_path("cert_file"),
            controller_host: src.require("controller_host"),
            controller_port: src.require("controller_port"),
            run_name: src.require("run_name"),
            setup_dir: src.require_path("setup_dir"),
            multiplier: src.require("multiplier"),
            max_runtime: src.require("max_runtime"),
            start_batch: src.optional("start_batch", 0),
            num_replicates: src.optional_list("num_replicates", Vec::new()),
            status_file: src.require_path("status_file"),
            log_dir: src.optional_string("log_dir").map(PathBuf::from),
        };
        src.finish()?;
        Ok(cfg)
    }

    pub fn endpoint(&self) -> ControllerEndpoint {
        endpoint_of(&self.key_file, &self.cert_file, &self.controller_host, self.controller_port)
    }
}

#[derive(Debug, Clone)]
pub struct PostOptConfig {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    pub controller_host: String,
    pub controller_port: u16,
    pub run_name: String,
    pub setup_dir: PathBuf,
    pub multiplier: i32,
    pub max_runtime: String,
    pub num_evals: i32,
    pub opt_status_file: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl PostOptConfig {
    pub fn from_env() -> Result<Self> {
        let mut src = EnvSource::new("POTS_");
        let cfg = Self {
            key_file: src.require_path("key_file"),
            cert_file: src.require_path("cert_file"),
            controller_host: src.require("controller_host"),
            controller_port: src.require("controller_port"),
            run_name: src.require("run_name"),
            setup_dir: src.require_path("setup_dir"),
            multiplier: src.require("multiplier"),
            max_runtime: src.require("max_runtime"),
            num_evals: src.require("num_evals"),
            opt_status_file: src.require_path("opt_status_file"),
            log_dir: src.optional_string("log_dir").map(PathBuf::from),
        };
        src.finish()?;
        Ok(cfg)
    }

    pub fn endpoint(&self) -> ControllerEndpoint {
        endpoint_of(&self.key_file, &self.cert_file, &self.controller_host, self.controller_port)
    }
}
