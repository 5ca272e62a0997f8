//! Shared `--env-file` flag, mirroring the agent's loader: every task source
//! is otherwise configured entirely from its prefixed environment variables.

use std::path::PathBuf;

use clap::Parser;

use mackenzie_core::error::Result;

#[derive(Parser)]
pub struct EnvFileArgs {
    /// Optional `KEY=VALUE` file loaded into the process environment before
    /// the task source's prefixed variables are read.
    #[arg(short = 'e', long)]
    pub env_file: Option<PathBuf>,
}

pub fn load_env_file(path: &PathBuf) -> Result<()> {
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
