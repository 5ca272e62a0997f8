//! Prefixed-environment-variable configuration loading.
//!
//! Every component reads a fixed set of `{PREFIX}{KEY}` environment variables exactly
//! once at startup. `EnvSource` collects every missing or unparsable variable before
//! failing, so a misconfigured deployment gets one diagnostic instead of one-at-a-time
//! whack-a-mole.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{MackenzieError, Result};

pub struct EnvSource {
    prefix: &'static str,
    errors: Vec<String>,
}

impl EnvSource {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, key)).ok()
    }

    /// Read a required value, recording a diagnostic and returning a placeholder on failure.
    pub fn require<T: FromStr>(&mut self, key: &str) -> T
    where
        T: Default,
        T::Err: std::fmt::Display,
    {
        match self.var(key) {
            None => {
                self.errors
                    .push(format!("{}{key} is not set", self.prefix));
                T::default()
            }
            Some(raw) => match raw.parse() {
                Ok(v) => v,
                Err(e) => {
                    self.errors
                        .push(format!("{}{key}={raw:?} is invalid: {e}", self.prefix));
                    T::default()
                }
            },
        }
    }

    pub fn require_path(&mut self, key: &str) -> PathBuf {
        match self.var(key) {
            None => {
                self.errors
                    .push(format!("{}{key} is not set", self.prefix));
                PathBuf::new()
            }
            Some(raw) => PathBuf::from(raw),
        }
    }

    pub fn optional<T: FromStr>(&mut self, key: &str, default: T) -> T
    where
        T::Err: std::fmt::Display,
    {
        match self.var(key) {
            None => default,
            Some(raw) => match raw.parse() {
                Ok(v) => v,
                Err(e) => {
                    self.errors
                        .push(format!("{}{key}={raw:?} is invalid: {e}", self.prefix));
                    default
                }
            },
        }
    }

    pub fn optional_string(&mut self, key: &str) -> Option<String> {
        self.var(key)
    }

    /// Parse a comma-separated list of `FromStr` values (used by `PTS_num_replicates`).
    pub fn optional_list<T: FromStr>(&mut self, key: &str, default: Vec<T>) -> Vec<T>
    where
        T::Err: std::fmt::Display,
    {
        match self.var(key) {
            None => default,
            Some(raw) => {
                let mut out = Vec::new();
                for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    match part.parse() {
                        Ok(v) => out.push(v),
                        Err(e) => self.errors.push(format!(
                            "{}{key} entry {part:?} is invalid: {e}",
                            self.prefix
                        )),
                    }
                }
                out
            }
        }
    }

    /// Consume the source, failing with every accumulated diagnostic if any were recorded.
    pub fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(MackenzieError::Configuration(self.errors.join("; ")))
        }
    }
}

/// Shared infra keys present under every component's prefix: TLS material plus the
/// controller's address.
#[derive(Debug, Clone)]
pub struct ControllerEndpoint {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    pub controller_host: String,
    pub controller_port: u16,
}

impl ControllerEndpoint {
    pub fn read(src: &mut EnvSource) -> Self {
        Self {
            key_file: src.require_path("key_file"),
            cert_file: src.require_path("cert_file"),
            controller_host: src.require("controller_host"),
            controller_port: src.require("controller_port"),
        }
    }

    pub fn uri(&self) -> String {
        format!("https://{}:{}", self.controller_host, self.controller_port)
    }
}
