// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use exposure_kernel::config::{DEFAULT_IDS_PER_KEY, DEFAULT_RETENTION_SECS, DEFAULT_SCAN_INTERVAL_SECS};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default active segment size before rotation (4 MiB).
pub const DEFAULT_SEGMENT_MAX_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// Bearer token for the HTTP API. `None` disables auth.
    pub auth_token: Option<String>,
    pub retention_secs: u64,
    /// Period of the background retention sweep. Zero disables it.
    pub sweep_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub ids_per_key: u32,
    pub segment_max_bytes: u64,
    /// Shared secret of the key-distribution service's batch signatures.
    pub verifier_secret: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./exposure-data"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            auth_token: None,
            retention_secs: DEFAULT_RETENTION_SECS,
            sweep_interval_secs: 3600,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            ids_per_key: DEFAULT_IDS_PER_KEY,
            segment_max_bytes: DEFAULT_SEGMENT_MAX_BYTES,
            verifier_secret: "exposure-dev-publisher".to_string(),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid value {value:?} for {var}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl NodeConfig {
    /// Defaults overridden by `EXPOSURE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`NodeConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(dir) = lookup("EXPOSURE_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("EXPOSURE_BIND_ADDR") {
            cfg.bind_addr = parse("EXPOSURE_BIND_ADDR", addr)?;
        }
        cfg.auth_token = lookup("EXPOSURE_AUTH_TOKEN").filter(|t| !t.is_empty());
        if let Some(v) = lookup("EXPOSURE_RETENTION_SECS") {
            cfg.retention_secs = parse("EXPOSURE_RETENTION_SECS", v)?;
        }
        if let Some(v) = lookup("EXPOSURE_SWEEP_INTERVAL_SECS") {
            cfg.sweep_interval_secs = parse("EXPOSURE_SWEEP_INTERVAL_SECS", v)?;
        }
        if let Some(v) = lookup("EXPOSURE_SCAN_INTERVAL_SECS") {
            cfg.scan_interval_secs = parse("EXPOSURE_SCAN_INTERVAL_SECS", v)?;
        }
        if let Some(v) = lookup("EXPOSURE_IDS_PER_KEY") {
            cfg.ids_per_key = parse("EXPOSURE_IDS_PER_KEY", v)?;
        }
        if let Some(v) = lookup("EXPOSURE_SEGMENT_MAX_BYTES") {
            cfg.segment_max_bytes = parse("EXPOSURE_SEGMENT_MAX_BYTES", v)?;
        }
        if let Some(secret) = lookup("EXPOSURE_VERIFIER_SECRET") {
            cfg.verifier_secret = secret;
        }

        if cfg.ids_per_key == 0 {
            return Err(ConfigError {
                var: "EXPOSURE_IDS_PER_KEY",
                value: "0".into(),
            });
        }
        Ok(cfg)
    }
}

fn parse<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError { var, value })
}
