//! Runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the storage
//! backend, the admission controller and the server. Request handling never reads the
//! environment.
//!
//! Resolution order, later wins:
//! 1. built-in defaults (see [`crate::constants`])
//! 2. the YAML file named by `DEPOT_CONFIG`, if set
//! 3. individual `DEPOT_*` environment variables
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 1337
//!   storage_path: ./storage
//!   shutdown_timeout_secs: 5
//!   enable_reflection: false
//! limits:
//!   upload_download: 10
//!   list_files: 100
//! ```

use crate::constants::{
    DEFAULT_HOST, DEFAULT_LIST_LIMIT, DEFAULT_PORT, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
    DEFAULT_STORAGE_PATH, DEFAULT_TRANSFER_LIMIT,
};
use crate::error::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_CONFIG: &str = "DEPOT_CONFIG";
pub const ENV_HOST: &str = "DEPOT_HOST";
pub const ENV_PORT: &str = "DEPOT_PORT";
pub const ENV_STORAGE_PATH: &str = "DEPOT_STORAGE_PATH";
pub const ENV_SHUTDOWN_TIMEOUT_SECS: &str = "DEPOT_SHUTDOWN_TIMEOUT_SECS";
pub const ENV_ENABLE_REFLECTION: &str = "DEPOT_ENABLE_REFLECTION";
pub const ENV_UPLOAD_DOWNLOAD_LIMIT: &str = "DEPOT_UPLOAD_DOWNLOAD_LIMIT";
pub const ENV_LIST_LIMIT: &str = "DEPOT_LIST_LIMIT";

const fn non_zero(n: usize) -> NonZeroUsize {
    match NonZeroUsize::new(n) {
        Some(n) => n,
        None => panic!("default limit must be non-zero"),
    }
}

/// Complete service configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: Limits,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage_path: PathBuf,
    pub shutdown_timeout_secs: u64,
    pub enable_reflection: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            enable_reflection: false,
        }
    }
}

/// Gate capacities. Zero is unrepresentable: a zero-capacity gate would block forever.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    pub upload_download: NonZeroUsize,
    pub list_files: NonZeroUsize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            upload_download: non_zero(DEFAULT_TRANSFER_LIMIT),
            list_files: non_zero(DEFAULT_LIST_LIMIT),
        }
    }
}

impl Config {
    /// Resolve configuration from `DEPOT_CONFIG` and `DEPOT_*` variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve configuration using `lookup` in place of the process environment.
    pub fn resolve<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG).filter(|v| !v.trim().is_empty()) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> ConfigResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Overwrite fields for every variable `lookup` knows about.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(host) = get(ENV_HOST).filter(|v| !v.is_empty()) {
            self.server.host = host;
        }
        if let Some(value) = get(ENV_PORT) {
            self.server.port = parse_value(ENV_PORT, value)?;
        }
        if let Some(path) = get(ENV_STORAGE_PATH).filter(|v| !v.is_empty()) {
            self.server.storage_path = PathBuf::from(path);
        }
        if let Some(value) = get(ENV_SHUTDOWN_TIMEOUT_SECS) {
            self.server.shutdown_timeout_secs = parse_value(ENV_SHUTDOWN_TIMEOUT_SECS, value)?;
        }
        if let Some(value) = get(ENV_ENABLE_REFLECTION) {
            self.server.enable_reflection = parse_flag(ENV_ENABLE_REFLECTION, value)?;
        }
        if let Some(value) = get(ENV_UPLOAD_DOWNLOAD_LIMIT) {
            self.limits.upload_download = parse_value(ENV_UPLOAD_DOWNLOAD_LIMIT, value)?;
        }
        if let Some(value) = get(ENV_LIST_LIMIT) {
            self.limits.list_files = parse_value(ENV_LIST_LIMIT, value)?;
        }

        Ok(())
    }

    /// Resolve `host:port` to the first matching socket address.
    pub fn listen_addr(&self) -> ConfigResult<SocketAddr> {
        let invalid = || ConfigError::InvalidValue {
            key: "server.host",
            value: format!("{}:{}", self.server.host, self.server.port),
        };

        (self.server.host.as_str(), self.server.port)
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)
    }

    pub fn storage_path(&self) -> &Path {
        &self.server.storage_path
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn parse_flag(key: &'static str, value: String) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}
