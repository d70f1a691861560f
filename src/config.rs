//! Startup configuration
//!
//! Raw command-line values are collected into [`StartupOptions`] and
//! validated exactly once into an immutable [`StartupConfig`] before any run
//! mode executes. [`DriverParams`] models the driver-config-params YAML (a
//! ConfigMap mount) that tunes logging for the running driver.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

// =============================================================================
// Startup Options
// =============================================================================

/// Raw startup parameters as received from the command line.
///
/// Required fields are deliberately plain strings here; emptiness is checked
/// by [`StartupOptions::validate`] so a missing flag produces the documented
/// diagnostic and exit status rather than an argument-parser usage error.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// yaml file with array(s) configuration
    pub array_config: String,
    /// yaml file with driver config params
    pub driver_config_params: String,
    /// absolute path to the kubeconfig file, empty for in-cluster defaults
    pub kubeconfig: String,
    /// enable leader election
    pub leader_election: bool,
    /// namespace where the leader election lease will be created
    pub leader_election_namespace: String,
    /// health endpoint bind address
    pub health_addr: String,
}

impl StartupOptions {
    /// Validate the raw options into an immutable [`StartupConfig`].
    pub fn validate(self) -> Result<StartupConfig> {
        if self.array_config.is_empty() {
            return Err(Error::MissingRequiredConfig {
                field: "array-config",
            });
        }
        if self.driver_config_params.is_empty() {
            return Err(Error::MissingRequiredConfig {
                field: "driver-config-params",
            });
        }

        let health_addr: SocketAddr = if self.health_addr.is_empty() {
            DEFAULT_HEALTH_ADDR.parse().expect("default address parses")
        } else {
            self.health_addr
                .parse()
                .map_err(|e| Error::Configuration(format!("invalid health address: {}", e)))?
        };

        Ok(StartupConfig {
            array_config_file: PathBuf::from(self.array_config),
            driver_config_params_file: PathBuf::from(self.driver_config_params),
            kubeconfig: if self.kubeconfig.is_empty() {
                None
            } else {
                Some(PathBuf::from(self.kubeconfig))
            },
            leader_election: self.leader_election,
            leader_election_namespace: self.leader_election_namespace,
            health_addr,
        })
    }
}

/// Default health endpoint bind address
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8081";

// =============================================================================
// Startup Config
// =============================================================================

/// Validated startup configuration.
///
/// Created once at process start and never mutated; owned by the orchestrator
/// for the process lifetime and passed by reference into each component.
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Path to the array configuration secret mount
    pub array_config_file: PathBuf,
    /// Path to the driver config params ConfigMap mount
    pub driver_config_params_file: PathBuf,
    /// Kubeconfig path; `None` means in-cluster defaults
    pub kubeconfig: Option<PathBuf>,
    /// Whether the workload is gated behind leader election
    pub leader_election: bool,
    /// Namespace holding the leader election lease
    pub leader_election_namespace: String,
    /// Health endpoint bind address
    pub health_addr: SocketAddr,
}

// =============================================================================
// Driver Config Params
// =============================================================================

/// Driver parameters read from the driver-config-params YAML.
///
/// The file is a ConfigMap mount, so it can change while the driver runs;
/// [`crate::driver::DriverShell`] re-reads it and re-applies the log level.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DriverParams {
    /// Log level for the driver (`error`, `warn`, `info`, `debug`, `trace`)
    #[serde(rename = "CSI_LOG_LEVEL", default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(rename = "CSI_LOG_FORMAT", default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DriverParams {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log output format accepted in the driver config params
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    #[serde(rename = "TEXT", alias = "text")]
    Text,
    #[serde(rename = "JSON", alias = "json")]
    Json,
}

impl DriverParams {
    /// Load and validate driver params from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let params: DriverParams = serde_yaml::from_str(&raw)?;
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(Error::Configuration(format!(
                "unsupported CSI_LOG_LEVEL: {}",
                other
            ))),
        }
    }
}
