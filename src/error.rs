//! Error types for the driver lifecycle orchestrator
//!
//! Every error in this crate is fatal to the process: the orchestrator's job
//! is fail-fast mode selection, and restart policy belongs to the cluster
//! scheduler. Failures surface on stderr and terminate with a non-zero
//! status; nothing here is retried internally.

use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Startup Validation Errors
    // =========================================================================
    #[error("{field} argument is mandatory")]
    MissingRequiredConfig { field: &'static str },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Pre-Init Errors
    // =========================================================================
    #[error("failed to complete pre-init: {0}")]
    PreInit(String),

    // =========================================================================
    // Leader Election Errors
    // =========================================================================
    #[error("failed to create cluster client for leader election: {0}")]
    ClusterClientCreation(String),

    #[error("leader election failed: {0}")]
    LeadershipCoordination(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    #[error("HTTP server error: {0}")]
    Http(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_message_names_flag() {
        let err = Error::MissingRequiredConfig {
            field: "array-config",
        };
        assert_eq!(err.to_string(), "array-config argument is mandatory");

        let err = Error::MissingRequiredConfig {
            field: "driver-config-params",
        };
        assert_eq!(
            err.to_string(),
            "driver-config-params argument is mandatory"
        );
    }

    #[test]
    fn test_preinit_message() {
        let err = Error::PreInit("no MDM addresses configured".into());
        assert_eq!(
            err.to_string(),
            "failed to complete pre-init: no MDM addresses configured"
        );
    }
}
