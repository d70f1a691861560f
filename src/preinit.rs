//! One-shot pre-init service
//!
//! An init container runs the driver binary with `X_CSI_MODE=mdm-info`
//! before the long-running driver containers start. In that mode the process
//! reads the mounted array configuration, validates it, and reports the
//! aggregated MDM addresses of every configured storage system, then exits.
//! The protocol server is never started on this path.

use crate::config::StartupConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, info};

// =============================================================================
// Array Configuration
// =============================================================================

/// One storage array entry from the array configuration secret
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayDefinition {
    /// Gateway endpoint of the array
    pub endpoint: String,
    /// API username
    pub username: String,
    /// API password
    #[serde(default)]
    pub password: String,
    /// Unique identifier of the storage system
    #[serde(rename = "systemID")]
    pub system_id: String,
    /// Whether this array is the default for provisioning
    #[serde(default)]
    pub is_default: bool,
    /// Skip TLS certificate validation towards the gateway
    #[serde(default)]
    pub skip_certificate_validation: bool,
    /// Comma-separated MDM addresses of the array's metadata managers
    #[serde(default)]
    pub mdm: String,
}

impl ArrayDefinition {
    /// Validated MDM addresses of this array.
    fn mdm_addresses(&self) -> Result<Vec<IpAddr>> {
        if self.mdm.is_empty() {
            return Err(Error::PreInit(format!(
                "array {} has no MDM addresses configured",
                self.system_id
            )));
        }
        self.mdm
            .split(',')
            .map(str::trim)
            .map(|addr| {
                addr.parse::<IpAddr>().map_err(|_| {
                    Error::PreInit(format!(
                        "array {}: invalid MDM address {:?}",
                        self.system_id, addr
                    ))
                })
            })
            .collect()
    }
}

/// Parse the array configuration YAML into its array entries.
pub fn parse_array_config(raw: &str) -> Result<Vec<ArrayDefinition>> {
    let arrays: Vec<ArrayDefinition> = serde_yaml::from_str(raw)?;
    Ok(arrays)
}

// =============================================================================
// Pre-Init Service
// =============================================================================

/// Result of a successful pre-init run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreInitReport {
    /// Number of storage systems discovered in the configuration
    pub systems: usize,
    /// MDM address list: comma within a system, ampersand between systems
    pub mdm: String,
}

impl std::fmt::Display for PreInitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "discovered {} storage system(s); MDM={}",
            self.systems, self.mdm
        )
    }
}

/// One-shot initialization service for the pre-init run mode
pub struct PreInitService {
    config: StartupConfig,
}

impl PreInitService {
    /// Create a pre-init service over the validated startup configuration.
    pub fn new(config: StartupConfig) -> Self {
        Self { config }
    }

    /// Run the one-shot initialization.
    ///
    /// Reads the array configuration, validates every entry, and aggregates
    /// the MDM addresses. Any defect in the configuration is fatal.
    pub async fn pre_init(&self) -> Result<PreInitReport> {
        info!(
            config = %self.config.array_config_file.display(),
            "running pre-init discovery"
        );

        let raw = tokio::fs::read_to_string(&self.config.array_config_file)
            .await
            .map_err(|e| {
                Error::PreInit(format!(
                    "unable to read array configuration {}: {}",
                    self.config.array_config_file.display(),
                    e
                ))
            })?;
        let arrays = parse_array_config(&raw)
            .map_err(|e| Error::PreInit(format!("invalid array configuration: {}", e)))?;

        validate_arrays(&arrays)?;

        let mut clusters = Vec::with_capacity(arrays.len());
        for array in &arrays {
            let addresses = array.mdm_addresses()?;
            debug!(system = %array.system_id, mdm_count = addresses.len(), "validated array");
            clusters.push(
                addresses
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }

        Ok(PreInitReport {
            systems: arrays.len(),
            mdm: clusters.join("&"),
        })
    }
}

/// Structural validation of the array list.
fn validate_arrays(arrays: &[ArrayDefinition]) -> Result<()> {
    if arrays.is_empty() {
        return Err(Error::PreInit(
            "array configuration contains no arrays".into(),
        ));
    }

    let mut seen = BTreeSet::new();
    for array in arrays {
        if array.endpoint.is_empty() {
            return Err(Error::PreInit(format!(
                "array {} has no endpoint",
                array.system_id
            )));
        }
        if array.username.is_empty() {
            return Err(Error::PreInit(format!(
                "array {} has no username",
                array.system_id
            )));
        }
        if array.system_id.is_empty() {
            return Err(Error::PreInit("array with empty systemID".into()));
        }
        if !seen.insert(array.system_id.as_str()) {
            return Err(Error::PreInit(format!(
                "duplicate systemID {}",
                array.system_id
            )));
        }
    }

    let defaults = arrays.iter().filter(|a| a.is_default).count();
    if arrays.len() > 1 && defaults != 1 {
        return Err(Error::PreInit(format!(
            "expected exactly one default array, found {}",
            defaults
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartupOptions;
    use assert_matches::assert_matches;
    use std::io::Write;

    const TWO_ARRAYS: &str = r#"
- endpoint: "https://10.0.1.10"
  username: "admin"
  password: "secret"
  systemID: "sys-1"
  isDefault: true
  mdm: "10.0.1.1,10.0.1.2"
- endpoint: "https://10.0.2.10"
  username: "admin"
  password: "secret"
  systemID: "sys-2"
  skipCertificateValidation: true
  mdm: "10.0.2.1,10.0.2.2"
"#;

    fn service_for(yaml: &str) -> (PreInitService, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", yaml).unwrap();
        let config = StartupOptions {
            array_config: file.path().to_string_lossy().into_owned(),
            driver_config_params: "/vxflexos-config-params/driver-config-params.yaml".into(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        (PreInitService::new(config), file)
    }

    #[tokio::test]
    async fn test_pre_init_aggregates_mdm_addresses() {
        let (svc, _file) = service_for(TWO_ARRAYS);
        let report = svc.pre_init().await.unwrap();
        assert_eq!(report.systems, 2);
        assert_eq!(report.mdm, "10.0.1.1,10.0.1.2&10.0.2.1,10.0.2.2");
        assert_eq!(
            report.to_string(),
            "discovered 2 storage system(s); MDM=10.0.1.1,10.0.1.2&10.0.2.1,10.0.2.2"
        );
    }

    #[tokio::test]
    async fn test_pre_init_rejects_missing_mdm() {
        let yaml = r#"
- endpoint: "https://10.0.1.10"
  username: "admin"
  systemID: "sys-1"
"#;
        let (svc, _file) = service_for(yaml);
        assert_matches!(svc.pre_init().await, Err(Error::PreInit(_)));
    }

    #[tokio::test]
    async fn test_pre_init_rejects_bad_mdm_address() {
        let yaml = r#"
- endpoint: "https://10.0.1.10"
  username: "admin"
  systemID: "sys-1"
  mdm: "10.0.1.1,gateway.local"
"#;
        let (svc, _file) = service_for(yaml);
        let err = svc.pre_init().await.unwrap_err();
        assert!(err.to_string().contains("invalid MDM address"));
    }

    #[tokio::test]
    async fn test_pre_init_rejects_duplicate_system_ids() {
        let yaml = r#"
- endpoint: "https://10.0.1.10"
  username: "admin"
  systemID: "sys-1"
  isDefault: true
  mdm: "10.0.1.1"
- endpoint: "https://10.0.2.10"
  username: "admin"
  systemID: "sys-1"
  mdm: "10.0.2.1"
"#;
        let (svc, _file) = service_for(yaml);
        let err = svc.pre_init().await.unwrap_err();
        assert!(err.to_string().contains("duplicate systemID"));
    }

    #[tokio::test]
    async fn test_pre_init_requires_one_default_among_many() {
        let yaml = r#"
- endpoint: "https://10.0.1.10"
  username: "admin"
  systemID: "sys-1"
  mdm: "10.0.1.1"
- endpoint: "https://10.0.2.10"
  username: "admin"
  systemID: "sys-2"
  mdm: "10.0.2.1"
"#;
        let (svc, _file) = service_for(yaml);
        let err = svc.pre_init().await.unwrap_err();
        assert!(err.to_string().contains("exactly one default array"));
    }

    #[tokio::test]
    async fn test_pre_init_missing_file_is_fatal() {
        let config = StartupOptions {
            array_config: "/nonexistent/config".into(),
            driver_config_params: "/nonexistent/params.yaml".into(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let svc = PreInitService::new(config);
        assert_matches!(svc.pre_init().await, Err(Error::PreInit(_)));
    }

    #[test]
    fn test_single_array_needs_no_default_flag() {
        let arrays = parse_array_config(
            r#"
- endpoint: "https://10.0.1.10"
  username: "admin"
  systemID: "sys-1"
  mdm: "10.0.1.1"
"#,
        )
        .unwrap();
        assert!(validate_arrays(&arrays).is_ok());
    }
}
