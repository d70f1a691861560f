//! Cluster client factory
//!
//! Builds the Kubernetes client used for leader election. An explicit
//! kubeconfig path takes precedence; otherwise the configuration is inferred
//! (in-cluster service account, then the local environment). Construction
//! failure is fatal to the process.

use crate::error::{Error, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use tracing::debug;

/// Create a Kubernetes client.
///
/// `kubeconfig` of `None` means "use in-cluster defaults".
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            debug!(kubeconfig = %path.display(), "loading kubeconfig");
            let kc = Kubeconfig::read_from(path)
                .map_err(|e| Error::ClusterClientCreation(e.to_string()))?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::ClusterClientCreation(e.to_string()))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::ClusterClientCreation(e.to_string()))?,
    };

    Client::try_from(config).map_err(|e| Error::ClusterClientCreation(e.to_string()))
}
