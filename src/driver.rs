//! Long-running driver shell
//!
//! [`DriverShell`] is the workload handed to the leadership gate: the parts
//! of the long-running driver process this crate owns. It applies the
//! driver-config-params file (and re-applies the log level when the
//! ConfigMap mount changes), serves the liveness/readiness endpoint, and
//! holds the process open until cancelled. The CSI protocol loop itself
//! lives behind this boundary and is not part of the orchestrator.

use crate::config::{DriverParams, StartupConfig};
use crate::error::Result;
use crate::workload::Workload;
use async_trait::async_trait;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Handle for retuning the log filter while the driver runs
pub type LogReloadHandle = reload::Handle<EnvFilter, Registry>;

/// How often the driver config params file is re-checked
const DEFAULT_PARAMS_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Build the tracing filter for a driver log level.
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(format!("{},hyper=warn,kube=info", level)).map_err(|e| {
        crate::error::Error::Configuration(format!("invalid log level {:?}: {}", level, e))
    })
}

// =============================================================================
// Driver Shell
// =============================================================================

/// The in-process host for the long-running driver.
pub struct DriverShell {
    config: StartupConfig,
    log_handle: Option<LogReloadHandle>,
    poll_interval: Duration,
}

impl DriverShell {
    pub fn new(config: StartupConfig, log_handle: Option<LogReloadHandle>) -> Self {
        Self {
            config,
            log_handle,
            poll_interval: DEFAULT_PARAMS_POLL_INTERVAL,
        }
    }

    /// Override the params poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn apply_log_level(&self, params: &DriverParams) {
        let Some(handle) = &self.log_handle else {
            return;
        };
        match env_filter(&params.log_level) {
            Ok(filter) => {
                if handle.reload(filter).is_ok() {
                    info!(level = %params.log_level, "applied driver log level");
                }
            }
            Err(e) => warn!(error = %e, "ignoring driver log level"),
        }
    }
}

#[async_trait]
impl Workload for DriverShell {
    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let params = DriverParams::load(&self.config.driver_config_params_file)?;
        self.apply_log_level(&params);

        info!(
            driver = crate::DRIVER_NAME,
            version = crate::VERSION,
            "driver started"
        );

        let ready = Arc::new(AtomicBool::new(true));
        let mut health = tokio::spawn(run_health_server(
            self.config.health_addr,
            ready.clone(),
            shutdown.clone(),
        ));

        let mut applied_level = params.log_level;
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    ready.store(false, Ordering::SeqCst);
                    info!("shutdown requested, stopping driver");
                    break;
                }
                res = &mut health => {
                    return match res {
                        Ok(Ok(())) => Err(crate::error::Error::Internal(
                            "health endpoint stopped unexpectedly".into(),
                        )),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(crate::error::Error::Internal(format!(
                            "health endpoint panicked: {}",
                            e
                        ))),
                    };
                }
                _ = poll.tick() => {
                    match DriverParams::load(&self.config.driver_config_params_file) {
                        Ok(params) if params.log_level != applied_level => {
                            self.apply_log_level(&params);
                            applied_level = params.log_level;
                        }
                        Ok(_) => {}
                        // The ConfigMap mount can be mid-update; keep the last
                        // applied parameters.
                        Err(e) => warn!(error = %e, "driver config params unreadable"),
                    }
                }
            }
        }

        // Health server drains via the same token.
        match health.await {
            Ok(res) => res?,
            Err(e) => warn!(error = %e, "health endpoint did not stop cleanly"),
        }
        info!("driver stopped");
        Ok(())
    }
}

// =============================================================================
// Health Endpoint
// =============================================================================

fn health_response(path: &str, ready: bool) -> (StatusCode, &'static str) {
    match path {
        "/healthz" | "/livez" => (StatusCode::OK, "ok"),
        "/readyz" if ready => (StatusCode::OK, "ok"),
        "/readyz" => (StatusCode::SERVICE_UNAVAILABLE, "shutting down"),
        _ => (StatusCode::NOT_FOUND, "not found"),
    }
}

async fn run_health_server(
    addr: SocketAddr,
    ready: Arc<AtomicBool>,
    shutdown: CancellationToken,
) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.clone();
                async move {
                    let (status, body) = health_response(req.uri().path(), ready.load(Ordering::SeqCst));
                    Ok::<_, std::convert::Infallible>(
                        Response::builder()
                            .status(status)
                            .body(Body::from(body))
                            .unwrap(),
                    )
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!("health endpoint listening on {}", server.local_addr());
    server
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

// =============================================================================
// Usage
// =============================================================================

/// Driver environment variables surfaced in the command help text.
pub const USAGE: &str = r#"    X_CSI_VXFLEXOS_SDCGUID
        Specifies the GUID of the SDC. This is only used by the Node Service,
        and removes a need for calling an external binary to retrieve the GUID.
        If not set, the external binary will be invoked.

        The default value is empty.

    X_CSI_VXFLEXOS_THICKPROVISIONING
        Specifies whether thick provisiong should be used when creating volumes.

        The default value is false.

    X_CSI_VXFLEXOS_ENABLESNAPSHOTCGDELETE
        When a snapshot is deleted, if it is a member of a Consistency Group, enable automatic deletion
        of all snapshots in the consistency group.

        The default value is false.

    X_CSI_VXFLEXOS_ENABLELISTVOLUMESNAPSHOTS
        When listing volumes, if this option is is enabled, then volumes and snapshots will be returned.
        Otherwise only volumes are returned.

        The default value is false.
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartupOptions;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use std::io::Write;

    fn shell_config(params_path: &str) -> StartupConfig {
        StartupOptions {
            array_config: "/vxflexos-config/config".into(),
            driver_config_params: params_path.into(),
            health_addr: "127.0.0.1:0".into(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_health_response_paths() {
        assert_eq!(health_response("/healthz", true).0, StatusCode::OK);
        assert_eq!(health_response("/livez", false).0, StatusCode::OK);
        assert_eq!(health_response("/readyz", true).0, StatusCode::OK);
        assert_eq!(
            health_response("/readyz", false).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(health_response("/other", true).0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_env_filter_rejects_garbage() {
        assert!(env_filter("info").is_ok());
        assert_matches!(env_filter("no such level ["), Err(Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_shell_stops_on_cancellation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "CSI_LOG_LEVEL: \"info\"").unwrap();
        let shell = DriverShell::new(
            shell_config(&file.path().to_string_lossy()),
            None,
        );

        let token = CancellationToken::new();
        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), shell.start(token))
            .await
            .expect("shell did not stop after cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shell_requires_readable_params() {
        let shell = DriverShell::new(shell_config("/nonexistent/params.yaml"), None);
        let err = shell.start(CancellationToken::new()).await.unwrap_err();
        assert_matches!(err, Error::Io(_));
    }
}
