//! Mode-dispatching gate in front of the workload
//!
//! The gate is the single delegation point of the orchestrator: in direct
//! mode it invokes the workload exactly once in the current task; in
//! leader-elected mode it derives the lock identity, connects the
//! coordinator provider, and blocks inside the coordinator for the rest of
//! the process lifetime. It never runs the workload outside a granted
//! leadership term.

use crate::config::StartupConfig;
use crate::error::{Error, Result};
use crate::leadership::lease::LeaseCoordinatorProvider;
use crate::leadership::{CoordinatorProvider, LockIdentity};
use crate::mode::RunMode;
use crate::workload::WorkloadRef;
use crate::DRIVER_NAME;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Dispatches the workload according to the selected run mode.
pub struct LeadershipGate {
    config: StartupConfig,
    provider: Arc<dyn CoordinatorProvider>,
}

impl LeadershipGate {
    /// Gate backed by the Lease coordinator against the real cluster.
    pub fn new(config: StartupConfig) -> Self {
        Self::with_provider(config, Arc::new(LeaseCoordinatorProvider))
    }

    /// Gate with an injected coordinator provider.
    pub fn with_provider(config: StartupConfig, provider: Arc<dyn CoordinatorProvider>) -> Self {
        Self { config, provider }
    }

    /// Run the workload under the selected mode.
    ///
    /// Blocks until the workload (direct mode) or the coordinator
    /// (leader-elected mode) returns. `Ok` means a clean, shutdown-driven
    /// stop; every `Err` is terminal to the process.
    pub async fn run(
        &self,
        mode: RunMode,
        workload: WorkloadRef,
        shutdown: CancellationToken,
    ) -> Result<()> {
        match mode {
            RunMode::PreInit => Err(Error::Configuration(
                "pre-init is a one-shot mode and cannot run the workload".into(),
            )),
            RunMode::Direct => {
                info!("starting driver without leader election");
                workload.start(shutdown).await
            }
            RunMode::LeaderElected => {
                let lock = LockIdentity::for_driver(DRIVER_NAME);
                info!(lock = %lock, namespace = %self.config.leader_election_namespace,
                    "starting driver behind leader election");
                let coordinator = self.provider.connect(&self.config).await?;
                coordinator
                    .run_with_leadership(
                        &lock,
                        &self.config.leader_election_namespace,
                        workload,
                        shutdown,
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartupOptions;
    use crate::leadership::{CoordinatorRef, LeadershipCoordinator};
    use crate::workload::FnWorkload;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn config(leader_election: bool) -> StartupConfig {
        StartupOptions {
            array_config: "/vxflexos-config/config".into(),
            driver_config_params: "/vxflexos-config-params/driver-config-params.yaml".into(),
            leader_election,
            leader_election_namespace: "vxflexos".into(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    /// Provider that counts connections and fails on demand.
    struct RecordingProvider {
        connects: AtomicUsize,
        fail: bool,
        coordinator: Option<CoordinatorRef>,
    }

    #[async_trait]
    impl CoordinatorProvider for RecordingProvider {
        async fn connect(&self, _config: &StartupConfig) -> Result<CoordinatorRef> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::ClusterClientCreation("connection refused".into()));
            }
            Ok(self.coordinator.clone().expect("coordinator configured"))
        }
    }

    /// Coordinator serializing leadership terms through a shared lease.
    struct SharedLeaseCoordinator {
        lease: Arc<Mutex<()>>,
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LeadershipCoordinator for SharedLeaseCoordinator {
        async fn run_with_leadership(
            &self,
            _lock: &LockIdentity,
            _namespace: &str,
            workload: WorkloadRef,
            shutdown: CancellationToken,
        ) -> Result<()> {
            let _term = self.lease.lock().await;
            self.invocations.fetch_add(1, Ordering::SeqCst);
            workload.start(shutdown.child_token()).await
        }
    }

    fn counting_workload(calls: Arc<AtomicUsize>) -> WorkloadRef {
        FnWorkload::shared(move |_token| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_direct_mode_invokes_workload_once_without_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(RecordingProvider {
            connects: AtomicUsize::new(0),
            fail: false,
            coordinator: None,
        });
        let gate = LeadershipGate::with_provider(config(false), provider.clone());

        gate.run(
            RunMode::Direct,
            counting_workload(calls.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_client_creation_failure_never_reaches_coordinator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invocations = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(RecordingProvider {
            connects: AtomicUsize::new(0),
            fail: true,
            coordinator: Some(Arc::new(SharedLeaseCoordinator {
                lease: Arc::new(Mutex::new(())),
                invocations: invocations.clone(),
            })),
        });
        let gate = LeadershipGate::with_provider(config(true), provider.clone());

        let err = gate
            .run(
                RunMode::LeaderElected,
                counting_workload(calls.clone()),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_matches!(err, Error::ClusterClientCreation(_));
        assert_eq!(provider.connects.load(Ordering::SeqCst), 1);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_leader_elected_mode_runs_workload_under_coordinator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invocations = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(RecordingProvider {
            connects: AtomicUsize::new(0),
            fail: false,
            coordinator: Some(Arc::new(SharedLeaseCoordinator {
                lease: Arc::new(Mutex::new(())),
                invocations: invocations.clone(),
            })),
        });
        let gate = LeadershipGate::with_provider(config(true), provider);

        gate.run(
            RunMode::LeaderElected,
            counting_workload(calls.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pre_init_mode_is_rejected() {
        let gate = LeadershipGate::with_provider(
            config(false),
            Arc::new(RecordingProvider {
                connects: AtomicUsize::new(0),
                fail: false,
                coordinator: None,
            }),
        );
        let err = gate
            .run(
                RunMode::PreInit,
                counting_workload(Arc::new(AtomicUsize::new(0))),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::Configuration(_));
    }

    #[tokio::test]
    async fn test_two_replicas_share_at_most_one_active_workload() {
        let lease = Arc::new(Mutex::new(()));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let workload = {
            let active = active.clone();
            let peak = peak.clone();
            let runs = runs.clone();
            FnWorkload::shared(move |_token| {
                let active = active.clone();
                let peak = peak.clone();
                let runs = runs.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let replica = |lease: Arc<Mutex<()>>, workload: WorkloadRef| async move {
            let provider = Arc::new(RecordingProvider {
                connects: AtomicUsize::new(0),
                fail: false,
                coordinator: Some(Arc::new(SharedLeaseCoordinator {
                    lease,
                    invocations: Arc::new(AtomicUsize::new(0)),
                })),
            });
            let gate = LeadershipGate::with_provider(config(true), provider);
            gate.run(RunMode::LeaderElected, workload, CancellationToken::new())
                .await
        };

        let (a, b) = tokio::join!(
            replica(lease.clone(), workload.clone()),
            replica(lease.clone(), workload.clone())
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1, "workloads overlapped");
    }
}
