//! Lease-backed leadership coordinator
//!
//! Production implementation of [`LeadershipCoordinator`] over
//! `coordination.k8s.io/v1` Lease objects. All replicas contend for one
//! Lease named after the lock identity; the holder renews it at a third of
//! the lease duration and every write goes through optimistic concurrency,
//! so a conflicting write means contention, never corruption.
//!
//! One leadership term per process: losing the lease cancels the workload,
//! waits for it to stop, and returns an error so the scheduler restarts the
//! replica. The lease is only ever touched through the cluster API.

use crate::config::StartupConfig;
use crate::error::{Error, Result};
use crate::k8s;
use crate::leadership::{CoordinatorProvider, CoordinatorRef, LeadershipCoordinator, LockIdentity};
use crate::workload::WorkloadRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time a granted lease stays valid without renewal
const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);

/// Default delay between acquisition attempts while another replica leads
const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Namespace used when the caller leaves the lease namespace empty
const FALLBACK_NAMESPACE: &str = "default";

// =============================================================================
// Coordinator
// =============================================================================

/// Lease-based implementation of the leadership contract
pub struct LeaseCoordinator {
    client: Client,
    holder_id: String,
    lease_duration: Duration,
    retry_period: Duration,
}

impl LeaseCoordinator {
    /// Coordinator with default timings and a holder identity derived from
    /// the pod hostname.
    pub fn new(client: Client) -> Self {
        Self::with_timings(client, DEFAULT_LEASE_DURATION, DEFAULT_RETRY_PERIOD)
    }

    /// Coordinator with explicit lease duration and retry period.
    pub fn with_timings(client: Client, lease_duration: Duration, retry_period: Duration) -> Self {
        Self {
            client,
            holder_id: default_holder_id(),
            lease_duration,
            retry_period,
        }
    }

    /// Identity recorded as the lease holder while this replica leads.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Attempt to take or adopt the lease. `Ok(false)` means another replica
    /// holds it or won a concurrent write.
    async fn try_acquire(&self, api: &Api<Lease>, lock: &LockIdentity) -> Result<bool> {
        let now = Utc::now();
        match api.get_opt(lock.as_str()).await? {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(lock.as_str().to_string()),
                        ..Default::default()
                    },
                    spec: Some(owned_spec(&self.holder_id, self.lease_duration, None, now)),
                };
                match api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
            Some(existing) => {
                let spec = existing.spec.clone().unwrap_or_default();
                if !lease_available(&spec, &self.holder_id, self.lease_duration, now) {
                    return Ok(false);
                }
                let mut updated = existing;
                updated.spec = Some(owned_spec(
                    &self.holder_id,
                    self.lease_duration,
                    Some(&spec),
                    now,
                ));
                match api
                    .replace(lock.as_str(), &PostParams::default(), &updated)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Refresh the renew timestamp. `Ok(false)` means the lease is no longer
    /// ours (deleted, taken over, or a peer won the write).
    async fn renew(&self, api: &Api<Lease>, lock: &LockIdentity) -> Result<bool> {
        let now = Utc::now();
        let Some(existing) = api.get_opt(lock.as_str()).await? else {
            return Ok(false);
        };
        let spec = existing.spec.clone().unwrap_or_default();
        if spec.holder_identity.as_deref() != Some(self.holder_id.as_str()) {
            return Ok(false);
        }
        let mut updated = existing;
        updated.spec = Some(LeaseSpec {
            renew_time: Some(MicroTime(now)),
            ..spec
        });
        match api
            .replace(lock.as_str(), &PostParams::default(), &updated)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Clear the holder so a peer can acquire without waiting out the TTL.
    /// Best effort; the lease lapses on its own if this fails.
    async fn release(&self, api: &Api<Lease>, lock: &LockIdentity) {
        let existing = match api.get_opt(lock.as_str()).await {
            Ok(Some(lease)) => lease,
            Ok(None) => return,
            Err(e) => {
                debug!(lock = %lock, error = %e, "skipping lease release");
                return;
            }
        };
        let spec = existing.spec.clone().unwrap_or_default();
        if spec.holder_identity.as_deref() != Some(self.holder_id.as_str()) {
            return;
        }
        let mut updated = existing;
        updated.spec = Some(LeaseSpec {
            holder_identity: None,
            renew_time: None,
            ..spec
        });
        if let Err(e) = api
            .replace(lock.as_str(), &PostParams::default(), &updated)
            .await
        {
            debug!(lock = %lock, error = %e, "lease release failed");
        }
    }
}

#[async_trait]
impl LeadershipCoordinator for LeaseCoordinator {
    async fn run_with_leadership(
        &self,
        lock: &LockIdentity,
        namespace: &str,
        workload: WorkloadRef,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let namespace = if namespace.is_empty() {
            FALLBACK_NAMESPACE
        } else {
            namespace
        };
        let api: Api<Lease> = Api::namespaced(self.client.clone(), namespace);

        // Pending: contend for the lease until granted or shut down.
        loop {
            match self.try_acquire(&api, lock).await {
                Ok(true) => break,
                Ok(false) => {
                    debug!(lock = %lock, "lease held by another replica");
                }
                Err(e) => {
                    warn!(lock = %lock, error = %e, "lease acquisition attempt failed");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.retry_period) => {}
                _ = shutdown.cancelled() => {
                    info!(lock = %lock, "shutdown requested before leadership was acquired");
                    return Ok(());
                }
            }
        }
        info!(lock = %lock, holder = %self.holder_id, "acquired leadership, starting workload");

        // Leader: run the workload for this term, renewing as we go. The
        // term token is cancelled before this function returns, and the
        // workload is awaited so it has stopped by the time a peer can be
        // granted the lease.
        let term = shutdown.child_token();
        let work = {
            let workload = workload.clone();
            let term = term.clone();
            async move { workload.start(term).await }
        };
        tokio::pin!(work);

        let renew_interval = self.lease_duration / 3;
        let mut last_renewal = Instant::now();
        loop {
            tokio::select! {
                res = &mut work => {
                    self.release(&api, lock).await;
                    return match res {
                        Ok(()) if shutdown.is_cancelled() => {
                            info!(lock = %lock, "workload stopped after shutdown request");
                            Ok(())
                        }
                        Ok(()) => Err(Error::LeadershipCoordination(
                            "workload stopped while leadership was held".into(),
                        )),
                        Err(e) => Err(e),
                    };
                }
                _ = shutdown.cancelled(), if !term.is_cancelled() => {
                    info!(lock = %lock, "shutdown requested, stopping workload");
                    term.cancel();
                }
                _ = tokio::time::sleep(renew_interval), if !term.is_cancelled() => {
                    match self.renew(&api, lock).await {
                        Ok(true) => last_renewal = Instant::now(),
                        Ok(false) => {
                            warn!(lock = %lock, "lease lost to another replica, stopping workload");
                            term.cancel();
                            let _ = (&mut work).await;
                            return Err(Error::LeadershipCoordination(
                                "lease lost to another replica".into(),
                            ));
                        }
                        Err(e) => {
                            if last_renewal.elapsed() >= self.lease_duration {
                                term.cancel();
                                let _ = (&mut work).await;
                                return Err(Error::LeadershipCoordination(format!(
                                    "unable to renew lease: {}",
                                    e
                                )));
                            }
                            warn!(lock = %lock, error = %e, "lease renewal attempt failed");
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Binds the cluster client factory to the Lease coordinator.
pub struct LeaseCoordinatorProvider;

#[async_trait]
impl CoordinatorProvider for LeaseCoordinatorProvider {
    async fn connect(&self, config: &StartupConfig) -> Result<CoordinatorRef> {
        let client = k8s::create_client(config.kubeconfig.as_deref()).await?;
        Ok(Arc::new(LeaseCoordinator::new(client)))
    }
}

// =============================================================================
// Lease Arithmetic
// =============================================================================

/// Whether the recorded lease may be taken by `holder` at `now`.
fn lease_available(
    spec: &LeaseSpec,
    holder: &str,
    fallback_ttl: Duration,
    now: DateTime<Utc>,
) -> bool {
    let current = match spec.holder_identity.as_deref() {
        None | Some("") => return true,
        Some(current) => current,
    };
    if current == holder {
        return true;
    }
    let ttl = spec
        .lease_duration_seconds
        .map(|secs| chrono::Duration::seconds(i64::from(secs)))
        .unwrap_or_else(|| {
            chrono::Duration::from_std(fallback_ttl).unwrap_or_else(|_| chrono::Duration::zero())
        });
    match &spec.renew_time {
        // A holder that never renewed counts as expired.
        None => true,
        Some(MicroTime(renewed)) => now.signed_duration_since(*renewed) > ttl,
    }
}

/// Lease spec recording `holder` as the owner as of `now`.
fn owned_spec(
    holder: &str,
    duration: Duration,
    previous: Option<&LeaseSpec>,
    now: DateTime<Utc>,
) -> LeaseSpec {
    let retained = previous.filter(|p| p.holder_identity.as_deref() == Some(holder));
    let transitions = match previous {
        Some(p) if retained.is_none() => p.lease_transitions.unwrap_or(0) + 1,
        Some(p) => p.lease_transitions.unwrap_or(0),
        None => 0,
    };
    LeaseSpec {
        holder_identity: Some(holder.to_string()),
        lease_duration_seconds: Some(duration.as_secs() as i32),
        acquire_time: retained
            .and_then(|p| p.acquire_time.clone())
            .or(Some(MicroTime(now))),
        renew_time: Some(MicroTime(now)),
        lease_transitions: Some(transitions),
        ..Default::default()
    }
}

/// Holder identity for this replica: the pod hostname when available.
fn default_holder_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| format!("csi-vxflexos-{}", std::process::id()))
}
