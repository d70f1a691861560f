//! Leadership-gated execution
//!
//! When the driver runs with redundant controller replicas, the workload is
//! gated behind a distributed lease so that at most one replica is active
//! per lock identity at any time. This module holds the lock identity
//! derivation, the coordinator contract, and the mode-dispatching gate;
//! [`lease`] carries the Lease-backed production coordinator.

mod gate;
mod lease;

pub use gate::LeadershipGate;
pub use lease::LeaseCoordinator;

use crate::error::Result;
use crate::workload::WorkloadRef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Lock Identity
// =============================================================================

/// Name of the distributed lock shared by all replicas of one driver.
///
/// Derived deterministically from the driver's canonical name so every
/// replica, across restarts, contends for the same lease. Opaque once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockIdentity(String);

impl LockIdentity {
    /// Derive the lock identity for a driver name: separator dots become
    /// dashes and the result carries a `driver-` prefix.
    pub fn for_driver(driver_name: &str) -> Self {
        Self(format!("driver-{}", driver_name.replace('.', "-")))
    }

    /// The lock name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Coordinator Contract
// =============================================================================

/// Distributed leadership coordinator.
///
/// Participates in lease-based election among every replica sharing a
/// [`LockIdentity`]. The implementation must invoke the workload at most once
/// per leadership term and only while this process holds the lease, and on
/// losing the lease must stop the workload before another replica can be
/// granted leadership. The call blocks for the remaining process lifetime;
/// returning `Ok` is reserved for shutdown-driven termination, any other
/// return is unrecoverable.
#[async_trait]
pub trait LeadershipCoordinator: Send + Sync {
    async fn run_with_leadership(
        &self,
        lock: &LockIdentity,
        namespace: &str,
        workload: WorkloadRef,
        shutdown: CancellationToken,
    ) -> Result<()>;
}

/// Shared reference to a coordinator
pub type CoordinatorRef = Arc<dyn LeadershipCoordinator>;

/// Binds cluster-client construction to coordinator construction.
///
/// Connecting can fail (client creation is fallible); the gate treats that as
/// fatal without ever invoking a coordinator.
#[async_trait]
pub trait CoordinatorProvider: Send + Sync {
    async fn connect(&self, config: &crate::config::StartupConfig) -> Result<CoordinatorRef>;
}
