//! PowerFlex CSI driver lifecycle orchestrator
//!
//! Selects, deterministically and exactly once per process, which of three
//! mutually exclusive execution modes this driver instance runs, and in the
//! replicated case guarantees that the storage-provisioning workload is
//! active in at most one replica at a time.
//!
//! ```text
//!   StartupOptions::validate ── missing required flag ──► exit 1
//!              │
//!   RunMode::from_env ── X_CSI_MODE=mdm-info ──► PreInitService ──► exit 0/1
//!              │
//!   LeadershipGate::run
//!       ├─ Direct ─────────────────────────────► workload
//!       └─ LeaderElected ──► LeaseCoordinator ──► workload (while leading)
//! ```
//!
//! # Modules
//!
//! - [`config`]: startup parameter validation and driver config params
//! - [`mode`]: run mode selection and the CSI logging policy override
//! - [`preinit`]: one-shot MDM discovery for init containers
//! - [`workload`]: the cancellable workload seam
//! - [`driver`]: the long-running driver shell workload
//! - [`k8s`]: cluster client factory
//! - [`leadership`]: lock identity, coordinator contract, Lease coordinator
//! - [`error`]: fatal error taxonomy

pub mod config;
pub mod driver;
pub mod error;
pub mod k8s;
pub mod leadership;
pub mod mode;
pub mod preinit;
pub mod workload;

// Re-export commonly used types
pub use config::{DriverParams, LogFormat, StartupConfig, StartupOptions};
pub use driver::{DriverShell, LogReloadHandle};
pub use error::{Error, Result};
pub use leadership::{
    CoordinatorProvider, CoordinatorRef, LeadershipCoordinator, LeadershipGate, LeaseCoordinator,
    LockIdentity,
};
pub use mode::RunMode;
pub use preinit::{PreInitReport, PreInitService};
pub use workload::{FnWorkload, Workload, WorkloadRef};

/// Canonical name of the driver as registered with the cluster
pub const DRIVER_NAME: &str = "csi-vxflexos.dellemc.com";

/// Human-readable description of the driver
pub const DRIVER_DESCRIPTION: &str =
    "A PowerFlex Container Storage Interface (CSI) Plugin";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
