//! Run mode selection
//!
//! The driver launches in exactly one of three mutually exclusive modes,
//! derived once at startup from a single environment variable and the
//! leader-election flag. The selection never changes afterwards; a process
//! that needs a different mode must be restarted.

use std::env;

/// Environment variable designating the driver operating mode
pub const ENV_CSI_MODE: &str = "X_CSI_MODE";

/// Sentinel value of [`ENV_CSI_MODE`] that selects the one-shot pre-init path
pub const PRE_INIT_SENTINEL: &str = "mdm-info";

/// Debug toggle consumed by the protocol server, forced off
pub const ENV_CSI_DEBUG: &str = "X_CSI_DEBUG";

/// Request logging toggle consumed by the protocol server, forced on
pub const ENV_CSI_REQ_LOGGING: &str = "X_CSI_REQ_LOGGING";

/// Response logging toggle consumed by the protocol server, forced on
pub const ENV_CSI_REP_LOGGING: &str = "X_CSI_REP_LOGGING";

// =============================================================================
// Run Mode
// =============================================================================

/// Execution mode of the current process instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One-shot discovery/setup; terminal, the protocol server never starts
    PreInit,
    /// Run the workload immediately in this process
    Direct,
    /// Gate the workload behind distributed leader election
    LeaderElected,
}

impl RunMode {
    /// Derive the run mode from the mode environment value and the
    /// leader-election flag. Pure; the environment is read by
    /// [`RunMode::from_env`].
    pub fn detect(mode_env: Option<&str>, leader_election: bool) -> Self {
        match mode_env {
            Some(PRE_INIT_SENTINEL) => RunMode::PreInit,
            _ if leader_election => RunMode::LeaderElected,
            _ => RunMode::Direct,
        }
    }

    /// Read [`ENV_CSI_MODE`] once and derive the run mode.
    pub fn from_env(leader_election: bool) -> Self {
        Self::detect(env::var(ENV_CSI_MODE).ok().as_deref(), leader_election)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::PreInit => write!(f, "pre-init"),
            RunMode::Direct => write!(f, "direct"),
            RunMode::LeaderElected => write!(f, "leader-elected"),
        }
    }
}

// =============================================================================
// Logging Policy
// =============================================================================

/// Force the protocol-server logging toggles to fixed values.
///
/// Debug stays off and request/response logging stays on irrespective of what
/// the caller put in the environment; these are not user-configurable.
pub fn enforce_csi_logging_policy() {
    env::set_var(ENV_CSI_DEBUG, "false");
    env::set_var(ENV_CSI_REQ_LOGGING, "true");
    env::set_var(ENV_CSI_REP_LOGGING, "true");
}
