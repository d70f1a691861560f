//! Workload seam
//!
//! The orchestrator exposes a single cancellable unit of work representing
//! "start the storage-protocol server and run until cancelled or it exits".
//! Either the direct run path or the leadership coordinator invokes it; at
//! most one live invocation exists process-wide at any time.

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A cancellable, long-running unit of work.
#[async_trait]
pub trait Workload: Send + Sync {
    /// Run until the token is cancelled or the work fatally errors.
    async fn start(&self, shutdown: CancellationToken) -> Result<()>;
}

/// Shared reference to a workload
pub type WorkloadRef = Arc<dyn Workload>;

// =============================================================================
// Closure Adapter
// =============================================================================

/// Adapter turning an async closure into a [`Workload`].
pub struct FnWorkload {
    inner: Box<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>,
}

impl FnWorkload {
    /// Wrap an async closure as a workload.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            inner: Box::new(move |token| Box::pin(f(token))),
        }
    }

    /// Wrap an async closure directly as a [`WorkloadRef`].
    pub fn shared<F, Fut>(f: F) -> WorkloadRef
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl Workload for FnWorkload {
    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        (self.inner)(shutdown).await
    }
}
