//! Warm execution contexts.
//!
//! Preparing a sandbox for a function version is expensive, so contexts are
//! kept alive and reused by every invocation whose [`ContextKey`] matches
//! exactly. [`ContextCache`] is the seam the executor depends on; the
//! sandbox itself is supplied by the host through [`ContextFactory`].

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use function_store::FunctionVersion;
use metrics::FunctionMetrics;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use crate::function_logger::LogSink;

/// Everything that distinguishes one warm context from another.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub backend_endpoint: String,
    pub app_id: String,
    pub master_key: String,
    pub version: FunctionVersion,
    pub timeout: Duration,
    pub memory_limit_mb: u64,
}

impl fmt::Debug for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKey")
            .field("backend_endpoint", &self.backend_endpoint)
            .field("app_id", &self.app_id)
            .field("master_key", &"<redacted>")
            .field("version", &self.version)
            .field("timeout", &self.timeout)
            .field("memory_limit_mb", &self.memory_limit_mb)
            .finish()
    }
}

/// A request for a context; the log sink is not part of the identity.
#[derive(Clone)]
pub struct ContextRequest {
    pub key: ContextKey,
    pub logger: Arc<dyn LogSink>,
}

/// A single function call as seen by the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRequest {
    pub function_id: String,
    pub headers: HashMap<String, String>,
    /// JSON-serialized request body.
    pub body: String,
}

/// The sandbox's answer, passed back to the caller untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// A prepared sandbox able to run functions of one version.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    async fn handle_request(&self, request: FunctionRequest) -> Result<FunctionResponse>;
}

/// Hands out warm contexts and reclaims idle ones.
#[async_trait]
pub trait ContextCache: Send + Sync {
    /// Reuse the context for `request.key` or build a new one.
    async fn acquire_context(&self, request: ContextRequest) -> Result<Arc<dyn ExecutionContext>>;

    /// Record activity so idle contexts are eventually purged. Returns
    /// immediately.
    fn schedule_purge(&self);
}

/// Builds a fresh sandbox for a context request.
#[async_trait]
pub trait ContextFactory: Send + Sync {
    async fn create_context(&self, request: &ContextRequest) -> Result<Arc<dyn ExecutionContext>>;
}

struct WarmContext {
    context: Arc<dyn ExecutionContext>,
    last_used: Instant,
}

struct Inner {
    factory: Arc<dyn ContextFactory>,
    contexts: Mutex<HashMap<ContextKey, WarmContext>>,
    idle_timeout: Duration,
    purge_pending: AtomicBool,
    metrics: FunctionMetrics,
}

/// In-memory [`ContextCache`] with idle-timeout eviction.
///
/// Builds run while the cache lock is held, so concurrent requests for the
/// same missing key produce a single context.
#[derive(Clone)]
pub struct WarmContextCache {
    inner: Arc<Inner>,
}

impl WarmContextCache {
    pub fn new(factory: Arc<dyn ContextFactory>, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                contexts: Mutex::new(HashMap::new()),
                idle_timeout,
                purge_pending: AtomicBool::new(false),
                metrics: FunctionMetrics::new(),
            }),
        }
    }

    /// Number of warm contexts currently held.
    pub async fn len(&self) -> usize {
        self.inner.contexts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ContextCache for WarmContextCache {
    async fn acquire_context(&self, request: ContextRequest) -> Result<Arc<dyn ExecutionContext>> {
        let mut contexts = self.inner.contexts.lock().await;
        if let Some(warm) = contexts.get_mut(&request.key) {
            warm.last_used = Instant::now();
            debug!(version = %request.key.version, "Reusing warm execution context");
            return Ok(warm.context.clone());
        }

        info!(
            version = %request.key.version,
            timeout_secs = request.key.timeout.as_secs(),
            memory_limit_mb = request.key.memory_limit_mb,
            "Building execution context"
        );
        let context = self.inner.factory.create_context(&request).await?;
        self.inner.metrics.contexts_built.add(1, &[]);
        contexts.insert(
            request.key,
            WarmContext {
                context: context.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(context)
    }

    fn schedule_purge(&self) {
        if self.inner.purge_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run_purge_loop().await });
    }
}

impl Inner {
    /// Sleep until the earliest idle deadline, evict, repeat until no
    /// context is left or none can ever become idle. The pending flag is
    /// cleared under the contexts lock so a context inserted afterwards is
    /// always followed by a new loop.
    async fn run_purge_loop(&self) {
        loop {
            let deadline = {
                let contexts = self.contexts.lock().await;
                let oldest = contexts.values().map(|warm| warm.last_used).min();
                // No contexts, or an idle timeout too long to ever elapse.
                match oldest.and_then(|oldest| oldest.checked_add(self.idle_timeout)) {
                    Some(deadline) => deadline,
                    None => {
                        self.purge_pending.store(false, Ordering::Release);
                        return;
                    }
                }
            };
            tokio::time::sleep_until(deadline).await;
            self.purge_idle().await;
        }
    }

    async fn purge_idle(&self) {
        let mut contexts = self.contexts.lock().await;
        let now = Instant::now();
        let before = contexts.len();
        contexts.retain(|_, warm| now.duration_since(warm.last_used) < self.idle_timeout);
        let purged = before - contexts.len();
        if purged > 0 {
            self.metrics.contexts_purged.add(purged as u64, &[]);
            info!(purged, remaining = contexts.len(), "Purged idle execution contexts");
        }
    }
}
