//! Single-slot cache of the latest deployed function version.
//!
//! Every invocation that does not name a version needs the latest one, so the
//! answer is kept for a short time-to-live instead of querying the store on
//! each call. A failed or empty lookup is never cached and never falls back
//! to an expired entry.
//!
//! Concurrent callers that find the entry missing or expired each query the
//! store; lookups are not coalesced. The last lookup to resolve wins the slot.

use std::{sync::Arc, time::Duration};

use function_store::{FunctionVersion, VersionLookup};
use metrics::FunctionMetrics;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};

pub const DEFAULT_VERSION_TTL: Duration = Duration::from_secs(15);

/// Time source for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by the tokio timer, which tests can pause and advance.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CachedVersion {
    version: FunctionVersion,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl CachedVersion {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

pub struct VersionCache {
    lookup: Arc<dyn VersionLookup>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: Mutex<Option<CachedVersion>>,
    metrics: FunctionMetrics,
}

impl VersionCache {
    pub fn new(lookup: Arc<dyn VersionLookup>) -> Self {
        Self {
            lookup,
            clock: Arc::new(TokioClock),
            ttl: DEFAULT_VERSION_TTL,
            entry: Mutex::new(None),
            metrics: FunctionMetrics::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The latest deployed version, or `None` when it is unknown.
    pub async fn get_latest_version(&self) -> Option<FunctionVersion> {
        {
            let mut entry = self.entry.lock().await;
            match entry.as_ref() {
                Some(cached) if cached.is_fresh(self.clock.now()) => {
                    self.metrics.version_cache_hits.add(1, &[]);
                    return Some(cached.version.clone());
                }
                _ => *entry = None,
            }
        }

        self.metrics.version_cache_misses.add(1, &[]);
        match self.lookup.latest_version().await {
            Ok(Some(version)) => {
                let expires_at = self.clock.now().checked_add(self.ttl);
                *self.entry.lock().await = Some(CachedVersion {
                    version: version.clone(),
                    expires_at,
                });
                debug!(
                    version = %version,
                    ttl_secs = self.ttl.as_secs(),
                    "Cached latest function version"
                );
                Some(version)
            }
            Ok(None) => {
                self.metrics.version_lookup_failures.add(1, &[]);
                debug!("No deployed function version found");
                None
            }
            Err(e) => {
                self.metrics.version_lookup_failures.add(1, &[]);
                warn!(error = ?e, "Latest function version lookup failed");
                None
            }
        }
    }
}
