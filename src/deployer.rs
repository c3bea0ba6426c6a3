//! Chunked upload of function bundles.
//!
//! The store orders the records of a version only by the creation time it
//! assigns on write, and readers reassemble the bundle in that order. Each
//! chunk is therefore written only after the previous one was acknowledged.
//! Deploys issued through the same [`Deployer`] are serialized so their
//! chunks never interleave.

use std::{borrow::Cow, num::NonZeroUsize, sync::Arc};

use cloudfn_utils::chunk_str;
use function_store::{Acl, ChunkUploader, DeployChunk, FunctionVersion};
use metrics::FunctionMetrics;
use nanoid::nanoid;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

use crate::error::Error;

/// Largest chunk written to the store (100 KiB).
pub const MAX_CHUNK_BYTES: NonZeroUsize = match NonZeroUsize::new(100 * 1024) {
    Some(size) => size,
    None => panic!("chunk size must be non-zero"),
};

const VERSION_ID_LENGTH: usize = 16;

/// Prefix the function runtime expects in front of a serialized component
/// bundle.
pub const EXPORTED_COMPONENTS_PREFIX: &str = "const _exportedComponents = ";

pub struct Deployer {
    uploader: Arc<dyn ChunkUploader>,
    chunk_size: NonZeroUsize,
    bundle_prefix: Option<String>,
    deploy_lock: Mutex<()>,
    metrics: FunctionMetrics,
}

impl Deployer {
    pub fn new(uploader: Arc<dyn ChunkUploader>) -> Self {
        Self {
            uploader,
            chunk_size: MAX_CHUNK_BYTES,
            bundle_prefix: None,
            deploy_lock: Mutex::new(()),
            metrics: FunctionMetrics::new(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: NonZeroUsize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Store `prefix` in front of every deployed payload, e.g.
    /// [`EXPORTED_COMPONENTS_PREFIX`]. An empty prefix stores payloads as is.
    pub fn with_bundle_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.bundle_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Upload `payload` under a new version and return that version.
    ///
    /// The version is only usable once every chunk was acknowledged. On
    /// failure the chunks written so far stay in the store.
    #[instrument(skip_all, fields(runtime = %runtime, payload_bytes = payload.len()))]
    pub async fn deploy(&self, payload: &str, runtime: &str) -> Result<FunctionVersion, Error> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let _guard = self.deploy_lock.lock().await;
        self.metrics.deploys.add(1, &[]);

        let bundle = match &self.bundle_prefix {
            Some(prefix) => Cow::Owned(format!("{prefix}{payload}")),
            None => Cow::Borrowed(payload),
        };

        let version = FunctionVersion::new(nanoid!(VERSION_ID_LENGTH));
        let chunks = chunk_str(&bundle, self.chunk_size);
        let chunk_count = chunks.len();
        info!(version = %version, chunk_count, "Deploying functions");

        for (index, code) in chunks.into_iter().enumerate() {
            let chunk = DeployChunk {
                code,
                version: &version,
                runtime,
                acl: Acl::master_key_only(),
            };
            if let Err(source) = self.uploader.upload_chunk(&chunk).await {
                self.metrics.deploy_failures.add(1, &[]);
                error!(
                    version = %version,
                    chunk_index = index,
                    chunk_count,
                    error = ?source,
                    "Deploy chunk upload failed, version is incomplete"
                );
                return Err(Error::DeployUpload {
                    version,
                    uploaded: index,
                    chunk_count,
                    source,
                });
            }
            self.metrics.deploy_chunks_uploaded.add(1, &[]);
        }

        info!(version = %version, chunk_count, "Deployed functions");
        Ok(version)
    }
}
