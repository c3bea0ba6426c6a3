//! In-memory stand-ins for the store and the sandbox.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use function_store::{Acl, ChunkUploader, DeployChunk, FunctionVersion, VersionLookup};

use crate::{
    context_cache::{
        ContextCache,
        ContextFactory,
        ContextKey,
        ContextRequest,
        ExecutionContext,
        FunctionRequest,
        FunctionResponse,
    },
    function_logger::LogSink,
};

pub fn context_key(version: &str) -> ContextKey {
    ContextKey {
        backend_endpoint: "http://localhost:1337/parse".to_string(),
        app_id: "app-1".to_string(),
        master_key: "master-secret".to_string(),
        version: FunctionVersion::new(version),
        timeout: Duration::from_secs(15),
        memory_limit_mb: 256,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Started(usize),
    Finished(usize),
    Failed(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub code: String,
    pub version: FunctionVersion,
    pub runtime: String,
    pub acl: Acl,
}

/// Scripted version lookups and a recording chunk uploader. Both yield once
/// before answering so that concurrent callers interleave.
#[derive(Default)]
pub struct FakeStore {
    versions: Mutex<VecDeque<Result<Option<FunctionVersion>>>>,
    pub lookups: AtomicUsize,
    fail_upload_attempt: Option<usize>,
    upload_attempts: AtomicUsize,
    pub events: Mutex<Vec<UploadEvent>>,
    pub chunks: Mutex<Vec<StoredChunk>>,
}

impl FakeStore {
    pub fn with_versions(versions: Vec<Result<Option<FunctionVersion>>>) -> Self {
        Self {
            versions: Mutex::new(versions.into()),
            ..Default::default()
        }
    }

    /// Fail the upload attempt with the given zero-based index.
    pub fn failing_upload(attempt: usize) -> Self {
        Self {
            fail_upload_attempt: Some(attempt),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<UploadEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn chunks(&self) -> Vec<StoredChunk> {
        self.chunks.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionLookup for FakeStore {
    async fn latest_version(&self) -> Result<Option<FunctionVersion>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.versions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted version left")))
    }
}

#[async_trait]
impl ChunkUploader for FakeStore {
    async fn upload_chunk(&self, chunk: &DeployChunk<'_>) -> Result<()> {
        let attempt = self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(UploadEvent::Started(attempt));
        tokio::task::yield_now().await;

        if self.fail_upload_attempt == Some(attempt) {
            self.events.lock().unwrap().push(UploadEvent::Failed(attempt));
            return Err(anyhow!("store rejected chunk: status: 500"));
        }

        self.chunks.lock().unwrap().push(StoredChunk {
            code: chunk.code.to_string(),
            version: chunk.version.clone(),
            runtime: chunk.runtime.to_string(),
            acl: chunk.acl.clone(),
        });
        self.events
            .lock()
            .unwrap()
            .push(UploadEvent::Finished(attempt));
        Ok(())
    }
}

/// Answers every request with a fixed response and records what it saw.
pub struct FakeContext {
    pub requests: Mutex<Vec<FunctionRequest>>,
    response: Result<FunctionResponse, String>,
}

impl FakeContext {
    pub fn responding(response: FunctionResponse) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            response: Ok(response),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            response: Err(message.to_string()),
        }
    }

    pub fn requests(&self) -> Vec<FunctionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionContext for FakeContext {
    async fn handle_request(&self, request: FunctionRequest) -> Result<FunctionResponse> {
        self.requests.lock().unwrap().push(request);
        self.response.clone().map_err(|message| anyhow!(message))
    }
}

/// Echoes the function id and body back, for end-to-end style tests.
pub struct EchoContext {
    pub version: FunctionVersion,
}

#[async_trait]
impl ExecutionContext for EchoContext {
    async fn handle_request(&self, request: FunctionRequest) -> Result<FunctionResponse> {
        Ok(FunctionResponse {
            status_code: 200,
            headers: HashMap::from([("x-version".to_string(), self.version.to_string())]),
            body: format!("{}:{}", request.function_id, request.body),
        })
    }
}

/// Counts context builds; the first `fail_first` builds fail.
#[derive(Default)]
pub struct CountingFactory {
    pub builds: AtomicUsize,
    fail_first: usize,
}

impl CountingFactory {
    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContextFactory for CountingFactory {
    async fn create_context(&self, request: &ContextRequest) -> Result<Arc<dyn ExecutionContext>> {
        let build = self.builds.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if build < self.fail_first {
            return Err(anyhow!("sandbox failed to start"));
        }
        Ok(Arc::new(EchoContext {
            version: request.key.version.clone(),
        }))
    }
}

/// Records acquisitions and purge requests, always handing out one context.
pub struct FakeContextCache {
    pub acquired: Mutex<Vec<ContextKey>>,
    pub loggers: Mutex<Vec<Arc<dyn LogSink>>>,
    pub purges: AtomicUsize,
    context: Option<Arc<FakeContext>>,
}

impl FakeContextCache {
    pub fn new(context: Arc<FakeContext>) -> Self {
        Self {
            acquired: Mutex::new(Vec::new()),
            loggers: Mutex::new(Vec::new()),
            purges: AtomicUsize::new(0),
            context: Some(context),
        }
    }

    /// A cache whose every acquisition fails.
    pub fn unavailable() -> Self {
        Self {
            acquired: Mutex::new(Vec::new()),
            loggers: Mutex::new(Vec::new()),
            purges: AtomicUsize::new(0),
            context: None,
        }
    }

    pub fn acquired(&self) -> Vec<ContextKey> {
        self.acquired.lock().unwrap().clone()
    }

    /// Log sinks handed over with each acquisition.
    pub fn loggers(&self) -> Vec<Arc<dyn LogSink>> {
        self.loggers.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContextCache for FakeContextCache {
    async fn acquire_context(&self, request: ContextRequest) -> Result<Arc<dyn ExecutionContext>> {
        self.loggers.lock().unwrap().push(request.logger);
        self.acquired.lock().unwrap().push(request.key);
        match &self.context {
            Some(context) => Ok(context.clone()),
            None => Err(anyhow!("sandbox failed to start")),
        }
    }

    fn schedule_purge(&self) {
        self.purges.fetch_add(1, Ordering::SeqCst);
    }
}
