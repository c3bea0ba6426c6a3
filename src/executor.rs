use std::{collections::HashMap, sync::Arc};

use function_store::FunctionVersion;
use metrics::FunctionMetrics;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::{
    config::{BackendConfig, ResourceLimits},
    context_cache::{ContextCache, ContextKey, ContextRequest, FunctionRequest, FunctionResponse},
    error::Error,
    function_logger::LogSink,
};

/// An incoming call of a deployed function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionInvocation {
    pub function_id: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Runs single invocations inside contexts obtained from a [`ContextCache`].
pub struct FunctionExecutor {
    backend: BackendConfig,
    context_cache: Arc<dyn ContextCache>,
    logger: Arc<dyn LogSink>,
    metrics: FunctionMetrics,
}

impl FunctionExecutor {
    pub fn new(
        backend: BackendConfig,
        context_cache: Arc<dyn ContextCache>,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            backend,
            context_cache,
            logger,
            metrics: FunctionMetrics::new(),
        }
    }

    fn context_request(
        &self,
        version: &FunctionVersion,
        limits: &ResourceLimits,
    ) -> ContextRequest {
        ContextRequest {
            key: ContextKey {
                backend_endpoint: self.backend.server_url.clone(),
                app_id: self.backend.app_id.clone(),
                master_key: self.backend.master_key.clone(),
                version: version.clone(),
                timeout: limits.timeout,
                memory_limit_mb: limits.memory_limit_mb,
            },
            logger: self.logger.clone(),
        }
    }

    /// Execute `invocation` against `version` and return the context's
    /// response as is. No retries are attempted.
    #[instrument(skip_all, fields(function_id = %invocation.function_id, version = %version))]
    pub async fn execute(
        &self,
        invocation: FunctionInvocation,
        version: &FunctionVersion,
        limits: &ResourceLimits,
    ) -> Result<FunctionResponse, Error> {
        self.metrics.invocations.add(1, &[]);

        let acquire_start = Instant::now();
        let context = self
            .context_cache
            .acquire_context(self.context_request(version, limits))
            .await
            .map_err(|source| {
                self.metrics.invocation_errors.add(1, &[]);
                warn!(error = ?source, "Failed to acquire execution context");
                Error::ContextAcquisition {
                    version: version.clone(),
                    source,
                }
            })?;
        self.metrics
            .context_acquire_latency_seconds
            .record(acquire_start.elapsed().as_secs_f64(), &[]);

        self.context_cache.schedule_purge();

        let FunctionInvocation {
            function_id,
            headers,
            body,
        } = invocation;
        let request = FunctionRequest {
            function_id: function_id.clone(),
            headers,
            body: body.to_string(),
        };

        let run_start = Instant::now();
        let result = context.handle_request(request).await;
        self.metrics
            .invocation_latency_seconds
            .record(run_start.elapsed().as_secs_f64(), &[]);

        match result {
            Ok(response) => {
                debug!(status_code = response.status_code, "Function finished");
                Ok(response)
            }
            Err(source) => {
                self.metrics.invocation_errors.add(1, &[]);
                warn!(error = ?source, "Function invocation failed");
                Err(Error::Invocation {
                    function_id,
                    version: version.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use serde_json::json;

    use super::*;
    use crate::{
        function_logger::{ChannelLogSink, LogEntry, LogLevel},
        testing::{FakeContext, FakeContextCache},
    };

    fn backend() -> BackendConfig {
        BackendConfig {
            server_url: "http://localhost:1337/parse".to_string(),
            app_id: "app-1".to_string(),
            master_key: "master-secret".to_string(),
        }
    }

    fn executor(cache: Arc<FakeContextCache>) -> FunctionExecutor {
        let (sink, _receiver) = ChannelLogSink::channel();
        FunctionExecutor::new(backend(), cache, Arc::new(sink))
    }

    fn ok_response() -> FunctionResponse {
        FunctionResponse {
            status_code: 201,
            headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
            body: "not json, passed through".to_string(),
        }
    }

    fn invocation() -> FunctionInvocation {
        FunctionInvocation {
            function_id: "sendEmail".to_string(),
            headers: HashMap::from([("x-request-id".to_string(), "r-1".to_string())]),
            body: json!({ "to": "someone@example.com" }),
        }
    }

    #[tokio::test]
    async fn test_execute_with_default_limits() {
        let context = Arc::new(FakeContext::responding(ok_response()));
        let cache = Arc::new(FakeContextCache::new(context.clone()));
        let executor = executor(cache.clone());

        let version = FunctionVersion::new("v1");
        let response = executor
            .execute(invocation(), &version, &ResourceLimits::default())
            .await
            .unwrap();
        assert_eq!(response, ok_response());

        let acquired = cache.acquired();
        assert_eq!(acquired.len(), 1);
        assert_eq!(acquired[0].version, version);
        assert_eq!(acquired[0].timeout, Duration::from_secs(15));
        assert_eq!(acquired[0].memory_limit_mb, 256);
        assert_eq!(acquired[0].backend_endpoint, "http://localhost:1337/parse");
        assert_eq!(acquired[0].app_id, "app-1");
        assert_eq!(acquired[0].master_key, "master-secret");
        assert_eq!(cache.purges.load(Ordering::SeqCst), 1);

        let requests = context.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].function_id, "sendEmail");
        assert_eq!(requests[0].headers.get("x-request-id").unwrap(), "r-1");
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body, json!({ "to": "someone@example.com" }));
    }

    #[tokio::test]
    async fn test_execute_uses_given_limits() {
        let context = Arc::new(FakeContext::responding(ok_response()));
        let cache = Arc::new(FakeContextCache::new(context));
        let executor = executor(cache.clone());

        let limits = ResourceLimits {
            timeout: Duration::from_secs(60),
            memory_limit_mb: 1024,
        };
        executor
            .execute(invocation(), &FunctionVersion::new("v2"), &limits)
            .await
            .unwrap();

        let acquired = cache.acquired();
        assert_eq!(acquired[0].timeout, Duration::from_secs(60));
        assert_eq!(acquired[0].memory_limit_mb, 1024);
    }

    #[tokio::test]
    async fn test_context_receives_the_function_logger() {
        let cache = Arc::new(FakeContextCache::new(Arc::new(FakeContext::responding(
            ok_response(),
        ))));
        let (sink, mut receiver) = ChannelLogSink::channel();
        let executor = FunctionExecutor::new(backend(), cache.clone(), Arc::new(sink));

        executor
            .execute(
                invocation(),
                &FunctionVersion::new("v1"),
                &ResourceLimits::default(),
            )
            .await
            .unwrap();

        let loggers = cache.loggers();
        assert_eq!(loggers.len(), 1);
        loggers[0].enqueue(LogLevel::Info, "sandbox ready".to_string());
        assert_eq!(
            receiver.recv().await,
            Some(LogEntry {
                level: LogLevel::Info,
                message: "sandbox ready".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_acquisition_failure_is_surfaced() {
        let cache = Arc::new(FakeContextCache::unavailable());
        let executor = executor(cache.clone());

        let err = executor
            .execute(
                invocation(),
                &FunctionVersion::new("v1"),
                &ResourceLimits::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContextAcquisition { .. }));
        assert_eq!(cache.purges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invocation_failure_is_surfaced() {
        let context = Arc::new(FakeContext::failing("function threw"));
        let cache = Arc::new(FakeContextCache::new(context.clone()));
        let executor = executor(cache.clone());

        let err = executor
            .execute(
                invocation(),
                &FunctionVersion::new("v1"),
                &ResourceLimits::default(),
            )
            .await
            .unwrap_err();
        match err {
            Error::Invocation {
                function_id,
                version,
                ..
            } => {
                assert_eq!(function_id, "sendEmail");
                assert_eq!(version, FunctionVersion::new("v1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(cache.purges.load(Ordering::SeqCst), 1);
        assert_eq!(context.requests().len(), 1);
    }
}
