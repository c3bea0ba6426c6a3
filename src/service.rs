use std::sync::Arc;

use anyhow::Result;
use function_store::{FunctionStore, FunctionVersion, ParseStore};
use tracing::debug;

use crate::{
    config::{CloudFunctionsConfig, ResourceLimits},
    context_cache::{ContextCache, FunctionResponse},
    deployer::Deployer,
    error::Error,
    executor::{FunctionExecutor, FunctionInvocation},
    function_logger::LogSink,
    version_cache::VersionCache,
};

/// Deploys bundles and runs invocations against the latest or a requested
/// version.
pub struct FunctionService {
    version_cache: VersionCache,
    deployer: Deployer,
    executor: FunctionExecutor,
    limits: ResourceLimits,
}

impl FunctionService {
    pub fn new<S>(
        config: &CloudFunctionsConfig,
        store: Arc<S>,
        context_cache: Arc<dyn ContextCache>,
        logger: Arc<dyn LogSink>,
    ) -> Self
    where
        S: FunctionStore + 'static,
    {
        Self {
            version_cache: VersionCache::new(store.clone()).with_ttl(config.version_cache_ttl()),
            deployer: Deployer::new(store),
            executor: FunctionExecutor::new(config.backend.clone(), context_cache, logger),
            limits: config.function_options.resource_limits(),
        }
    }

    /// Wire the service to the REST store named in `config`.
    pub fn from_config(
        config: &CloudFunctionsConfig,
        context_cache: Arc<dyn ContextCache>,
        logger: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let store = Arc::new(ParseStore::new(config.backend.store_config())?);
        Ok(Self::new(config, store, context_cache, logger))
    }

    pub async fn latest_version(&self) -> Option<FunctionVersion> {
        self.version_cache.get_latest_version().await
    }

    pub async fn deploy(&self, payload: &str, runtime: &str) -> Result<FunctionVersion, Error> {
        self.deployer.deploy(payload, runtime).await
    }

    /// Run `invocation` on `version` if given, otherwise on the latest
    /// deployed version.
    pub async fn invoke(
        &self,
        invocation: FunctionInvocation,
        version: Option<FunctionVersion>,
    ) -> Result<FunctionResponse, Error> {
        let version = match version {
            Some(version) => version,
            None => self
                .latest_version()
                .await
                .ok_or(Error::VersionUnavailable)?,
        };
        debug!(function_id = %invocation.function_id, version = %version, "Invoking function");
        self.executor
            .execute(invocation, &version, &self.limits)
            .await
    }
}
