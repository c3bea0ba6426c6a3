//! Cloud function deployment and execution.
//!
//! Function bundles are deployed to the backend store as ordered chunks that
//! share one version identifier ([`deployer`]). Invocations resolve the latest
//! version through a short-lived cache ([`version_cache`]) and run inside warm
//! execution contexts that are reused across calls and purged once idle
//! ([`context_cache`], [`executor`]).

pub mod config;
pub mod context_cache;
pub mod deployer;
pub mod error;
pub mod executor;
pub mod function_logger;
pub mod service;
pub mod tracing;
pub mod version_cache;

#[cfg(test)]
mod testing;

pub use config::{CloudFunctionsConfig, FunctionOptions, ResourceLimits};
pub use context_cache::{
    ContextCache,
    ContextFactory,
    ContextKey,
    ContextRequest,
    ExecutionContext,
    FunctionRequest,
    FunctionResponse,
    WarmContextCache,
};
pub use deployer::Deployer;
pub use error::Error;
pub use executor::{FunctionExecutor, FunctionInvocation};
pub use function_logger::{ChannelLogSink, LogLevel, LogSink};
pub use function_store::{FunctionVersion, ParseStore};
pub use service::FunctionService;
pub use version_cache::VersionCache;
