use std::{path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use function_store::ParseStoreConfig;
use metrics::TelemetryConfig;
use serde::{Deserialize, Serialize};
use url::Url;

const LOCAL_ENV: &str = "local";
const ENV_PREFIX: &str = "CLOUDFN_";

pub const DEFAULT_FUNCTION_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_FUNCTION_MEMORY_LIMIT_MB: u64 = 256;
pub const DEFAULT_CONTEXT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_VERSION_CACHE_TTL_SECS: u64 = 15;

/// Upper bound for `version_cache_ttl` (one day).
pub const MAX_VERSION_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
/// Upper bound for `function_options.context_idle_timeout` (one week).
pub const MAX_CONTEXT_IDLE_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

fn default_env() -> String {
    LOCAL_ENV.to_string()
}

fn default_server_url() -> String {
    "http://localhost:1337/parse".to_string()
}

fn default_context_idle_timeout() -> u64 {
    DEFAULT_CONTEXT_IDLE_TIMEOUT_SECS
}

fn default_version_cache_ttl() -> u64 {
    DEFAULT_VERSION_CACHE_TTL_SECS
}

/// Identity and credentials of the backend store.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub master_key: String,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("server_url", &self.server_url)
            .field("app_id", &self.app_id)
            .field("master_key", &"<redacted>")
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            app_id: String::new(),
            master_key: String::new(),
        }
    }
}

impl BackendConfig {
    pub fn store_config(&self) -> ParseStoreConfig {
        ParseStoreConfig {
            server_url: self.server_url.clone(),
            app_id: self.app_id.clone(),
            master_key: self.master_key.clone(),
        }
    }
}

/// Limits applied to function execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionOptions {
    /// Execution timeout in seconds. Unset or 0 means the default.
    #[serde(default)]
    pub time_out: Option<u64>,
    /// Memory limit in MB. Unset or 0 means the default.
    #[serde(default)]
    pub memory_limit: Option<u64>,
    /// Seconds an execution context may stay unused before it is purged.
    #[serde(default = "default_context_idle_timeout")]
    pub context_idle_timeout: u64,
}

impl Default for FunctionOptions {
    fn default() -> Self {
        Self {
            time_out: None,
            memory_limit: None,
            context_idle_timeout: DEFAULT_CONTEXT_IDLE_TIMEOUT_SECS,
        }
    }
}

impl FunctionOptions {
    /// Effective limits, with the defaults filled in for unset options.
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            timeout: Duration::from_secs(
                self.time_out
                    .filter(|&secs| secs > 0)
                    .unwrap_or(DEFAULT_FUNCTION_TIMEOUT_SECS),
            ),
            memory_limit_mb: self
                .memory_limit
                .filter(|&mb| mb > 0)
                .unwrap_or(DEFAULT_FUNCTION_MEMORY_LIMIT_MB),
        }
    }

    pub fn context_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.context_idle_timeout)
    }
}

/// Resolved per-invocation resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceLimits {
    pub timeout: Duration,
    pub memory_limit_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        FunctionOptions::default().resource_limits()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudFunctionsConfig {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub function_options: FunctionOptions,
    /// Seconds the latest deployed version is cached for.
    #[serde(default = "default_version_cache_ttl")]
    pub version_cache_ttl: u64,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for CloudFunctionsConfig {
    fn default() -> Self {
        Self {
            env: default_env(),
            backend: BackendConfig::default(),
            function_options: FunctionOptions::default(),
            version_cache_ttl: DEFAULT_VERSION_CACHE_TTL_SECS,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl CloudFunctionsConfig {
    /// Load from an optional YAML file, then apply `CLOUDFN_` environment
    /// overrides (`__` separates nested keys, e.g.
    /// `CLOUDFN_BACKEND__MASTER_KEY`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            figment = figment.merge(Yaml::string(&config_str));
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let config_str = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(config_str: &str) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Yaml::string(config_str))
            .extract()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.backend.server_url)
            .with_context(|| format!("invalid backend server_url: {}", self.backend.server_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(anyhow!(
                "backend server_url must use http or https, got: {}",
                self.backend.server_url
            ));
        }
        if self.backend.app_id.is_empty() {
            return Err(anyhow!("backend app_id must be set"));
        }
        if self.backend.master_key.is_empty() {
            return Err(anyhow!("backend master_key must be set"));
        }
        if self.version_cache_ttl > MAX_VERSION_CACHE_TTL_SECS {
            return Err(anyhow!(
                "version_cache_ttl must be at most {MAX_VERSION_CACHE_TTL_SECS} seconds, got: {}",
                self.version_cache_ttl
            ));
        }
        if self.function_options.context_idle_timeout > MAX_CONTEXT_IDLE_TIMEOUT_SECS {
            return Err(anyhow!(
                "function_options.context_idle_timeout must be at most \
                 {MAX_CONTEXT_IDLE_TIMEOUT_SECS} seconds, got: {}",
                self.function_options.context_idle_timeout
            ));
        }
        Ok(())
    }

    pub fn version_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.version_cache_ttl)
    }

    pub fn structured_logging(&self) -> bool {
        self.env != LOCAL_ENV
    }

    pub fn instance_id(&self) -> String {
        format!("cloudfn-{}-{}", self.env, nanoid::nanoid!(8))
    }
}
