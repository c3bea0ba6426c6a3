//! REST client for a Parse-compatible backend store.
//!
//! Every request carries the application id and the master key. The master
//! key bypasses record ACLs, which is what allows deploy chunks to be
//! written with an ACL that denies everyone else.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{ChunkUploader, DeployChunk, FunctionVersion, VersionLookup};

/// Store class holding deployed function chunks.
pub const FUNCTION_CLASS: &str = "Ndl_CF";

const APPLICATION_ID_HEADER: &str = "X-Parse-Application-Id";
const MASTER_KEY_HEADER: &str = "X-Parse-Master-Key";

/// Backend identity and credentials.
#[derive(Debug, Clone)]
pub struct ParseStoreConfig {
    pub server_url: String,
    pub app_id: String,
    pub master_key: String,
}

#[derive(Deserialize)]
struct QueryResponse<T> {
    results: Option<Vec<T>>,
}

#[derive(Deserialize)]
struct VersionRecord {
    version: String,
}

/// [`VersionLookup`] and [`ChunkUploader`] over the store's REST API.
#[derive(Clone)]
pub struct ParseStore {
    client: reqwest::Client,
    class_url: Url,
    app_id: String,
    master_key: String,
}

impl ParseStore {
    pub fn new(config: ParseStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Self::with_client(config, client)
    }

    pub fn with_client(config: ParseStoreConfig, client: reqwest::Client) -> Result<Self> {
        let class_url = format!(
            "{}/classes/{}",
            config.server_url.trim_end_matches('/'),
            FUNCTION_CLASS
        );
        let class_url = Url::parse(&class_url)
            .with_context(|| format!("Invalid store server url: {}", config.server_url))?;
        Ok(Self {
            client,
            class_url,
            app_id: config.app_id,
            master_key: config.master_key,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header(APPLICATION_ID_HEADER, &self.app_id)
            .header(MASTER_KEY_HEADER, &self.master_key)
    }
}

#[async_trait]
impl VersionLookup for ParseStore {
    async fn latest_version(&self) -> Result<Option<FunctionVersion>> {
        let response = self
            .authorized(self.client.get(self.class_url.clone()))
            .query(&[("limit", "1"), ("order", "-createdAt"), ("keys", "version")])
            .send()
            .await
            .context("Failed to query latest function version")?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = %status, "Latest version query was not successful");
            return Ok(None);
        }

        let body: QueryResponse<VersionRecord> = response
            .json()
            .await
            .context("Failed to decode latest function version response")?;

        Ok(match body.results {
            Some(mut results) if results.len() == 1 => {
                results.pop().map(|record| FunctionVersion::from(record.version))
            }
            _ => None,
        })
    }
}

#[async_trait]
impl ChunkUploader for ParseStore {
    async fn upload_chunk(&self, chunk: &DeployChunk<'_>) -> Result<()> {
        let response = self
            .authorized(self.client.post(self.class_url.clone()))
            .json(chunk)
            .send()
            .await
            .with_context(|| format!("Failed to upload chunk of version {}", chunk.version))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "store rejected chunk of version {}: status: {}, error: {}",
                chunk.version,
                status,
                body
            ));
        }
        debug!(version = %chunk.version, bytes = chunk.code.len(), "Uploaded deploy chunk");
        Ok(())
    }
}
