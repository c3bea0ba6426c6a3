//! Backend store access for deployed cloud functions.
//!
//! Deployed bundles live in the backend store as a series of records that
//! share one version identifier. This crate defines the narrow interfaces the
//! rest of the system uses to talk to that store ([`VersionLookup`] and
//! [`ChunkUploader`]) and a REST implementation, [`ParseStore`].

use std::{collections::BTreeMap, fmt};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod parse;

pub use parse::{ParseStore, ParseStoreConfig, FUNCTION_CLASS};

/// Opaque identifier of one deployed function bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionVersion(String);

impl FunctionVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FunctionVersion {
    fn from(version: String) -> Self {
        Self(version)
    }
}

impl From<&str> for FunctionVersion {
    fn from(version: &str) -> Self {
        Self(version.to_string())
    }
}

/// Per-principal permission in a record ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclPermission {
    pub read: bool,
    pub write: bool,
}

/// Record access control list, keyed by principal (`*` is everyone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl(BTreeMap<String, AclPermission>);

impl Acl {
    /// Denies read and write to every principal. Only the master key, which
    /// bypasses ACLs, can access the record.
    pub fn master_key_only() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "*".to_string(),
            AclPermission {
                read: false,
                write: false,
            },
        );
        Self(entries)
    }

    pub fn get(&self, principal: &str) -> Option<&AclPermission> {
        self.0.get(principal)
    }
}

/// One part of a deployed bundle, as written to the store.
///
/// The store assigns `createdAt` on write; that timestamp is the only thing
/// that orders the chunks of a version, so chunks must be written in order.
#[derive(Debug, Clone, Serialize)]
pub struct DeployChunk<'a> {
    pub code: &'a str,
    pub version: &'a FunctionVersion,
    pub runtime: &'a str,
    #[serde(rename = "ACL")]
    pub acl: Acl,
}

/// Looks up the most recently deployed function version.
#[async_trait]
pub trait VersionLookup: Send + Sync {
    /// Returns `Ok(None)` when the store holds no version or answers with a
    /// non-success status. Transport and decoding failures are errors.
    async fn latest_version(&self) -> Result<Option<FunctionVersion>>;
}

/// Writes a single deploy chunk to the store.
#[async_trait]
pub trait ChunkUploader: Send + Sync {
    /// Resolves once the store has acknowledged the write.
    async fn upload_chunk(&self, chunk: &DeployChunk<'_>) -> Result<()>;
}

/// A store that can both serve version lookups and accept deploy chunks.
pub trait FunctionStore: VersionLookup + ChunkUploader {}

impl<T> FunctionStore for T where T: VersionLookup + ChunkUploader {}
