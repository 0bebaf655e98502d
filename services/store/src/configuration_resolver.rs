//! Ping configuration fingerprinting.
//!
//! Many devices of the same class report the same image, vendor and product.
//! Each ping is mapped onto the single configuration document for its class,
//! so the ping log stores a reference instead of repeating identity fields.

use crate::collection::StorageCollection;
use crate::config::FingerprintConfig;
use crate::connection::Connection;
use crate::document_store::{DocumentId, Record};
use crate::error::StoreError;
use crate::registry::CONFIGURATION;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::trace;

/// Field whose `false` value is equivalent to its absence
const DUALBOOT_FIELD: &str = "dualboot";

/// Versioned set of fields that never distinguish configurations
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintPolicy {
    /// `count` and `release`
    V1,
    /// `count`, `country` and `release`
    #[default]
    V2,
}

impl FingerprintPolicy {
    pub fn ignored_fields(&self) -> &'static [&'static str] {
        match self {
            FingerprintPolicy::V1 => &["count", "release"],
            FingerprintPolicy::V2 => &["count", "country", "release"],
        }
    }
}

/// Resolves ping-like records to configuration identifiers
#[derive(Debug, Clone)]
pub struct ConfigurationResolver {
    ignored_fields: BTreeSet<String>,
}

impl Default for ConfigurationResolver {
    fn default() -> Self {
        Self::with_policy(FingerprintPolicy::default())
    }
}

impl ConfigurationResolver {
    /// Resolver ignoring an explicit set of fields
    pub fn new<I, S>(ignored_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored_fields: ignored_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_policy(policy: FingerprintPolicy) -> Self {
        Self::new(policy.ignored_fields().iter().copied())
    }

    pub fn from_config(config: &FingerprintConfig) -> Self {
        match config.ignored_fields {
            Some(ref fields) => Self::new(fields.iter().cloned()),
            None => Self::with_policy(config.policy),
        }
    }

    /// Fields removed before fingerprinting
    pub fn ignored_fields(&self) -> &BTreeSet<String> {
        &self.ignored_fields
    }

    /// The identity-bearing part of a record
    pub fn fingerprint(&self, record: &Record) -> Record {
        let mut configuration = record.clone();
        configuration.retain(|field, _| !self.ignored_fields.contains(field));

        if configuration.get(DUALBOOT_FIELD) == Some(&Value::Bool(false)) {
            configuration.remove(DUALBOOT_FIELD);
        }

        configuration
    }

    /// Resolve a record to its configuration id using the connection's
    /// Configuration collection
    pub async fn resolve(
        &self,
        connection: &Connection,
        record: &Record,
    ) -> Result<DocumentId, StoreError> {
        let configurations = connection.collection(CONFIGURATION)?;
        self.resolve_in(configurations.as_ref(), record).await
    }

    /// Resolve a record against an explicit configuration collection
    pub async fn resolve_in(
        &self,
        configurations: &dyn StorageCollection,
        record: &Record,
    ) -> Result<DocumentId, StoreError> {
        let configuration = self.fingerprint(record);
        trace!(configuration = ?configuration, "Trying to find config id");
        configurations.upsert(configuration).await
    }
}
