//! Error types for the storage core.
//!
//! Configuration and connection errors are fatal at startup. Store errors
//! are returned to the caller of a single operation and never retried here.

use thiserror::Error;

/// Errors detected while validating static configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Unknown variable ${variable} in name template {template:?}")]
    UnknownVariable { template: String, variable: String },

    #[error("Dangling '$' at offset {offset} in name template {template:?}")]
    DanglingSigil { template: String, offset: usize },

    #[error("Duplicate model name: {0}")]
    DuplicateModel(String),

    #[error("Model {model} indexes unknown field {field}")]
    UnknownIndexField { model: String, field: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while establishing the store connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {backend} store: {message}")]
    Connect {
        backend: &'static str,
        message: String,
    },

    #[error("Invalid connection options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Errors raised by a single storage operation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{operation} on collection {collection} failed: {message}")]
    Operation {
        operation: &'static str,
        collection: String,
        message: String,
    },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Failed to encode document: {0}")]
    Encode(String),

    #[error("Failed to decode document: {0}")]
    Decode(String),
}

impl StoreError {
    /// Build an operation failure for the given collection
    pub fn operation(
        operation: &'static str,
        collection: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        StoreError::Operation {
            operation,
            collection: collection.into(),
            message: message.to_string(),
        }
    }
}

/// Errors raised while recording an event
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
