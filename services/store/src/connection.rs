//! Process-wide store connection.
//!
//! The first caller opens the store and binds every registered model to a
//! [`CollectionAdapter`]; everyone else shares that [`Connection`]. Callers
//! racing on first use wait for the single in-flight attempt instead of
//! opening their own.

use crate::collection::CollectionAdapter;
use crate::config::{BackendKind, DatabaseConfig};
use crate::document_store::DocumentStore;
use crate::error::{ConnectionError, StoreError};
use crate::memory_store::MemoryStore;
use crate::mongo_store::MongoStore;
use crate::registry::ModelRegistry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Opens the underlying document store
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, ConnectionError>;
}

/// Connects to MongoDB using the database configuration
pub struct MongoConnector {
    config: DatabaseConfig,
}

impl MongoConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, ConnectionError> {
        Ok(Arc::new(MongoStore::connect(&self.config).await?))
    }
}

/// Hands out one shared in-process store
#[derive(Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>, ConnectionError> {
        Ok(self.store.clone())
    }
}

/// Pick the connector for the configured backend
pub fn connector_for(config: &DatabaseConfig) -> Arc<dyn Connector> {
    match config.backend {
        BackendKind::Mongodb => Arc::new(MongoConnector::new(config.clone())),
        BackendKind::Memory => Arc::new(MemoryConnector::default()),
    }
}

/// An open store with every model bound to its collection adapter
pub struct Connection {
    store: Arc<dyn DocumentStore>,
    collections: HashMap<String, Arc<CollectionAdapter>>,
}

impl Connection {
    /// Bind every definition in the registry to the store
    pub fn bind(store: Arc<dyn DocumentStore>, registry: &ModelRegistry) -> Self {
        let collections = registry
            .definitions()
            .iter()
            .map(|definition| {
                let adapter = CollectionAdapter::bind(definition.clone(), store.clone());
                (definition.name.clone(), Arc::new(adapter))
            })
            .collect();

        Self { store, collections }
    }

    /// Collection adapter for a logical model name
    pub fn collection(&self, model: &str) -> Result<Arc<CollectionAdapter>, StoreError> {
        self.collections
            .get(model)
            .cloned()
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
    }

    /// Names of the bound models
    pub fn models(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Backend name of the underlying store
    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }
}

/// Lazily opened, process-wide connection
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    registry: Arc<ModelRegistry>,
    connection: OnceCell<Arc<Connection>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            connector,
            registry,
            connection: OnceCell::new(),
        }
    }

    /// The shared connection, opening it on first use
    pub async fn connection(&self) -> Result<Arc<Connection>, ConnectionError> {
        self.connection
            .get_or_try_init(|| async {
                info!("Opening store connection");
                let store = self.connector.connect().await?;
                let connection = Connection::bind(store, &self.registry);
                info!(
                    backend = connection.backend(),
                    models = ?connection.models(),
                    "Store connection established"
                );
                Ok::<_, ConnectionError>(Arc::new(connection))
            })
            .await
            .map(Arc::clone)
    }

    /// Run `callback` with the shared connection
    pub async fn with_connection<F, Fut, T>(&self, callback: F) -> Result<T, ConnectionError>
    where
        F: FnOnce(Arc<Connection>) -> Fut,
        Fut: Future<Output = T>,
    {
        let connection = self.connection().await?;
        Ok(callback(connection).await)
    }

    /// Whether the connection has been opened
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }
}
