use crate::config::DatabaseConfig;
use crate::document_store::{DocumentId, DocumentStore, Record, ID_FIELD};
use crate::error::{ConnectionError, StoreError};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{
    ClientOptions, Credential, IndexOptions, ReturnDocument, ServerAddress, Tls, TlsOptions,
};
use mongodb::{Client, Database, IndexModel};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Server error code for a unique index violation
const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed document store
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Connect and verify the server answers a `ping`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        let client = Client::with_options(client_options(config))
            .map_err(|e| ConnectionError::InvalidOptions(e.to_string()))?;
        let database = client.database(&config.name);

        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            tls = config.tls,
            "Connecting to MongoDB"
        );

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ConnectionError::Connect {
                backend: "mongodb",
                message: e.to_string(),
            })?;

        info!(database = %config.name, "Connected to MongoDB");

        Ok(Self { database })
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

fn client_options(config: &DatabaseConfig) -> ClientOptions {
    let mut options = ClientOptions::default();
    options.hosts = vec![ServerAddress::Tcp {
        host: config.host.clone(),
        port: Some(config.port),
    }];
    options.app_name = Some(config.app_name.clone());
    options.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
    options.server_selection_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
    options.max_pool_size = Some(config.max_pool_size);

    if let Some(ref username) = config.username {
        options.credential = Some(
            Credential::builder()
                .username(username.clone())
                .password(config.password.clone())
                .source(config.auth_source.clone())
                .build(),
        );
    }

    if config.tls {
        options.tls = Some(Tls::Enabled(TlsOptions::default()));
    }

    options
}

fn encode(document: &Record) -> Result<Document, StoreError> {
    bson::to_document(document).map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode(document: Document) -> Result<Record, StoreError> {
    bson::from_document(document).map_err(|e| StoreError::Decode(e.to_string()))
}

fn is_duplicate_key(error: &MongoError) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY,
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        _ => false,
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    #[instrument(skip(self, document))]
    async fn upsert(
        &self,
        collection: &str,
        id: &DocumentId,
        document: Record,
    ) -> Result<DocumentId, StoreError> {
        let replacement = encode(&document)?;
        let filter = doc! { "_id": id.as_str() };
        let mut retried = false;

        // Two first-time upserts of the same id can race on insert; the loser
        // sees a duplicate key and matches the winner's document on retry.
        let stored = loop {
            let result = self
                .collection(collection)
                .find_one_and_replace(filter.clone(), replacement.clone())
                .upsert(true)
                .return_document(ReturnDocument::After)
                .projection(doc! { "_id": 1 })
                .await;

            match result {
                Err(e) if is_duplicate_key(&e) && !retried => {
                    debug!(collection, "Upsert lost insert race, retrying as update");
                    retried = true;
                }
                other => break other.map_err(|e| StoreError::operation("upsert", collection, e))?,
            }
        };

        Ok(stored
            .as_ref()
            .and_then(|d| d.get_str(ID_FIELD).ok())
            .map(DocumentId::new)
            .unwrap_or_else(|| id.clone()))
    }

    async fn insert(
        &self,
        collection: &str,
        id: &DocumentId,
        document: Record,
    ) -> Result<(), StoreError> {
        let mut encoded = encode(&document)?;
        encoded.insert(ID_FIELD, id.as_str());

        self.collection(collection)
            .insert_one(encoded)
            .await
            .map_err(|e| StoreError::operation("insert", collection, e))?;

        Ok(())
    }

    async fn delete_all(&self, collection: &str) -> Result<u64, StoreError> {
        let result = self
            .collection(collection)
            .delete_many(doc! {})
            .await
            .map_err(|e| StoreError::operation("delete_all", collection, e))?;

        Ok(result.deleted_count)
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        let documents: Vec<Document> = self
            .collection(collection)
            .find(doc! {})
            .await
            .map_err(|e| StoreError::operation("find_all", collection, e))?
            .try_collect()
            .await
            .map_err(|e| StoreError::operation("find_all", collection, e))?;

        documents.into_iter().map(decode).collect()
    }

    async fn create_sparse_index(&self, collection: &str, field: &str) -> Result<(), StoreError> {
        let mut keys = Document::new();
        keys.insert(field, 1);

        let index = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().sparse(true).background(true).build())
            .build();

        self.collection(collection)
            .create_index(index)
            .await
            .map_err(|e| StoreError::operation("create_index", collection, e))?;

        Ok(())
    }
}
