//! Activation Store
//!
//! Storage core for the activation and ping telemetry service. Validated,
//! enriched events are persisted through a uniform collection interface
//! over a pluggable document store, with repeated device configurations
//! collapsed into a single shared record.
//!
//! ## Features
//!
//! - **Static Model Registry**: Activation, Configuration and Ping are
//!   declared once with their fields, indexes and collection name template
//! - **Date-Sharded Collections**: `ping_$DATE` resolves to one physical
//!   collection per UTC day
//! - **Atomic Deduplication**: identical records map to one document even
//!   under concurrent writers
//! - **Configuration Fingerprinting**: pings store a `config_id` instead of
//!   repeating image, vendor and product
//!
//! ## Architecture
//!
//! ```text
//!  Redis lists / NDJSON
//! ┌──────────────┐
//! │ Event        │
//! │ Dispatcher   │
//! └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │ Event        │
//! │ Recorder     │───────────────┐
//! └──────────────┘               │
//!        │                       ▼
//!        │                ┌──────────────┐
//!        │                │ Configuration│
//!        │                │ Resolver     │
//!        │                └──────────────┘
//!        ▼                       │
//! ┌──────────────┐               │
//! │ Collection   │◀──────────────┘
//! │ Adapters     │
//! └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐          ┌──────────────┐
//! │ Document     │─────────▶│ MongoDB /    │
//! │ Store        │          │ Memory       │
//! └──────────────┘          └──────────────┘
//! ```

pub mod collection;
pub mod config;
pub mod configuration_resolver;
pub mod connection;
pub mod dispatcher;
pub mod document_store;
pub mod error;
pub mod event_recorder;
pub mod memory_store;
pub mod mongo_store;
pub mod naming;
pub mod queue_consumer;
pub mod registry;

pub use collection::{CollectionAdapter, FindAllResult, StorageCollection, SyncOptions};
pub use config::{Config, IngestSource};
pub use configuration_resolver::{ConfigurationResolver, FingerprintPolicy};
pub use connection::{connector_for, Connection, ConnectionManager, Connector};
pub use dispatcher::EventDispatcher;
pub use document_store::{DocumentId, DocumentStore, Record};
pub use error::{ConfigurationError, ConnectionError, RecordError, StoreError};
pub use event_recorder::{EventEnvelope, EventKind, EventRecorder};
pub use memory_store::MemoryStore;
pub use mongo_store::MongoStore;
pub use naming::NameTemplate;
pub use queue_consumer::{QueueConsumer, QueueLists};
pub use registry::{ModelDefinition, ModelRegistry};
