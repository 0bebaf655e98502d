use crate::collection::StorageCollection;
use crate::configuration_resolver::ConfigurationResolver;
use crate::connection::Connection;
use crate::document_store::{DocumentId, Record};
use crate::error::{RecordError, StoreError};
use crate::registry::{ACTIVATION, CONFIGURATION, PING};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Field on a ping holding its configuration's id
pub const CONFIG_ID_FIELD: &str = "config_id";

/// Fields describing the ping itself, never part of a configuration
pub const PING_ONLY_FIELDS: [&str; 3] = [CONFIG_ID_FIELD, "metrics_enabled", "metrics_environment"];

/// Kind of a validated, enriched event
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// First boot of an OS image
    Activation,
    /// Periodic check-in
    Ping,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Activation => "activation",
            EventKind::Ping => "ping",
        }
    }
}

/// An event handed over by the request layer
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub record: Record,
}

impl EventEnvelope {
    /// Parse one line of the ingest stream
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Persists activation and ping events through the bound collections
pub struct EventRecorder {
    connection: Arc<Connection>,
    resolver: ConfigurationResolver,
    /// Fields that identify a configuration, moved off ping records
    identity_fields: BTreeSet<String>,
}

impl EventRecorder {
    pub fn new(
        connection: Arc<Connection>,
        resolver: ConfigurationResolver,
    ) -> Result<Self, StoreError> {
        let identity_fields = connection
            .collection(CONFIGURATION)?
            .model()
            .fields
            .clone();

        Ok(Self {
            connection,
            resolver,
            identity_fields,
        })
    }

    /// Store an event according to its kind
    pub async fn record(&self, event: EventEnvelope) -> Result<DocumentId, RecordError> {
        let result = match event.kind {
            EventKind::Activation => self.record_activation(event.record).await,
            EventKind::Ping => self.record_ping(event.record).await,
        };

        if result.is_err() {
            metrics::counter!("events.failed", "kind" => event.kind.as_str()).increment(1);
        }

        Ok(result?)
    }

    /// Store an activation, returning its document id
    pub async fn record_activation(&self, record: Record) -> Result<DocumentId, StoreError> {
        let id = self.connection.collection(ACTIVATION)?.upsert(record).await?;

        metrics::counter!("events.recorded", "kind" => "activation").increment(1);
        info!(id = %id, "Activation saved");

        Ok(id)
    }

    /// Store a ping, returning the id of its configuration.
    ///
    /// Everything but the ping-only fields is offered to the resolver, whose
    /// ignored-field policy decides what identifies the configuration. The
    /// ping keeps everything but the configuration model's fields.
    pub async fn record_ping(&self, record: Record) -> Result<DocumentId, StoreError> {
        let mut identity = Record::new();
        let mut residual = Record::new();

        for (field, value) in record {
            if !PING_ONLY_FIELDS.contains(&field.as_str()) {
                identity.insert(field.clone(), value.clone());
            }
            if !self.identity_fields.contains(&field) {
                residual.insert(field, value);
            }
        }

        let config_id = self.resolver.resolve(&self.connection, &identity).await?;
        debug!(config_id = %config_id, "Resolved ping configuration");

        residual.insert(CONFIG_ID_FIELD.to_string(), config_id.as_str().into());
        self.connection.collection(PING)?.create(residual).await?;

        metrics::counter!("events.recorded", "kind" => "ping").increment(1);
        info!(config_id = %config_id, "Ping saved");

        Ok(config_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration_resolver::FingerprintPolicy;
    use crate::connection::{ConnectionManager, MemoryConnector};
    use crate::document_store::ID_FIELD;
    use crate::memory_store::MemoryStore;
    use crate::registry::ModelRegistry;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn recorder() -> (EventRecorder, Arc<Connection>) {
        recorder_with(ConfigurationResolver::default()).await
    }

    async fn recorder_with(resolver: ConfigurationResolver) -> (EventRecorder, Arc<Connection>) {
        let manager = ConnectionManager::new(
            Arc::new(MemoryConnector::new(Arc::new(MemoryStore::new()))),
            Arc::new(ModelRegistry::builtin().unwrap()),
        );
        let connection = manager.connection().await.unwrap();
        let recorder = EventRecorder::new(connection.clone(), resolver).unwrap();
        (recorder, connection)
    }

    fn ping_from(country: &str) -> Record {
        record(json!({
            "image": "eos", "vendor": "endless", "product": "pc",
            "release": "5.0", "count": 1, "country": country,
            "metrics_enabled": true, "metrics_environment": "production"
        }))
    }

    #[tokio::test]
    async fn test_ping_stores_reference_not_identity() {
        let (recorder, connection) = recorder().await;

        let config_id = recorder
            .record_ping(record(json!({
                "image": "eos", "vendor": "endless", "product": "pc",
                "release": "5.0", "count": 3, "dualboot": false,
                "country": "KE", "metrics_enabled": true
            })))
            .await
            .unwrap();

        let pings = connection.collection(PING).unwrap().find_and_count_all().await.unwrap();
        assert_eq!(pings.count, 1);

        let ping = &pings.rows[0];
        assert_eq!(ping[CONFIG_ID_FIELD], json!(config_id.as_str()));
        assert_eq!(ping["count"], json!(3));
        assert_eq!(ping["country"], json!("KE"));
        assert_eq!(ping["release"], json!("5.0"));
        assert_eq!(ping["metrics_enabled"], json!(true));
        for field in ["image", "vendor", "product", "dualboot"] {
            assert!(ping.get(field).is_none(), "{} leaked into ping", field);
        }

        let configurations = connection
            .collection(CONFIGURATION)
            .unwrap()
            .find_and_count_all()
            .await
            .unwrap();
        assert_eq!(configurations.count, 1);
        let configuration = &configurations.rows[0];
        assert_eq!(configuration[ID_FIELD], json!(config_id.as_str()));
        assert!(configuration.get("metrics_enabled").is_none());
        assert!(configuration.get("count").is_none());
    }

    #[tokio::test]
    async fn test_repeated_pings_share_configuration() {
        let (recorder, connection) = recorder().await;

        let first = recorder
            .record(EventEnvelope {
                kind: EventKind::Ping,
                record: record(json!({
                    "image": "eos", "vendor": "endless", "product": "pc",
                    "release": "5.0", "count": 3, "dualboot": false
                })),
            })
            .await
            .unwrap();
        let second = recorder
            .record(EventEnvelope {
                kind: EventKind::Ping,
                record: record(json!({
                    "image": "eos", "vendor": "endless", "product": "pc",
                    "release": "5.1", "count": 9
                })),
            })
            .await
            .unwrap();

        assert_eq!(first, second);
        let pings = connection.collection(PING).unwrap().find_and_count_all().await.unwrap();
        assert_eq!(pings.count, 2);
    }

    #[tokio::test]
    async fn test_policy_decides_configuration_identity() {
        let (v1, connection) = recorder_with(ConfigurationResolver::with_policy(FingerprintPolicy::V1)).await;
        let us = v1.record_ping(ping_from("US")).await.unwrap();
        let br = v1.record_ping(ping_from("BR")).await.unwrap();
        assert_ne!(us, br);

        let configurations = connection
            .collection(CONFIGURATION)
            .unwrap()
            .find_and_count_all()
            .await
            .unwrap();
        assert_eq!(configurations.count, 2);
        for configuration in &configurations.rows {
            assert!(configuration.get("country").is_some());
            assert!(configuration.get("metrics_enabled").is_none());
            assert!(configuration.get("metrics_environment").is_none());
        }

        let (v2, _) = recorder_with(ConfigurationResolver::with_policy(FingerprintPolicy::V2)).await;
        let us = v2.record_ping(ping_from("US")).await.unwrap();
        let br = v2.record_ping(ping_from("BR")).await.unwrap();
        assert_eq!(us, br);
    }

    #[tokio::test]
    async fn test_custom_ignored_fields_apply_to_pings() {
        let (recorder, _) = recorder_with(ConfigurationResolver::new(["count", "country"])).await;

        let first = recorder.record_ping(ping_from("US")).await.unwrap();
        let mut other_release = ping_from("US");
        other_release.insert("release".into(), json!("6.0"));
        let second = recorder.record_ping(other_release).await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_activation_is_stored_whole() {
        let (recorder, connection) = recorder().await;
        let activation = record(json!({
            "image": "eos", "vendor": "endless", "product": "pc", "release": "5.0",
            "serial": "ABC123", "live": false, "country": "US",
            "latitude": 40.5, "longitude": -73.5, "created_at": "2024-01-01T00:00:00.000Z"
        }));

        let id = recorder.record_activation(activation.clone()).await.unwrap();
        // Resubmitting the same activation does not duplicate it
        assert_eq!(recorder.record_activation(activation).await.unwrap(), id);

        let rows = connection.collection(ACTIVATION).unwrap().find_and_count_all().await.unwrap();
        assert_eq!(rows.count, 1);
        assert_eq!(rows.rows[0]["serial"], json!("ABC123"));
        assert_eq!(rows.rows[0]["latitude"], json!(40.5));
    }

    #[test]
    fn test_envelope_parsing() {
        let envelope =
            EventEnvelope::parse(r#"{"kind": "ping", "record": {"image": "eos", "count": 1}}"#)
                .unwrap();

        assert_eq!(envelope.kind, EventKind::Ping);
        assert_eq!(envelope.record["count"], json!(1));
        assert!(matches!(
            EventEnvelope::parse(r#"{"kind": "boot", "record": {}}"#),
            Err(RecordError::Malformed(_))
        ));
        assert!(EventEnvelope::parse("not json").is_err());
    }
}
