use crate::config::QueueConfig;
use crate::dispatcher::EventDispatcher;
use crate::document_store::Record;
use crate::error::RecordError;
use crate::event_recorder::{EventEnvelope, EventKind};
use anyhow::{Context, Result};
use redis::aio::ConnectionManager as RedisConnection;
use redis::{ConnectionInfo, IntoConnectionInfo, RedisResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Pause before polling again after a Redis error
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Names of the lists the request layer pushes events onto
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLists {
    /// Queued activations
    pub activation: String,
    /// Queued pings
    pub ping: String,
}

impl QueueLists {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            activation: config.activation_list.clone(),
            ping: config.ping_list.clone(),
        }
    }

    /// Event kind carried by a list
    pub fn kind_of(&self, list: &str) -> Option<EventKind> {
        if list == self.activation {
            Some(EventKind::Activation)
        } else if list == self.ping {
            Some(EventKind::Ping)
        } else {
            None
        }
    }

    fn names(&self) -> Vec<String> {
        vec![self.activation.clone(), self.ping.clone()]
    }
}

/// Decode a queued payload, a bare JSON record, into an envelope
pub fn decode_payload(kind: EventKind, payload: &str) -> Result<EventEnvelope, RecordError> {
    let record: Record = serde_json::from_str(payload)?;
    Ok(EventEnvelope { kind, record })
}

fn connection_info(config: &QueueConfig) -> RedisResult<ConnectionInfo> {
    let mut info = format!("redis://{}:{}/{}", config.host, config.port, config.db)
        .into_connection_info()?;
    info.redis.password = config.password.clone().filter(|p| !p.is_empty());
    Ok(info)
}

/// Consumes queued activations and pings from Redis lists
pub struct QueueConsumer {
    connection: RedisConnection,
    lists: QueueLists,
    poll_timeout_secs: u64,
    dispatcher: Arc<EventDispatcher>,
}

impl QueueConsumer {
    /// Connect to Redis and prepare to consume the configured lists
    pub async fn new(config: &QueueConfig, dispatcher: Arc<EventDispatcher>) -> Result<Self> {
        let client = redis::Client::open(
            connection_info(config).context("Invalid Redis connection settings")?,
        )
        .context("Failed to create Redis client")?;

        let connection = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;

        let lists = QueueLists::from_config(config);

        info!(
            host = %config.host,
            port = config.port,
            activation_list = %lists.activation,
            ping_list = %lists.ping,
            "Consuming Redis event lists"
        );

        Ok(Self {
            connection,
            lists,
            poll_timeout_secs: config.poll_timeout_secs,
            dispatcher,
        })
    }

    /// Pop and record events until dispatching fails
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting Redis queue consumer");

        let mut connection = self.connection.clone();
        let lists = self.lists.names();

        loop {
            // Lists are filled with LPUSH, so popping from the right is FIFO
            let popped: RedisResult<Option<(String, String)>> = redis::cmd("BRPOP")
                .arg(&lists)
                .arg(self.poll_timeout_secs)
                .query_async(&mut connection)
                .await;

            match popped {
                Ok(Some((list, payload))) => self.process(&list, &payload).await?,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "Redis queue error");
                    metrics::counter!("queue.errors").increment(1);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn process(&self, list: &str, payload: &str) -> Result<()> {
        let Some(kind) = self.lists.kind_of(list) else {
            warn!(list = %list, "Popped from an unexpected list");
            return Ok(());
        };

        match decode_payload(kind, payload) {
            Ok(event) => {
                debug!(list = %list, kind = kind.as_str(), "Received queued event");
                metrics::counter!("queue.messages.received", "kind" => kind.as_str()).increment(1);
                self.dispatcher
                    .dispatch(event)
                    .await
                    .context("Event dispatcher closed")?;
            }
            Err(e) => {
                warn!(list = %list, error = %e, "Skipping malformed queued event");
                metrics::counter!("queue.messages.malformed", "kind" => kind.as_str()).increment(1);
            }
        }

        Ok(())
    }
}
