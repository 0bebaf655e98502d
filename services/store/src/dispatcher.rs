//! Bounded concurrent recording of incoming events.

use crate::error::ConfigurationError;
use crate::event_recorder::{EventEnvelope, EventRecorder};
use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore};
use tracing::{debug, error, info};

/// Upper bound for `ingest.concurrency`
pub const MAX_CONCURRENCY: usize = 4096;

/// Hands events to spawned recording tasks, at most `concurrency` at a time
pub struct EventDispatcher {
    recorder: Arc<EventRecorder>,
    semaphore: Arc<Semaphore>,
    permits: u32,
}

impl EventDispatcher {
    pub fn new(recorder: Arc<EventRecorder>, concurrency: usize) -> Result<Self, ConfigurationError> {
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(ConfigurationError::InvalidValue {
                key: "ingest.concurrency".to_string(),
                message: format!("must be between 1 and {}", MAX_CONCURRENCY),
            });
        }

        Ok(Self {
            recorder,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            // Bounded by MAX_CONCURRENCY above
            permits: concurrency as u32,
        })
    }

    /// Record `event` on a spawned task once a slot is free
    pub async fn dispatch(&self, event: EventEnvelope) -> Result<(), AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let recorder = self.recorder.clone();

        tokio::spawn(async move {
            let kind = event.kind;
            match recorder.record(event).await {
                Ok(id) => debug!(kind = kind.as_str(), id = %id, "Event recorded"),
                Err(e) => error!(kind = kind.as_str(), error = %e, "Failed to record event"),
            }
            drop(permit);
        });

        Ok(())
    }

    /// Number of events still being recorded
    pub fn in_flight(&self) -> usize {
        self.permits as usize - self.semaphore.available_permits()
    }

    /// Wait until every dispatched event has been recorded
    pub async fn drain(&self) -> Result<(), AcquireError> {
        let in_flight = self.in_flight();
        if in_flight > 0 {
            info!(in_flight = in_flight, "Waiting for in-flight events");
        }

        let _all = self.semaphore.acquire_many(self.permits).await?;
        Ok(())
    }
}
