//! Domain events emitted after successful writes.
//!
//! Delivery guarantees belong to the publisher. The service logs a failed
//! publish and carries on.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::model::{AvailabilityBlock, BlockId, UserId};

pub const CREATED: &str = "availability.created";
pub const UPDATED: &str = "availability.updated";
pub const DELETED: &str = "availability.deleted";

#[derive(Debug, Clone, PartialEq)]
pub enum AvailabilityEvent {
    Created(AvailabilityBlock),
    Updated(AvailabilityBlock),
    Deleted { id: BlockId, user_id: UserId },
}

impl AvailabilityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created(_) => CREATED,
            Self::Updated(_) => UPDATED,
            Self::Deleted { .. } => DELETED,
        }
    }

    /// JSON body sent alongside the event name.
    pub fn payload(&self) -> Result<Value> {
        Ok(match self {
            Self::Created(block) | Self::Updated(block) => serde_json::to_value(block)?,
            Self::Deleted { id, user_id } => json!({ "id": id, "userId": user_id }),
        })
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &AvailabilityEvent) -> Result<()>;
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, event: &AvailabilityEvent) -> Result<()> {
        let payload = event.payload()?;
        tracing::info!(event = event.name(), %payload, "Availability event");
        Ok(())
    }
}

/// Keeps published events in memory, in publish order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<AvailabilityEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AvailabilityEvent> {
        self.events.lock().await.clone()
    }

    pub async fn names(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.name()).collect()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &AvailabilityEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
