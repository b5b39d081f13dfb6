//! Post-commit notifications.
//!
//! Delivery is best effort and at most once: a notification is a hint for
//! live clients to re-fetch, never the record of truth. A failed push is
//! logged and dropped; it never changes a job's outcome.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::artifact::ArtifactSnapshot;

pub mod handlers;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// An artifact reached a terminal state.
    ArtifactUpdated(ArtifactSnapshot),
    /// A variation batch finished; keyed by the source letter.
    VariationsReady {
        source_id: Uuid,
        created: Vec<Uuid>,
        failed: u8,
    },
}

impl Notification {
    pub fn artifact_id(&self) -> Uuid {
        match self {
            Notification::ArtifactUpdated(snapshot) => snapshot.artifact_id,
            Notification::VariationsReady { source_id, .. } => *source_id,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::ArtifactUpdated(_) => "artifact_updated",
            Notification::VariationsReady { .. } => "variations_ready",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Fire and forget: failures are logged, never returned.
pub async fn notify(sink: &dyn NotificationSink, notification: Notification) {
    let artifact_id = notification.artifact_id();
    let event = notification.event_name();
    if let Err(e) = sink.publish(notification).await {
        warn!("Dropped {event} notification for {artifact_id}: {e}");
    }
}

/// In-process fan-out to live subscribers, one broadcast channel per artifact.
#[derive(Default)]
pub struct BroadcastHub {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<Notification>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also drops channels whose subscribers have all gone, so the map only
    /// holds artifacts someone is listening to.
    pub fn subscribe(&self, artifact_id: Uuid) -> broadcast::Receiver<Notification> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(artifact_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, artifact_id: Uuid) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&artifact_id)
            .map_or(0, |tx| tx.receiver_count())
    }
}

#[async_trait]
impl NotificationSink for BroadcastHub {
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError> {
        let artifact_id = notification.artifact_id();
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());

        let Some(tx) = channels.get(&artifact_id) else {
            debug!("No live subscribers for {artifact_id}");
            return Ok(());
        };

        if tx.send(notification).is_err() {
            // Every receiver has gone away
            channels.remove(&artifact_id);
        }
        Ok(())
    }
}
