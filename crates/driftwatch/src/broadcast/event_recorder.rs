//! Diagnostic events emitted by the controller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::resource::{ResourceKind, StoreObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// The object a diagnostic event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvolvedObject {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub involved_object: InvolvedObject,
    pub reason: String,
    pub message: String,
}

/// Records diagnostic events against resources.
///
/// Every event is logged and sent to current subscribers. Cheap to clone.
#[derive(Clone)]
pub struct EventRecorder {
    sender: broadcast::Sender<DiagnosticEvent>,
}

impl EventRecorder {
    /// Creates a recorder buffering up to `capacity` events per observer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to events recorded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.sender.subscribe()
    }

    /// Records an event about `object`.
    pub fn event<K: StoreObject>(
        &self,
        object: &K,
        event_type: EventType,
        reason: &str,
        message: impl Into<String>,
    ) {
        let meta = object.metadata();
        let event = DiagnosticEvent {
            timestamp: Utc::now(),
            event_type,
            involved_object: InvolvedObject {
                kind: K::KIND,
                namespace: meta.namespace.clone(),
                name: meta.name.clone(),
            },
            reason: reason.to_string(),
            message: message.into(),
        };

        match event_type {
            EventType::Normal => tracing::info!(
                kind = %event.involved_object.kind,
                object = %meta.key(),
                reason,
                "{}",
                event.message
            ),
            EventType::Warning => tracing::warn!(
                kind = %event.involved_object.kind,
                object = %meta.key(),
                reason,
                "{}",
                event.message
            ),
        }

        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Records a `Normal` event.
    pub fn normal<K: StoreObject>(&self, object: &K, reason: &str, message: impl Into<String>) {
        self.event(object, EventType::Normal, reason, message);
    }

    /// Records a `Warning` event.
    pub fn warning<K: StoreObject>(&self, object: &K, reason: &str, message: impl Into<String>) {
        self.event(object, EventType::Warning, reason, message);
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new(1000)
    }
}
