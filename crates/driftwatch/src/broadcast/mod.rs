//! Broadcasting of diagnostic events and layer snapshots.

pub mod event_recorder;
pub mod subscribers;

pub use event_recorder::{DiagnosticEvent, EventRecorder, EventType, InvolvedObject};
pub use subscribers::{DeliveryStats, Payload, SubscriberRegistry, Subscription};
