//! Registry of live snapshot subscribers.
//!
//! Each subscriber owns a small bounded queue. Delivery never blocks: when a
//! queue is full that one delivery is dropped for that subscriber only, and
//! the next full snapshot repairs it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default queue capacity of a subscriber.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 10;

/// Serialized snapshot shared between all subscribers.
pub type Payload = Arc<str>;

struct Inner {
    next_id: AtomicU64,
    capacity: usize,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Payload>>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<Payload>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Subscriber registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: usize,
    /// Subscribers whose queue was full.
    pub dropped: usize,
    /// Subscribers that had gone away and were removed.
    pub closed: usize,
}

#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<Inner>,
}

impl SubscriberRegistry {
    /// Creates a registry whose subscribers each queue up to `capacity` payloads.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a new subscriber. Dropping the returned guard unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        self.inner.lock().insert(id, sender);
        log::debug!("Subscriber {} registered", id);
        Subscription {
            id,
            receiver,
            registry: Arc::clone(&self.inner),
        }
    }

    /// Returns the number of subscribers.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offers `payload` to every subscriber without waiting.
    pub fn broadcast(&self, payload: Payload) -> DeliveryStats {
        let mut stats = DeliveryStats::default();
        let mut subscribers = self.inner.lock();
        subscribers.retain(|id, sender| match sender.try_send(Arc::clone(&payload)) {
            Ok(()) => {
                stats.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log::warn!("Subscriber {} is not keeping up, dropping snapshot", id);
                stats.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                stats.closed += 1;
                false
            }
        });
        stats
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// A registered subscriber. Unsubscribes when dropped.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Payload>,
    registry: Arc<Inner>,
}

impl Subscription {
    /// Returns the subscriber id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next snapshot. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.receiver.recv().await
    }

    /// Takes a queued snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
        log::debug!("Subscriber {} unsubscribed", self.id);
    }
}
