//! Live fan-out of events to per-connection subscribers.

use crate::bus::EventHandler;
use crate::error::Result;
use crate::event::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// Buffer size of each subscriber channel.
pub const SUBSCRIBER_BUFFER: usize = 100;

/// Identifier of a live subscriber.
pub type SubscriberId = u64;

/// Receiving half handed to a live consumer.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    /// This subscriber's ID, used to unsubscribe.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the subscriber has been
    /// removed from the broker and its buffer is empty.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

/// Broker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Current number of subscribers.
    pub current_subscribers: usize,
    /// Total subscribers since start.
    pub total_subscribers: u64,
    /// Total events broadcast since start.
    pub total_events: u64,
    /// Deliveries skipped because a subscriber buffer was full.
    pub dropped_deliveries: u64,
}

/// Distributes events to every live subscriber without blocking.
///
/// Each subscriber has its own bounded buffer. When a buffer is full the
/// event is skipped for that subscriber only.
#[derive(Debug)]
pub struct Broker {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Event>>>,
    buffer: usize,
    next_id: AtomicU64,
    closed: AtomicBool,
    total_events: AtomicU64,
    dropped_deliveries: AtomicU64,
}

impl Broker {
    /// Create a broker with the default per-subscriber buffer.
    pub fn new() -> Self {
        Self::with_buffer(SUBSCRIBER_BUFFER)
    }

    /// Create a broker with a custom per-subscriber buffer.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            total_events: AtomicU64::new(0),
            dropped_deliveries: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber.
    ///
    /// After [`Broker::close`] the returned subscription is already closed.
    pub fn subscribe_client(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);

        let mut subscribers = self.subscribers.write();
        if !self.closed.load(Ordering::Acquire) {
            subscribers.insert(id, sender);
            debug!(subscriber_id = id, "Subscriber registered");
        }

        Subscription { id, receiver }
    }

    /// Remove a subscriber, closing its channel. Returns whether it was
    /// registered.
    pub fn unsubscribe_client(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!(subscriber_id = id, "Subscriber removed");
        }
        removed
    }

    /// Offer an event to every subscriber. Returns the number of subscribers
    /// that accepted it.
    pub fn broadcast(&self, event: &Event) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for (id, sender) in subscribers.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
                        debug!(subscriber_id = id, event_id = event.id(), "Subscriber saturated, event skipped");
                    }
                    Err(TrySendError::Closed(_)) => gone.push(*id),
                }
            }
        }

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in gone {
                subscribers.remove(&id);
            }
        }

        self.total_events.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_id = event.id(),
            event_type = %event.event_type(),
            recipients = delivered,
            "Event broadcast"
        );
        delivered
    }

    /// Close every subscriber channel and refuse new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let count = {
            let mut subscribers = self.subscribers.write();
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        info!(subscribers = count, "Broker closed");
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Broker statistics.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            current_subscribers: self.subscriber_count(),
            total_subscribers: self.next_id.load(Ordering::Relaxed) - 1,
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_deliveries: self.dropped_deliveries.load(Ordering::Relaxed),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for Broker {
    fn handle(&self, event: &Event) -> Result<()> {
        self.broadcast(event);
        Ok(())
    }

    fn name(&self) -> &str {
        "broker"
    }
}
