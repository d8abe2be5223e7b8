//! In-process, topic-based publish/subscribe bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Unlike a fixed set of lanes, topics are arbitrary strings and
//! their channels are created the first time anyone publishes or subscribes.
//!
//! Each topic is typed: the first registration fixes its [`MessageShape`] and
//! messages of any other shape are refused at publish time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use simrelay_types::{BusEnvelope, BusMessage, MessageShape, RelayError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::adapter::{MessageBus, PublisherHandle};

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

struct TopicChannel {
    shape: MessageShape,
    sender: broadcast::Sender<BusEnvelope>,
    registrations: usize,
}

/// Shared in-process bus.  Wrap it in an `Arc` to share it between the relay
/// and the rest of the process.
pub struct EventBus {
    capacity: usize,
    topics: Mutex<HashMap<String, TopicChannel>>,
    next_publisher_id: AtomicU64,
}

impl EventBus {
    /// Create a new bus with the given per-topic channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: Mutex::new(HashMap::new()),
            next_publisher_id: AtomicU64::new(1),
        }
    }

    /// Number of publishers ever created for `topic`.
    pub fn registrations(&self, topic: &str) -> usize {
        self.lock()
            .get(topic)
            .map(|channel| channel.registrations)
            .unwrap_or(0)
    }

    /// Declared shape of `topic`, if anyone has touched it yet.
    pub fn topic_shape(&self, topic: &str) -> Option<MessageShape> {
        self.lock().get(topic).map(|channel| channel.shape)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicChannel>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Look up or create the channel for `topic`, returning a sender clone.
    fn channel_for(
        topics: &mut HashMap<String, TopicChannel>,
        capacity: usize,
        topic: &str,
        shape: MessageShape,
    ) -> broadcast::Sender<BusEnvelope> {
        let channel = topics.entry(topic.to_string()).or_insert_with(|| {
            debug!(topic, %shape, "bus topic created");
            TopicChannel {
                shape,
                sender: broadcast::channel(capacity).0,
                registrations: 0,
            }
        });
        if channel.shape != shape {
            warn!(
                topic,
                declared = %channel.shape,
                requested = %shape,
                "topic already exists with a different message shape"
            );
        }
        channel.sender.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageBus for EventBus {
    fn create_publisher(&self, topic: &str, shape: MessageShape) -> PublisherHandle {
        let mut topics = self.lock();
        Self::channel_for(&mut topics, self.capacity, topic, shape);
        if let Some(channel) = topics.get_mut(topic) {
            channel.registrations += 1;
        }
        let id = self.next_publisher_id.fetch_add(1, Ordering::Relaxed);
        PublisherHandle::new(id, topic, shape)
    }

    fn publish(&self, publisher: &PublisherHandle, message: BusMessage) -> Result<usize, RelayError> {
        let sender = {
            let topics = self.lock();
            let channel = topics.get(publisher.topic()).ok_or_else(|| {
                RelayError::Bus(format!("topic '{}' has no registered channel", publisher.topic()))
            })?;
            if message.shape() != channel.shape {
                return Err(RelayError::Bus(format!(
                    "topic '{}' carries {} messages, got {}",
                    publisher.topic(),
                    channel.shape,
                    message.shape()
                )));
            }
            channel.sender.clone()
        };
        // No receivers is a normal condition on a pub/sub bus.
        Ok(sender
            .send(BusEnvelope::new(publisher.topic(), message))
            .unwrap_or(0))
    }

    fn subscribe(&self, topic: &str, shape: MessageShape) -> BusSubscription {
        let mut topics = self.lock();
        let sender = Self::channel_for(&mut topics, self.capacity, topic, shape);
        BusSubscription {
            topic: topic.to_string(),
            shape,
            receiver: sender.subscribe(),
        }
    }
}

/// An async receiver bound to a single bus topic.
///
/// Obtained via [`MessageBus::subscribe`].
pub struct BusSubscription {
    topic: String,
    shape: MessageShape,
    receiver: broadcast::Receiver<BusEnvelope>,
}

impl BusSubscription {
    /// Wrap an existing broadcast receiver, for bus bindings that fan their
    /// own delivery thread into a tokio channel.
    pub fn from_receiver(
        topic: impl Into<String>,
        shape: MessageShape,
        receiver: broadcast::Receiver<BusEnvelope>,
    ) -> Self {
        Self {
            topic: topic.into(),
            shape,
            receiver,
        }
    }

    /// Wait for the next message on this topic.
    ///
    /// Returns `None` when the bus has shut down.  A lagging subscriber logs
    /// the number of dropped messages and keeps going.
    pub async fn recv(&mut self) -> Option<BusEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "bus subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn shape(&self) -> MessageShape {
        self.shape
    }
}
