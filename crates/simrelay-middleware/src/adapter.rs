//! The message-bus boundary.
//!
//! The relay never talks to a middleware runtime directly.  It goes through
//! [`MessageBus`], which exposes exactly the three primitives the relay needs:
//! create a publisher, publish on it, and subscribe to a topic.
//!
//! - [`EventBus`][crate::bus::EventBus] – the in-process implementation used
//!   by the `simrelay` binary and the tests.
//! - A ROS 2 / DDS binding implements the same trait and is handed to
//!   [`Relay::start`][crate::relay::Relay::start] in its place.

use std::sync::Arc;

use simrelay_types::{BusMessage, MessageShape, RelayError};

use crate::bus::BusSubscription;

/// Opaque handle to a bus publisher.
///
/// Handles are cheap to clone.  Two handles compare equal only when they were
/// returned by the same `create_publisher` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherHandle {
    id: u64,
    topic: Arc<str>,
    shape: MessageShape,
}

impl PublisherHandle {
    pub(crate) fn new(id: u64, topic: &str, shape: MessageShape) -> Self {
        Self {
            id,
            topic: Arc::from(topic),
            shape,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn shape(&self) -> MessageShape {
        self.shape
    }
}

/// Every bus binding must implement this trait.
///
/// # Contract
///
/// * `create_publisher` – registers a publisher for `topic` carrying
///   messages of `shape`.  Assumed to always succeed.
///
/// * `publish` – hands `message` to the bus.  Returns the number of local
///   receivers reached; zero receivers is not an error.
///
/// * `subscribe` – returns a live subscription that yields every message
///   published on `topic` from now on.
pub trait MessageBus: Send + Sync {
    fn create_publisher(&self, topic: &str, shape: MessageShape) -> PublisherHandle;

    fn publish(&self, publisher: &PublisherHandle, message: BusMessage) -> Result<usize, RelayError>;

    fn subscribe(&self, topic: &str, shape: MessageShape) -> BusSubscription;
}
