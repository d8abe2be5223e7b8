//! [`TopicRegistry`] – lazily created bus publishers, one per topic.
//!
//! The registry couples two tables:
//!
//! * a static topic → [`MessageShape`] table taken from configuration, and
//! * a growing topic → [`PublisherHandle`] table filled on first use.
//!
//! Topics missing from the shape table are plain text.  Publishers are never
//! evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use simrelay_types::MessageShape;
use tracing::info;

use crate::adapter::{MessageBus, PublisherHandle};

pub struct TopicRegistry {
    bus: Arc<dyn MessageBus>,
    shapes: HashMap<String, MessageShape>,
    publishers: Mutex<HashMap<String, PublisherHandle>>,
}

impl TopicRegistry {
    /// Create a registry over `bus` with the given declared topic shapes.
    pub fn new(bus: Arc<dyn MessageBus>, shapes: HashMap<String, MessageShape>) -> Self {
        Self {
            bus,
            shapes,
            publishers: Mutex::new(HashMap::new()),
        }
    }

    /// Declared shape of `topic`, defaulting to [`MessageShape::PlainText`].
    pub fn shape_for(&self, topic: &str) -> MessageShape {
        self.shapes.get(topic).copied().unwrap_or_default()
    }

    /// Return the publisher for `topic`, creating it on first use.
    ///
    /// The lock is held across the lookup and the bus registration so two
    /// concurrent callers for the same topic trigger a single registration.
    pub fn resolve_publisher(&self, topic: &str) -> PublisherHandle {
        let mut publishers = self.publishers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = publishers.get(topic) {
            return handle.clone();
        }

        let shape = self.shape_for(topic);
        let handle = self.bus.create_publisher(topic, shape);
        info!(topic, %shape, "created new publisher");
        publishers.insert(topic.to_string(), handle.clone());
        handle
    }

    /// Number of publishers created so far.
    pub fn len(&self) -> usize {
        self.publishers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }
}
