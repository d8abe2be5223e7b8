//! Bus → TCP direction.
//!
//! One task per configured [`SubscriptionEntry`] drains its
//! [`BusSubscription`] and hands every message to [`OutboundRelay::relay`],
//! which turns it into a [`Frame`] and writes it to whatever client the
//! [`ClientSlot`] currently holds.  Nothing is buffered or retried: with no
//! client the message is dropped and counted by the [`LivenessMonitor`].
//!
//! [`SubscriptionEntry`]: simrelay_types::SubscriptionEntry

use std::sync::Arc;

use simrelay_types::{BusMessage, Framing, MessageShape, RelayError, StructuredShape};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bus::BusSubscription;
use crate::codec::Frame;
use crate::connection::ClientSlot;
use crate::liveness::LivenessMonitor;
use crate::shutdown::ShutdownSignal;

pub struct OutboundRelay {
    slot: Arc<ClientSlot>,
    liveness: LivenessMonitor,
    framing: Framing,
}

impl OutboundRelay {
    pub fn new(slot: Arc<ClientSlot>, liveness: LivenessMonitor, framing: Framing) -> Self {
        Self {
            slot,
            liveness,
            framing,
        }
    }

    /// Build the wire frame for `message` received on `topic`.
    ///
    /// GPS fixes become `[latitude, longitude]`; text becomes a single
    /// field.  Floats use Rust's shortest round-trip formatting with a
    /// trailing `.0` for whole numbers.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnsupportedTopicShape`] when the message does not
    /// match the topic's declared `shape`.
    pub fn frame_for(topic: &str, shape: MessageShape, message: &BusMessage) -> Result<Frame, RelayError> {
        let fields = match (shape, message) {
            (
                MessageShape::Structured(StructuredShape::Gps),
                BusMessage::GpsFix {
                    latitude,
                    longitude,
                },
            ) => vec![format!("{latitude:?}"), format!("{longitude:?}")],
            (MessageShape::PlainText, BusMessage::Text(text)) => vec![text.clone()],
            _ => {
                return Err(RelayError::UnsupportedTopicShape {
                    topic: topic.to_string(),
                    shape: message.shape(),
                });
            }
        };
        Frame::new(topic, fields)
    }

    /// Encode `message` and write it to the connected client.
    ///
    /// # Errors
    ///
    /// * [`RelayError::NoActiveClient`] – nobody connected; counted as a miss.
    /// * [`RelayError::SendFailure`] – the socket write failed.
    /// * [`RelayError::UnsupportedTopicShape`] / [`RelayError::MalformedFrame`]
    ///   – the message could not be framed.
    pub async fn relay(&self, topic: &str, shape: MessageShape, message: &BusMessage) -> Result<(), RelayError> {
        let frame = Self::frame_for(topic, shape, message)?;
        match self.slot.send(&frame.encode(self.framing)).await {
            Ok(()) => {
                self.liveness.record_delivery();
                Ok(())
            }
            Err(RelayError::NoActiveClient) => {
                self.liveness.record_miss();
                Err(RelayError::NoActiveClient)
            }
            Err(e) => Err(e),
        }
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    /// Spawn the delivery task for one subscription.  The task ends when
    /// `shutdown` fires or the bus closes the subscription.
    pub fn spawn_subscription(
        self: &Arc<Self>,
        mut subscription: BusSubscription,
        mut shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        info!(topic = subscription.topic(), shape = %subscription.shape(), "Subscribed to topic");
        tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = shutdown.wait() => break,
                    next = subscription.recv() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                match relay
                    .relay(subscription.topic(), subscription.shape(), &envelope.message)
                    .await
                {
                    Ok(()) | Err(RelayError::NoActiveClient) => {}
                    Err(e) => error!(
                        topic = subscription.topic(),
                        message_id = %envelope.id,
                        error = %e,
                        "Failed to send message over TCP"
                    ),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simrelay_types::GPS_STATUS_TOPIC;
    use std::time::Duration;

    const GPS: MessageShape = MessageShape::Structured(StructuredShape::Gps);

    #[test]
    fn gps_fix_becomes_two_fields() {
        let frame = OutboundRelay::frame_for(
            GPS_STATUS_TOPIC,
            GPS,
            &BusMessage::GpsFix {
                latitude: 12.3,
                longitude: 45.6,
            },
        )
        .unwrap();
        assert_eq!(frame.encode(Framing::PerRead), b"tower/status/gps;12.3;45.6");
    }

    #[test]
    fn whole_number_coordinates_keep_decimal_point() {
        let frame = OutboundRelay::frame_for(
            GPS_STATUS_TOPIC,
            GPS,
            &BusMessage::GpsFix {
                latitude: -45.0,
                longitude: 0.0,
            },
        )
        .unwrap();
        assert_eq!(frame.fields(), ["-45.0", "0.0"]);
    }

    #[test]
    fn extreme_coordinates_use_compact_exponents() {
        let frame = OutboundRelay::frame_for(
            GPS_STATUS_TOPIC,
            GPS,
            &BusMessage::GpsFix {
                latitude: 1e-7,
                longitude: 1e16,
            },
        )
        .unwrap();
        assert_eq!(frame.fields(), ["1e-7", "1e16"]);
    }

    #[test]
    fn text_becomes_single_field() {
        let frame = OutboundRelay::frame_for(
            "my_ros2_topic",
            MessageShape::PlainText,
            &BusMessage::Text("a;b".to_string()),
        )
        .unwrap();
        assert_eq!(frame.fields(), ["a;b"]);
        assert_eq!(frame.encode(Framing::Newline), b"my_ros2_topic;a;b\n");
    }

    #[test]
    fn shape_mismatch_is_unsupported() {
        let result = OutboundRelay::frame_for(GPS_STATUS_TOPIC, GPS, &BusMessage::Text("x".into()));
        assert!(matches!(result, Err(RelayError::UnsupportedTopicShape { .. })));
    }

    #[tokio::test]
    async fn misses_without_client_feed_the_liveness_monitor() {
        let slot = Arc::new(ClientSlot::new(Duration::from_secs(1)));
        let relay = OutboundRelay::new(slot, LivenessMonitor::new(60), Framing::PerRead);
        let message = BusMessage::Text("hello".to_string());

        for _ in 0..59 {
            let result = relay.relay("my_ros2_topic", MessageShape::PlainText, &message).await;
            assert_eq!(result, Err(RelayError::NoActiveClient));
        }
        assert_eq!(relay.liveness().misses(), 59);

        // The 60th miss closes the window.
        let _ = relay.relay("my_ros2_topic", MessageShape::PlainText, &message).await;
        assert_eq!(relay.liveness().misses(), 0);
        let _ = relay.relay("my_ros2_topic", MessageShape::PlainText, &message).await;
        assert_eq!(relay.liveness().misses(), 1);
    }

    #[tokio::test]
    async fn unframeable_message_is_not_counted_as_miss() {
        let slot = Arc::new(ClientSlot::new(Duration::from_secs(1)));
        let relay = OutboundRelay::new(slot, LivenessMonitor::default(), Framing::PerRead);
        let result = relay.relay(GPS_STATUS_TOPIC, GPS, &BusMessage::Text("x".into())).await;
        assert!(matches!(result, Err(RelayError::UnsupportedTopicShape { .. })));
        assert_eq!(relay.liveness().misses(), 0);
    }
}
