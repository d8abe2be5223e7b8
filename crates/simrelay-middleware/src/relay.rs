//! [`Relay`] – wires the bus, registry, client slot and tasks together.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use simrelay_types::{Framing, MessageShape, RelayError, StructuredShape, SubscriptionEntry, GPS_STATUS_TOPIC};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapter::MessageBus;
use crate::connection::{ClientSlot, ConnectionManager, ConnectionState, ReaderSettings};
use crate::inbound::{InboundRelay, DEFAULT_MAX_FRAME_BYTES, DEFAULT_READ_BUFFER_BYTES};
use crate::liveness::{LivenessMonitor, DEFAULT_NO_CLIENT_THRESHOLD};
use crate::outbound::OutboundRelay;
use crate::registry::TopicRegistry;
use crate::shutdown::ShutdownSignal;

/// Default listen address of the simulator link.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:65432";

/// Everything [`Relay::start`] needs to know.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub bind_addr: String,
    pub framing: Framing,
    pub read_buffer_bytes: usize,
    pub max_frame_bytes: usize,
    pub write_timeout: Duration,
    pub no_client_threshold: u32,
    /// Bus topics forwarded to the client.
    pub subscriptions: Vec<SubscriptionEntry>,
    /// Declared shapes for topics the client publishes to.  Unlisted topics
    /// are plain text.
    pub topic_shapes: HashMap<String, MessageShape>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        let gps = MessageShape::Structured(StructuredShape::Gps);
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            framing: Framing::default(),
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            write_timeout: Duration::from_secs(1),
            no_client_threshold: DEFAULT_NO_CLIENT_THRESHOLD,
            subscriptions: vec![
                SubscriptionEntry::new("my_ros2_topic", MessageShape::PlainText),
                SubscriptionEntry::new(GPS_STATUS_TOPIC, gps),
            ],
            topic_shapes: HashMap::from([(GPS_STATUS_TOPIC.to_string(), gps)]),
        }
    }
}

/// Entry point of the relay engine.
pub struct Relay;

impl Relay {
    /// Bind the listener, subscribe to every configured topic and spawn the
    /// connection manager.  All tasks stop when `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] when the listen address is unavailable.
    pub async fn start(
        bus: Arc<dyn MessageBus>,
        options: RelayOptions,
        shutdown: ShutdownSignal,
    ) -> Result<RelayHandle, RelayError> {
        let registry = Arc::new(TopicRegistry::new(Arc::clone(&bus), options.topic_shapes.clone()));
        let slot = Arc::new(ClientSlot::new(options.write_timeout));

        let manager = ConnectionManager::bind(
            &options.bind_addr,
            Arc::clone(&slot),
            InboundRelay::new(Arc::clone(&registry)),
            ReaderSettings {
                framing: options.framing,
                read_buffer_bytes: options.read_buffer_bytes,
                max_frame_bytes: options.max_frame_bytes,
            },
        )
        .await?;
        let local_addr = manager.local_addr();
        let state = manager.state();

        let outbound = Arc::new(OutboundRelay::new(
            Arc::clone(&slot),
            LivenessMonitor::new(options.no_client_threshold),
            options.framing,
        ));
        let mut tasks = Vec::with_capacity(options.subscriptions.len() + 1);
        for entry in &options.subscriptions {
            if entry.topic.is_empty() {
                warn!("skipping subscription with an empty topic name");
                continue;
            }
            let subscription = bus.subscribe(&entry.topic, entry.shape);
            tasks.push(outbound.spawn_subscription(subscription, shutdown.clone()));
        }
        tasks.push(tokio::spawn(manager.run(shutdown)));

        info!(addr = %local_addr, subscriptions = tasks.len() - 1, "TCP relay initialized.");
        Ok(RelayHandle {
            local_addr,
            state,
            slot,
            registry,
            tasks,
        })
    }
}

/// Running relay.  Await [`RelayHandle::join`] after triggering shutdown.
pub struct RelayHandle {
    local_addr: SocketAddr,
    state: watch::Receiver<ConnectionState>,
    slot: Arc<ClientSlot>,
    registry: Arc<TopicRegistry>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn slot(&self) -> &Arc<ClientSlot> {
        &self.slot
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Wait for every relay task to finish.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "relay task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::shutdown::{shutdown_channel, ShutdownHandle};
    use simrelay_types::BusMessage;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start(framing: Framing) -> (Arc<EventBus>, RelayHandle, ShutdownHandle) {
        let bus = Arc::new(EventBus::default());
        let options = RelayOptions {
            bind_addr: "127.0.0.1:0".to_string(),
            framing,
            ..RelayOptions::default()
        };
        let (shutdown, signal) = shutdown_channel();
        let handle = Relay::start(bus.clone(), options, signal).await.expect("relay starts");
        (bus, handle, shutdown)
    }

    async fn connect(handle: &RelayHandle) -> TcpStream {
        let client = TcpStream::connect(handle.local_addr()).await.unwrap();
        let mut state = handle.state();
        tokio::time::timeout(
            WAIT,
            state.wait_for(|s| matches!(s, ConnectionState::Connected { .. })),
        )
        .await
        .unwrap()
        .unwrap();
        client
    }

    async fn read_some(client: &mut TcpStream) -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        let n = tokio::time::timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn client_text_frame_is_published_on_the_bus() {
        let (bus, handle, shutdown) = start(Framing::PerRead).await;
        let mut sub = bus.subscribe("my_ros2_topic", MessageShape::PlainText);
        let mut client = connect(&handle).await;

        client.write_all(b"my_ros2_topic;hello world").await.unwrap();
        let envelope = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(envelope.topic, "my_ros2_topic");
        assert_eq!(envelope.message, BusMessage::Text("hello world".to_string()));

        shutdown.trigger();
        tokio::time::timeout(WAIT, handle.join()).await.unwrap();
    }

    #[tokio::test]
    async fn gps_fix_on_the_bus_reaches_the_client() {
        let (bus, handle, shutdown) = start(Framing::PerRead).await;
        let mut client = connect(&handle).await;

        let publisher = bus.create_publisher(GPS_STATUS_TOPIC, MessageShape::Structured(StructuredShape::Gps));
        bus.publish(
            &publisher,
            BusMessage::GpsFix {
                latitude: 12.3,
                longitude: 45.6,
            },
        )
        .unwrap();

        assert_eq!(read_some(&mut client).await, b"tower/status/gps;12.3;45.6");

        shutdown.trigger();
        tokio::time::timeout(WAIT, handle.join()).await.unwrap();
    }

    #[tokio::test]
    async fn subscribed_topic_echoes_client_publications() {
        let (_bus, handle, shutdown) = start(Framing::PerRead).await;
        let mut client = connect(&handle).await;

        client.write_all(b"my_ros2_topic;ping").await.unwrap();
        assert_eq!(read_some(&mut client).await, b"my_ros2_topic;ping");
        assert_eq!(handle.registry().len(), 1);

        shutdown.trigger();
        tokio::time::timeout(WAIT, handle.join()).await.unwrap();
    }

    #[tokio::test]
    async fn newline_framing_round_trips_split_frames() {
        let (bus, handle, shutdown) = start(Framing::Newline).await;
        let mut sub = bus.subscribe("chatter", MessageShape::PlainText);
        let mut client = connect(&handle).await;

        client.write_all(b"chatter;one\nchat").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"ter;two\n").await.unwrap();

        let first = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(first.message, BusMessage::Text("one".to_string()));
        assert_eq!(second.message, BusMessage::Text("two".to_string()));

        let publisher = bus.create_publisher("my_ros2_topic", MessageShape::PlainText);
        bus.publish(&publisher, BusMessage::Text("out".to_string())).unwrap();
        assert_eq!(read_some(&mut client).await, b"my_ros2_topic;out\n");

        shutdown.trigger();
        tokio::time::timeout(WAIT, handle.join()).await.unwrap();
    }

    #[tokio::test]
    async fn sequential_clients_are_served_without_restart() {
        let (bus, handle, shutdown) = start(Framing::PerRead).await;
        let mut sub = bus.subscribe("chatter", MessageShape::PlainText);

        for round in 0..3 {
            let mut client = connect(&handle).await;
            let peer = client.local_addr().unwrap();
            assert_eq!(handle.slot().peer().await, Some(peer));

            client.write_all(format!("chatter;round {round}").as_bytes()).await.unwrap();
            let envelope = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
            assert_eq!(envelope.message, BusMessage::Text(format!("round {round}")));

            drop(client);
            let mut state = handle.state();
            tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Listening))
                .await
                .unwrap()
                .unwrap();
            assert!(!handle.slot().is_connected().await);
        }
        assert_eq!(bus.registrations("chatter"), 1);

        shutdown.trigger();
        tokio::time::timeout(WAIT, handle.join()).await.unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let (_bus, handle, shutdown) = start(Framing::PerRead).await;
        let options = RelayOptions {
            bind_addr: handle.local_addr().to_string(),
            ..RelayOptions::default()
        };
        let (_other, signal) = shutdown_channel();
        let result = Relay::start(Arc::new(EventBus::default()), options, signal).await;
        assert!(matches!(result, Err(RelayError::Bind { .. })));

        shutdown.trigger();
        tokio::time::timeout(WAIT, handle.join()).await.unwrap();
    }
}
