//! `simrelay-middleware` – the relay engine
//!
//! Bridges one simulator client speaking `topic;field[;field...]` over TCP
//! with a topic-based publish/subscribe bus.
//!
//! # Modules
//!
//! - [`adapter`] – [`MessageBus`], the boundary every bus binding implements.
//! - [`bus`] – in-process [`EventBus`] built on Tokio broadcast channels.
//! - [`codec`] – [`Frame`] encoding and decoding.
//! - [`registry`] – [`TopicRegistry`]: lazily created publishers per topic.
//! - [`inbound`] – client frames → bus publications.
//! - [`outbound`] – bus subscriptions → client frames.
//! - [`connection`] – [`ConnectionManager`] and the shared [`ClientSlot`].
//! - [`liveness`] – rate-limited "no client" warnings.
//! - [`shutdown`] – cooperative cancellation shared by every task.
//! - [`relay`] – [`Relay::start`], which wires all of the above.

pub mod adapter;
pub mod bus;
pub mod codec;
pub mod connection;
pub mod inbound;
pub mod liveness;
pub mod outbound;
pub mod registry;
pub mod relay;
pub mod shutdown;

pub use adapter::{MessageBus, PublisherHandle};
pub use bus::{BusSubscription, EventBus};
pub use codec::Frame;
pub use connection::{ClientSlot, ConnectionManager, ConnectionState};
pub use inbound::InboundRelay;
pub use liveness::LivenessMonitor;
pub use outbound::OutboundRelay;
pub use registry::TopicRegistry;
pub use relay::{Relay, RelayHandle, RelayOptions};
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
