use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Topic the simulator reads rover position fixes from.
pub const GPS_STATUS_TOPIC: &str = "tower/status/gps";

/// Bus message layouts that have a field mapping onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructuredShape {
    /// `latitude;longitude` position fix.
    Gps,
}

/// Shape of the messages carried on a topic, resolved once from configuration.
///
/// Written in config files as `"plain_text"` or `"gps"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MessageShape {
    /// A single UTF-8 string payload (`std_msgs/String`-style).
    #[default]
    PlainText,
    Structured(StructuredShape),
}

impl fmt::Display for MessageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageShape::PlainText => write!(f, "plain_text"),
            MessageShape::Structured(StructuredShape::Gps) => write!(f, "gps"),
        }
    }
}

impl FromStr for MessageShape {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain_text" | "text" | "string" => Ok(MessageShape::PlainText),
            "gps" => Ok(MessageShape::Structured(StructuredShape::Gps)),
            other => Err(RelayError::Config(format!("unknown message shape '{other}'"))),
        }
    }
}

impl TryFrom<String> for MessageShape {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MessageShape> for String {
    fn from(shape: MessageShape) -> Self {
        shape.to_string()
    }
}

/// How frame boundaries are found on the TCP stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Every successful `read` is one frame and outbound frames carry no
    /// terminator.  This is what existing simulator clients speak.
    #[default]
    PerRead,
    /// Frames are `\n`-terminated lines, buffered across reads.
    Newline,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::PerRead => write!(f, "per_read"),
            Framing::Newline => write!(f, "newline"),
        }
    }
}

impl FromStr for Framing {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_read" => Ok(Framing::PerRead),
            "newline" => Ok(Framing::Newline),
            other => Err(RelayError::Config(format!("unknown framing '{other}'"))),
        }
    }
}

/// A bus topic relayed to the TCP client, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub topic: String,
    #[serde(default)]
    pub shape: MessageShape,
}

impl SubscriptionEntry {
    pub fn new(topic: impl Into<String>, shape: MessageShape) -> Self {
        Self {
            topic: topic.into(),
            shape,
        }
    }
}

/// A typed message travelling over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusMessage {
    Text(String),
    GpsFix { latitude: f64, longitude: f64 },
}

impl BusMessage {
    /// The shape this message conforms to.
    pub fn shape(&self) -> MessageShape {
        match self {
            BusMessage::Text(_) => MessageShape::PlainText,
            BusMessage::GpsFix { .. } => MessageShape::Structured(StructuredShape::Gps),
        }
    }
}

/// Delivery wrapper the bus hands to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub message: BusMessage,
}

impl BusEnvelope {
    pub fn new(topic: impl Into<String>, message: BusMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
            message,
        }
    }
}

/// Every failure the relay can report. Only [`RelayError::Bind`] is fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unsupported message shape {shape} for topic '{topic}'")]
    UnsupportedTopicShape { topic: String, shape: MessageShape },

    #[error("Send to TCP client failed: {0}")]
    SendFailure(String),

    #[error("No active TCP client")]
    NoActiveClient,

    #[error("Failed to bind {addr}: {details}")]
    Bind { addr: String, details: String },

    #[error("Socket I/O error: {0}")]
    Io(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
