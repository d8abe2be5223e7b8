//! TCP → bus direction.
//!
//! [`FrameReader`] turns the raw byte stream of the connected client into
//! frames according to the configured [`Framing`], and [`InboundRelay`]
//! decodes each frame and publishes it on the bus through the
//! [`TopicRegistry`].
//!
//! In [`Framing::PerRead`] mode every successful `read` is handed on as one
//! frame, exactly as legacy simulator clients expect.  A frame that happens
//! to be split across two TCP segments is therefore seen as two (probably
//! malformed) frames; [`Framing::Newline`] fixes that at the cost of
//! requiring a `\n` after every frame.

use std::sync::Arc;

use simrelay_types::{BusMessage, Framing, MessageShape, RelayError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, warn};

use crate::codec::Frame;
use crate::registry::TopicRegistry;

/// Bytes requested per `read` call.
pub const DEFAULT_READ_BUFFER_BYTES: usize = 1024;

/// Longest newline-framed frame accepted (4096-byte packet minus a 16-byte
/// header reservation).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4096 - 16;

/// Splits a client byte stream into raw frames.
pub struct FrameReader<R> {
    reader: R,
    framing: Framing,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    max_frame_bytes: usize,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, framing: Framing, read_buffer_bytes: usize, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            framing,
            chunk: vec![0; read_buffer_bytes.max(1)],
            pending: Vec::new(),
            max_frame_bytes,
            discarding: false,
        }
    }

    /// Wait for the next raw frame.
    ///
    /// Returns `Ok(None)` once the peer has closed its side.  Cancel-safe:
    /// partially received newline frames stay buffered in the reader.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        match self.framing {
            Framing::PerRead => {
                let n = self.reader.read(&mut self.chunk).await?;
                if n == 0 {
                    return Ok(None);
                }
                Ok(Some(self.chunk[..n].to_vec()))
            }
            Framing::Newline => loop {
                if let Some(line) = self.take_line() {
                    return Ok(Some(line));
                }
                let n = self.reader.read(&mut self.chunk).await?;
                if n == 0 {
                    // An unterminated tail still counts as the last frame.
                    if self.discarding || self.pending.is_empty() {
                        self.pending.clear();
                        return Ok(None);
                    }
                    return Ok(Some(std::mem::take(&mut self.pending)));
                }
                self.pending.extend_from_slice(&self.chunk[..n]);
            },
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(pos) = self.pending.iter().position(|b| *b == b'\n') else {
                if self.pending.len() > self.max_frame_bytes {
                    warn!(
                        buffered = self.pending.len(),
                        limit = self.max_frame_bytes,
                        "discarding oversized frame"
                    );
                    self.pending.clear();
                    self.discarding = true;
                }
                return None;
            };

            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if std::mem::take(&mut self.discarding) || line.is_empty() {
                continue;
            }
            if line.len() > self.max_frame_bytes {
                warn!(len = line.len(), limit = self.max_frame_bytes, "discarding oversized frame");
                continue;
            }
            return Some(line);
        }
    }
}

/// Decodes client frames and publishes them on the bus.
#[derive(Clone)]
pub struct InboundRelay {
    registry: Arc<TopicRegistry>,
}

impl InboundRelay {
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self { registry }
    }

    /// Decode `raw` and publish it.  Returns the number of bus receivers
    /// reached.
    ///
    /// # Errors
    ///
    /// * [`RelayError::MalformedFrame`] – `raw` is not a valid frame.
    /// * [`RelayError::UnsupportedTopicShape`] – the topic is declared with a
    ///   shape that cannot be built from wire fields.
    /// * [`RelayError::Bus`] – the bus refused the message.
    pub fn publish_frame(&self, raw: &[u8]) -> Result<usize, RelayError> {
        let frame = Frame::decode(raw)?;
        let publisher = self.registry.resolve_publisher(frame.topic());

        let message = match publisher.shape() {
            MessageShape::PlainText => BusMessage::Text(frame.content()),
            shape => {
                return Err(RelayError::UnsupportedTopicShape {
                    topic: frame.topic().to_string(),
                    shape,
                });
            }
        };
        self.registry.bus().publish(&publisher, message)
    }

    /// Like [`publish_frame`][Self::publish_frame] but reports failures to the
    /// log instead of returning them; the connection is never affected.
    pub fn relay(&self, raw: &[u8]) {
        match self.publish_frame(raw) {
            Ok(receivers) => debug!(bytes = raw.len(), receivers, "published inbound frame"),
            Err(e @ RelayError::MalformedFrame(_)) => {
                error!(error = %e, "Invalid message format. Expected 'topic_name;message_content'.")
            }
            Err(e) => error!(error = %e, "dropping inbound frame"),
        }
    }
}
