//! Connection lifecycle for the single simulator client.
//!
//! [`ConnectionManager`] owns the listening socket and serves one client at a
//! time: it accepts, installs the client's write half into the shared
//! [`ClientSlot`], runs the inbound read loop until the client goes away, then
//! clears the slot and accepts again.  Because the next `accept` only happens
//! after the previous read loop has returned, at most one client is ever
//! active.
//!
//! ```text
//!            accept            read loop exits
//! Listening ───────▶ Connected ───────────────▶ Listening
//!     │                  │
//!     └──── shutdown ────┴──────────────────▶ Draining
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use simrelay_types::{Framing, RelayError};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{error, info, warn};

use crate::inbound::{FrameReader, InboundRelay};
use crate::shutdown::ShutdownSignal;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Observable state of the [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for a client.
    Listening,
    /// Serving `peer`.
    Connected { peer: SocketAddr },
    /// Shutdown observed; no further clients will be accepted.
    Draining,
}

struct ActiveClient {
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    // Set once a write failed or timed out; the stream may hold a torn frame.
    broken: bool,
    dropped: Arc<Notify>,
}

/// The one place the current client can be reached from.
///
/// The connection manager installs and clears the client; outbound relay
/// tasks only write through [`ClientSlot::send`].  Every access goes through
/// the same async mutex, so a send can never observe a half-cleared client.
pub struct ClientSlot {
    client: Mutex<Option<ActiveClient>>,
    write_timeout: Duration,
}

impl ClientSlot {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            client: Mutex::new(None),
            write_timeout,
        }
    }

    /// Write `bytes` to the current client.
    ///
    /// # Errors
    ///
    /// * [`RelayError::NoActiveClient`] – nobody is connected.
    /// * [`RelayError::SendFailure`] – the write failed or did not finish
    ///   within the write timeout.  A failed write may leave part of a frame
    ///   on the wire, so the client is marked broken: its write side is shut
    ///   down, every later send fails without writing, and the read loop is
    ///   told to drop the connection.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), RelayError> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(RelayError::NoActiveClient)?;
        if client.broken {
            return Err(RelayError::SendFailure(format!(
                "{}: connection dropped after a failed write",
                client.peer
            )));
        }

        let details = match tokio::time::timeout(self.write_timeout, client.writer.write_all(bytes)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("{}: {e}", client.peer),
            Err(_) => format!("{}: write timed out after {:?}", client.peer, self.write_timeout),
        };

        client.broken = true;
        if let Err(e) = client.writer.shutdown().await {
            warn!(peer = %client.peer, error = %e, "error shutting down client socket");
        }
        client.dropped.notify_one();
        Err(RelayError::SendFailure(details))
    }

    /// Peer address of the current client.
    pub async fn peer(&self) -> Option<SocketAddr> {
        self.client.lock().await.as_ref().map(|c| c.peer)
    }

    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    // The returned `Notify` fires when a send breaks this client.  A displaced
    // peer should never exist; it is logged if one does.
    async fn install(&self, peer: SocketAddr, writer: OwnedWriteHalf) -> Arc<Notify> {
        let dropped = Arc::new(Notify::new());
        let stale = self.client.lock().await.replace(ActiveClient {
            peer,
            writer,
            broken: false,
            dropped: Arc::clone(&dropped),
        });
        if let Some(stale) = stale {
            warn!(peer = %peer, stale = %stale.peer, "replaced a client that was never cleared");
        }
        dropped
    }

    async fn clear(&self) -> Option<SocketAddr> {
        let client = self.client.lock().await.take()?;
        let ActiveClient {
            peer,
            mut writer,
            broken,
            ..
        } = client;
        if !broken {
            if let Err(e) = writer.shutdown().await {
                warn!(peer = %peer, error = %e, "error shutting down client socket");
            }
        }
        Some(peer)
    }
}

/// Read-side settings for every accepted client.
#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub framing: Framing,
    pub read_buffer_bytes: usize,
    pub max_frame_bytes: usize,
}

/// Accept-and-serve loop for the simulator link.
pub struct ConnectionManager {
    listener: TcpListener,
    local_addr: SocketAddr,
    slot: Arc<ClientSlot>,
    inbound: InboundRelay,
    reader: ReaderSettings,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] when `addr` cannot be bound.  This is the
    /// only fatal relay error.
    pub async fn bind(
        addr: &str,
        slot: Arc<ClientSlot>,
        inbound: InboundRelay,
        reader: ReaderSettings,
    ) -> Result<Self, RelayError> {
        let bind_error = |details: String| RelayError::Bind {
            addr: addr.to_string(),
            details,
        };
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| bind_error(e.to_string()))?;
        let local_addr = listener.local_addr().map_err(|e| bind_error(e.to_string()))?;
        info!(addr = %local_addr, framing = %reader.framing, "Server listening");

        let (state, _) = watch::channel(ConnectionState::Listening);
        Ok(Self {
            listener,
            local_addr,
            slot,
            inbound,
            reader,
            state,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` fires.  Consumes the manager; the listening
    /// socket is closed on return.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        while !shutdown.is_triggered() {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if shutdown.is_triggered() {
                            break;
                        }
                        self.serve_client(stream, peer, &mut shutdown).await;
                    }
                    Err(e) => {
                        error!(error = %e, "Error in TCP server accept");
                        tokio::select! {
                            _ = shutdown.wait() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                }
            }
        }

        self.state.send_replace(ConnectionState::Draining);
        info!(addr = %self.local_addr, "Shutting down TCP server.");
    }

    async fn serve_client(&self, stream: TcpStream, peer: SocketAddr, shutdown: &mut ShutdownSignal) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "could not disable Nagle");
        }
        let (read_half, write_half) = stream.into_split();
        let dropped = self.slot.install(peer, write_half).await;
        self.state.send_replace(ConnectionState::Connected { peer });
        info!(peer = %peer, "Connected by client");

        let mut reader = FrameReader::new(
            read_half,
            self.reader.framing,
            self.reader.read_buffer_bytes,
            self.reader.max_frame_bytes,
        );
        loop {
            let next = tokio::select! {
                _ = shutdown.wait() => break,
                _ = dropped.notified() => {
                    warn!(peer = %peer, "dropping client after a failed write");
                    break;
                }
                next = reader.next_frame() => next,
            };
            match next {
                Ok(Some(raw)) => self.inbound.relay(&raw),
                Ok(None) => {
                    info!(peer = %peer, "client disconnected");
                    break;
                }
                Err(e) => {
                    error!(peer = %peer, error = %e, "Error handling client");
                    break;
                }
            }
        }

        self.slot.clear().await;
        info!(peer = %peer, "Closing connection");
        if !shutdown.is_triggered() {
            self.state.send_replace(ConnectionState::Listening);
        }
    }
}
