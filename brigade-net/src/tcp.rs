//! Relay-based TCP bus for multi-process fleets.
//!
//! One [`BusRelay`] process accepts client connections and fans every frame
//! out to all other clients; it never inspects frames beyond a size cap.
//! Clients speak newline-delimited JSON frames `{channel, envelope}` and
//! dispatch locally by channel subscription. Reconnection is out of scope:
//! a truck that loses its relay restarts.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use brigade_core::{AgentId, LamportClock};

use crate::envelope::{Codec, CodecError, Envelope, MessageKind};
use crate::transport::{Bus, BusError, Handler};

/// One line on the relay wire: the channel plus the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    channel: String,
    envelope: Envelope,
}

type ClientMap = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<Arc<str>>>>>;

/// The relay: a minimal broadcast hub over TCP.
pub struct BusRelay {
    listener: TcpListener,
    max_frame: usize,
}

impl BusRelay {
    /// Bind the relay listener.
    pub async fn bind(addr: &str) -> Result<Self, BusError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BusError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            max_frame: Codec::DEFAULT_MAX_FRAME,
        })
    }

    /// The address the relay is listening on.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients and relay frames until the process exits.
    pub async fn run(self) -> std::io::Result<()> {
        let clients: ClientMap = Arc::new(Mutex::new(HashMap::new()));
        let mut next_client = 1u64;

        info!(addr = %self.local_addr()?, "bus relay listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let client_id = next_client;
            next_client += 1;
            debug!(%peer, client_id, "client connected");

            let clients = Arc::clone(&clients);
            let max_frame = self.max_frame;
            tokio::spawn(async move {
                relay_client(stream, client_id, clients, max_frame).await;
                debug!(client_id, "client disconnected");
            });
        }
    }
}

async fn relay_client(stream: TcpStream, client_id: u64, clients: ClientMap, max_frame: usize) {
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel::<Arc<str>>();
    clients.lock().insert(client_id, tx);
    tokio::spawn(drain_outbound(rx, write_half));

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.len() > max_frame {
                    warn!(client_id, size = line.len(), "dropping oversized frame");
                    continue;
                }
                let framed: Arc<str> = Arc::from(format!("{line}\n"));
                let peers = clients.lock();
                for (id, tx) in peers.iter() {
                    if *id != client_id {
                        let _ = tx.send(Arc::clone(&framed));
                    }
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    clients.lock().remove(&client_id);
}

async fn drain_outbound(mut rx: mpsc::UnboundedReceiver<Arc<str>>, mut writer: OwnedWriteHalf) {
    while let Some(line) = rx.recv().await {
        if writer.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// A client handle on a [`BusRelay`].
///
/// Publish enqueues to a writer task, so callers never block on the socket.
/// A reader task decodes incoming frames, drops loopback, merges the
/// sender's Lamport timestamp, and invokes the channel's handlers in
/// arrival order.
pub struct TcpBus {
    id: AgentId,
    codec: Codec,
    clock: Arc<LamportClock>,
    outbound: mpsc::UnboundedSender<Arc<str>>,
    handlers: Arc<Mutex<HashMap<String, Vec<Handler>>>>,
    closed: Arc<AtomicBool>,
}

impl TcpBus {
    /// Connect to a relay. Failure here is fatal to the caller.
    pub async fn connect(
        id: AgentId,
        addr: &str,
        clock: Arc<LamportClock>,
    ) -> Result<Arc<Self>, BusError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| BusError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Arc<str>>();
        tokio::spawn(drain_outbound(out_rx, write_half));

        let bus = Arc::new(Self {
            id,
            codec: Codec::new(),
            clock,
            outbound: out_tx,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        });

        let reader_bus = Arc::clone(&bus);
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if reader_bus.closed.load(Ordering::SeqCst) {
                    break;
                }
                reader_bus.dispatch_line(&line);
            }
        });

        Ok(bus)
    }

    fn dispatch_line(&self, line: &str) {
        if line.len() > self.codec.max_frame() {
            warn!(size = line.len(), "dropping oversized frame");
            return;
        }
        let frame: Frame = match serde_json::from_str(line) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                return;
            }
        };
        if frame.envelope.from == self.id {
            return;
        }
        self.clock.receive(frame.envelope.lamport);

        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .get(&frame.channel)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(frame.envelope.clone());
        }
    }
}

impl Bus for TcpBus {
    fn agent_id(&self) -> &AgentId {
        &self.id
    }

    fn publish(&self, channel: &str, kind: MessageKind, payload: Value) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let envelope = Envelope::new(kind, self.id.clone(), self.clock.tick(), payload);
        let line = serde_json::to_string(&Frame {
            channel: channel.to_string(),
            envelope,
        })?;
        if line.len() > self.codec.max_frame() {
            return Err(BusError::Codec(CodecError::FrameTooLarge {
                size: line.len(),
                max: self.codec.max_frame(),
            }));
        }

        self.outbound
            .send(Arc::from(format!("{line}\n")))
            .map_err(|_| BusError::Closed)
    }

    fn subscribe(&self, channel: &str, handler: Handler) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.handlers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.handlers.lock().clear();
    }
}
