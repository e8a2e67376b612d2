//! Peer connections and the fixed-capacity connection registry.
//!
//! There is no handshake: the first packet sent to or received from an
//! address implicitly creates its connection. Each connection owns a
//! dedicated sender task draining a bounded send queue; the shared
//! receiver task feeds its bounded receive queue. A connection dies by
//! explicit disconnect or by the per-tick timeout scan.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spire_ecs::World;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::apply::{self, ShadowTable};
use crate::entity::TypeRegistry;
use crate::proto::{Decode, Header, Sequence};
use crate::socket::Socket;

pub const MAX_CONNECTIONS: usize = 3;
pub const QUEUE_SIZE: usize = 3;
pub const TIMEOUT: Duration = Duration::from_millis(5000);

/// Message on a connection's send queue.
///
/// Shutdown is an explicit variant so "stop" can never be confused
/// with an absent packet.
#[derive(Debug)]
pub(crate) enum SenderCommand {
    Packet(Vec<u8>),
    Shutdown,
}

/// Receiver-side replication state of one connection. Mutated only on
/// the update path.
#[derive(Debug, Default)]
pub struct ConnState {
    /// Last accepted inbound world sequence.
    pub incoming_sequence: Sequence,
    /// The peer's last acknowledged outbound world sequence.
    pub ack_sequence: Sequence,
    pub shadows: ShadowTable,
}

impl ConnState {
    pub fn new() -> Self {
        Self {
            incoming_sequence: Sequence::NONE,
            ack_sequence: Sequence::NONE,
            shadows: ShadowTable::new(),
        }
    }

    /// Handles one inbound packet: duplicate/out-of-order rejection,
    /// sequence bookkeeping and diff application.
    ///
    /// Returns `false` if the packet was discarded.
    pub fn receive(&mut self, world: &mut World, types: &TypeRegistry, packet: &[u8]) -> bool {
        let header = match Header::decode(packet) {
            Ok(header) => header,
            Err(err) => {
                tracing::debug!("discarding malformed packet: {}", err);
                return false;
            }
        };

        // Latest wins; there is no reordering buffer.
        if header.sequence <= self.incoming_sequence {
            tracing::trace!(
                "discarding stale packet {} (last accepted {})",
                header.sequence,
                self.incoming_sequence,
            );
            #[cfg(feature = "log-dropped-packets")]
            tracing::trace!("dropped packet payload: {:?}", packet);
            return false;
        }

        self.incoming_sequence = header.sequence;
        self.ack_sequence = header.ack_sequence;

        apply::apply(
            world,
            types,
            &mut self.shadows,
            header.sequence,
            &packet[Header::SIZE..],
        );

        true
    }
}

#[derive(Debug)]
pub struct Connection {
    addr: SocketAddr,
    pub state: Mutex<ConnState>,
    last_recv: Mutex<Instant>,

    send_tx: mpsc::Sender<SenderCommand>,
    recv_tx: mpsc::Sender<Vec<u8>>,
    recv_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    sender_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    fn new(addr: SocketAddr, socket: Arc<Socket>) -> Self {
        let (send_tx, send_rx) = mpsc::channel(QUEUE_SIZE);
        let (recv_tx, recv_rx) = mpsc::channel(QUEUE_SIZE);

        let sender_task = tokio::task::spawn(run_sender(socket, addr, send_rx));

        Self {
            addr,
            state: Mutex::new(ConnState::new()),
            last_recv: Mutex::new(Instant::now()),
            send_tx,
            recv_tx,
            recv_rx: Mutex::new(recv_rx),
            sender_task: Mutex::new(Some(sender_task)),
        }
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queues a packet for the sender task.
    ///
    /// Blocks while the bounded send queue is full; a slow peer
    /// backpressures the caller.
    pub async fn send(&self, packet: Vec<u8>) {
        if self.send_tx.send(SenderCommand::Packet(packet)).await.is_err() {
            tracing::debug!("send queue of {} closed, dropping packet", self.addr);
        }
    }

    /// Pops the next received packet without blocking.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.recv_rx.lock().try_recv().ok()
    }

    /// Hands an inbound datagram to this connection. Called by the
    /// receiver task; never blocks, a full queue drops the packet.
    pub(crate) fn push_received(&self, packet: Vec<u8>) {
        *self.last_recv.lock() = Instant::now();

        if self.recv_tx.try_send(packet).is_err() {
            tracing::debug!("receive queue of {} full, dropping packet", self.addr);
        }
    }

    pub fn idle_time(&self) -> Duration {
        self.last_recv.lock().elapsed()
    }

    /// Stops the sender task and waits for it to exit.
    pub async fn close(&self) {
        let _ = self.send_tx.send(SenderCommand::Shutdown).await;

        let task = self.sender_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn run_sender(socket: Arc<Socket>, addr: SocketAddr, mut rx: mpsc::Receiver<SenderCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SenderCommand::Packet(packet) => {
                if let Err(err) = socket.send_to(&packet, addr).await {
                    tracing::error!("failed to send to {}: {}", addr, err);
                    break;
                }
            }
            SenderCommand::Shutdown => break,
        }
    }

    tracing::debug!("sender for {} exited", addr);
}

/// The fixed-capacity table of peer connections, keyed by address.
///
/// The mutex guards table membership only; per-connection queues are
/// independently thread-safe and are never touched under this lock.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    slots: Mutex<[Option<Arc<Connection>>; MAX_CONNECTIONS]>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([const { None }; MAX_CONNECTIONS]),
        }
    }

    /// The connection for `addr`, creating it in the first free slot
    /// if it does not exist.
    ///
    /// Returns `None` when the table is full; callers treat an
    /// exhausted registry as a dropped peer.
    pub fn find_or_create(&self, addr: SocketAddr, socket: &Arc<Socket>) -> Option<Arc<Connection>> {
        let mut slots = self.slots.lock();

        for slot in slots.iter().flatten() {
            if slot.addr == addr {
                return Some(slot.clone());
            }
        }

        for slot in slots.iter_mut() {
            if slot.is_none() {
                tracing::info!("new connection to {}", addr);
                let conn = Arc::new(Connection::new(addr, socket.clone()));
                *slot = Some(conn.clone());
                return Some(conn);
            }
        }

        tracing::warn!("too many connections, dropping {}", addr);
        None
    }

    pub fn get(&self, addr: SocketAddr) -> Option<Arc<Connection>> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .find(|conn| conn.addr == addr)
            .cloned()
    }

    /// All current connections, in slot order.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    /// Removes connections idle longer than `timeout` from the table.
    ///
    /// The removed connections are returned so the caller can tear
    /// them down outside the registry lock.
    pub fn remove_idle(&self, timeout: Duration) -> Vec<Arc<Connection>> {
        let mut removed = Vec::new();

        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if let Some(conn) = slot {
                if conn.idle_time() > timeout {
                    tracing::info!("disconnecting idle connection {}", conn.addr);
                    removed.push(slot.take().unwrap());
                }
            }
        }

        removed
    }

    /// Removes every connection from the table.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let mut slots = self.slots.lock();
        slots.iter_mut().filter_map(Option::take).collect()
    }
}
