//! The replication host: one socket, one receiver task, and the
//! per-tick update path.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use spire_ecs::{EntityRef, World};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::conn::{ConnectionTable, TIMEOUT};
use crate::diff;
use crate::entity::{Registrations, SpawnEntity, TypeRegistry};
use crate::proto::{EntityTypeId, Sequence, MTU};
use crate::snapshot::SnapshotRing;
use crate::socket::Socket;

/// A replication endpoint.
///
/// Owns the UDP socket, the connection registry and the snapshot
/// history. [`Host::update`] must be called once per game tick on the
/// calling task; all background work is limited to the per-host
/// receiver task and a sender task per connection.
#[derive(Debug)]
pub struct Host {
    socket: Arc<Socket>,
    connections: Arc<ConnectionTable>,
    types: TypeRegistry,
    registrations: Registrations,
    snapshots: SnapshotRing,
    sequence: Sequence,

    shutdown: Arc<Notify>,
    recv_task: Option<JoinHandle<()>>,
}

impl Host {
    /// Binds a UDP socket and starts the receiver task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(Socket::bind(addr)?);
        tracing::info!("bound port {}", socket.local_addr()?.port());

        let connections = Arc::new(ConnectionTable::new());
        let shutdown = Arc::new(Notify::new());

        let recv_task = tokio::task::spawn(run_receiver(
            socket.clone(),
            connections.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            socket,
            connections,
            types: TypeRegistry::new(),
            registrations: Registrations::new(),
            snapshots: SnapshotRing::new(),
            sequence: Sequence::new(0),
            shutdown,
            recv_task: Some(recv_task),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Opens a connection to `addr`.
    ///
    /// Idempotent; a registry without free slots logs and drops the
    /// peer.
    pub fn connect(&self, addr: SocketAddr) {
        let _ = self.connections.find_or_create(addr, &self.socket);
    }

    /// Registers the replicated shape of an entity type.
    pub fn register_entity_type<S>(
        &mut self,
        entity_type: EntityTypeId,
        components: u64,
        replicated: u64,
        spawner: S,
        world: &World,
    ) where
        S: SpawnEntity + 'static,
    {
        self.types
            .register(entity_type, components, replicated, spawner, world);
    }

    /// Registers a local entity for replication to all peers.
    pub fn register_entity(&mut self, world: &World, entity_type: EntityTypeId, entity: EntityRef) {
        self.registrations.register(world, entity_type, entity);
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Runs one replication tick.
    ///
    /// Order matters: idle connections are reclaimed first, then the
    /// world is snapshotted, then every connection is serviced (send
    /// the diffed snapshot, drain the receive queue) in a fixed loop.
    ///
    /// Enqueueing onto a full send queue suspends the update here,
    /// so an unresponsive peer delays connections serviced after it.
    pub async fn update(&mut self, world: &mut World) {
        for conn in self.connections.remove_idle(TIMEOUT) {
            conn.close().await;
        }

        self.snapshots
            .capture(self.sequence, world, &self.types, &self.registrations);

        for conn in self.connections.connections() {
            let (ack_sequence, incoming_sequence) = {
                let state = conn.state.lock();
                (state.ack_sequence, state.incoming_sequence)
            };

            // The slot was just written; it cannot have wrapped.
            let current = self
                .snapshots
                .get(self.sequence)
                .expect("current snapshot missing from ring");

            let packet = diff::pack_packet(
                current,
                &self.snapshots,
                ack_sequence,
                incoming_sequence,
                &self.types,
            );
            conn.send(packet).await;

            while let Some(packet) = conn.try_recv() {
                conn.state.lock().receive(world, &self.types, &packet);
            }
        }

        self.sequence += 1;
    }

    /// Disconnects every peer.
    pub async fn disconnect_all(&self) {
        for conn in self.connections.drain() {
            conn.close().await;
        }
    }

    /// Tears the host down: all connections are closed and the
    /// receiver task is stopped and joined.
    pub async fn shutdown(mut self) {
        self.disconnect_all().await;

        // `notify_one` stores a permit, so the receiver task observes
        // the signal even if it has not been polled yet.
        self.shutdown.notify_one();
        if let Some(task) = self.recv_task.take() {
            let _ = task.await;
        }
    }
}

async fn run_receiver(socket: Arc<Socket>, connections: Arc<ConnectionTable>, shutdown: Arc<Notify>) {
    let shutdown = shutdown.notified();
    tokio::pin!(shutdown);

    let mut buf = [0; MTU];
    loop {
        let (len, addr) = tokio::select! {
            _ = &mut shutdown => break,
            res = socket.recv_from(&mut buf) => match res {
                Ok(res) => res,
                Err(err) => {
                    // A receive error is the end of the socket's life,
                    // distinct from a deliberate shutdown.
                    tracing::error!("receive failed: {}", err);
                    break;
                }
            },
        };

        let Some(conn) = connections.find_or_create(addr, &socket) else {
            continue;
        };

        conn.push_received(buf[..len].to_vec());
    }

    tracing::debug!("receiver exited");
}
