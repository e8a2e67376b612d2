//! End-to-end replication flow at the state level: snapshot encoder →
//! diff packer → wire bytes → connection state → diff applier.

use spire_ecs::{ComponentId, World};
use spire_net::apply::PacketRecords;
use spire_net::conn::ConnState;
use spire_net::diff;
use spire_net::entity::{Registrations, TypeRegistry};
use spire_net::proto::{EntityTypeId, Header, Sequence};
use spire_net::snapshot::SnapshotRing;

const BODY_SIZE: usize = 8;
const TYPE_BODY: EntityTypeId = EntityTypeId(0);

struct Peer {
    world: World,
    types: TypeRegistry,
    body: ComponentId,
}

impl Peer {
    fn new() -> Self {
        let mut world = World::new();
        let body = world.register_component("body", BODY_SIZE).unwrap();

        let mut types = TypeRegistry::new();
        types.register(
            TYPE_BODY,
            body.bit(),
            body.bit(),
            |_: &mut World, _: spire_ecs::EntityRef, _: EntityTypeId| {},
            &world,
        );

        Self { world, types, body }
    }
}

struct Sender {
    peer: Peer,
    registrations: Registrations,
    ring: SnapshotRing,
    sequence: Sequence,
}

impl Sender {
    fn new() -> Self {
        Self {
            peer: Peer::new(),
            registrations: Registrations::new(),
            ring: SnapshotRing::new(),
            sequence: Sequence::new(0),
        }
    }

    /// Produces the packet one tick would send to a peer that has
    /// acknowledged `ack_sequence`.
    fn tick(&mut self, ack_sequence: Sequence) -> Vec<u8> {
        let snapshot = self.ring.capture(
            self.sequence,
            &self.peer.world,
            &self.peer.types,
            &self.registrations,
        );
        let sequence = snapshot.sequence();

        let current = self.ring.get(sequence).unwrap();
        let packet = diff::pack_packet(
            current,
            &self.ring,
            ack_sequence,
            Sequence::NONE,
            &self.peer.types,
        );

        self.sequence += 1;
        packet
    }
}

fn body_of(packet: &[u8]) -> &[u8] {
    &packet[Header::SIZE..]
}

#[test]
fn full_diff_against_absent_base() {
    let mut sender = Sender::new();

    for fill in [0x11, 0x22] {
        let entity = sender.peer.world.spawn(sender.peer.body.bit()).unwrap();
        sender
            .peer
            .world
            .component_mut(entity, sender.peer.body)
            .unwrap()
            .fill(fill);
        sender.registrations.register(&sender.peer.world, TYPE_BODY, entity);
    }

    let packet = sender.tick(Sequence::NONE);

    let records: Vec<_> = PacketRecords::new(body_of(&packet), &sender.peer.types)
        .map(Result::unwrap)
        .collect();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert!(record.changed);
        assert_eq!(record.payload.unwrap().len(), BODY_SIZE);
    }
    assert_eq!(records[0].payload.unwrap(), &[0x11; BODY_SIZE]);
    assert_eq!(records[1].payload.unwrap(), &[0x22; BODY_SIZE]);
}

#[test]
fn resending_an_acked_world_sends_markers_only() {
    let mut sender = Sender::new();

    let entity = sender.peer.world.spawn(sender.peer.body.bit()).unwrap();
    sender.registrations.register(&sender.peer.world, TYPE_BODY, entity);

    // First tick unacknowledged, second tick acked at sequence 0.
    let _first = sender.tick(Sequence::NONE);
    let second = sender.tick(Sequence::new(0));

    let records: Vec<_> = PacketRecords::new(body_of(&second), &sender.peer.types)
        .map(Result::unwrap)
        .collect();
    assert_eq!(records.len(), 1);
    assert!(!records[0].changed);
    assert!(records[0].payload.is_none());

    // Marker-only record: header + one byte.
    assert_eq!(body_of(&second).len(), 9);
}

#[test]
fn receiver_reconstructs_and_tracks_remote_entities() {
    let mut sender = Sender::new();
    let mut receiver = Peer::new();
    let mut state = ConnState::new();

    let entity = sender.peer.world.spawn(sender.peer.body.bit()).unwrap();
    sender
        .peer
        .world
        .component_mut(entity, sender.peer.body)
        .unwrap()
        .fill(0xaa);
    sender.registrations.register(&sender.peer.world, TYPE_BODY, entity);

    // First sight spawns the shadow with the full payload.
    let packet = sender.tick(Sequence::NONE);
    assert!(state.receive(&mut receiver.world, &receiver.types, &packet));

    let local = state.shadows.get(entity.generation()).unwrap();
    assert_eq!(
        receiver.world.component(local, receiver.body).unwrap(),
        &[0xaa; BODY_SIZE]
    );

    // An unchanged tick (acked) keeps the same local entity and state.
    let packet = sender.tick(state.incoming_sequence);
    assert!(state.receive(&mut receiver.world, &receiver.types, &packet));
    assert_eq!(state.shadows.get(entity.generation()), Some(local));
    assert_eq!(
        receiver.world.component(local, receiver.body).unwrap(),
        &[0xaa; BODY_SIZE]
    );

    // A content change replicates through.
    sender
        .peer
        .world
        .component_mut(entity, sender.peer.body)
        .unwrap()
        .fill(0xbb);
    let packet = sender.tick(state.incoming_sequence);
    assert!(state.receive(&mut receiver.world, &receiver.types, &packet));
    assert_eq!(
        receiver.world.component(local, receiver.body).unwrap(),
        &[0xbb; BODY_SIZE]
    );

    // Destroying the sender entity removes the shadow by absence.
    sender.peer.world.destroy(entity);
    let packet = sender.tick(state.incoming_sequence);
    assert!(state.receive(&mut receiver.world, &receiver.types, &packet));
    assert!(state.shadows.is_empty());
    assert!(!receiver.world.is_valid(local));
}

#[test]
fn stale_and_duplicate_sequences_are_rejected() {
    let mut receiver = Peer::new();
    let mut state = ConnState::new();

    let packet = |sequence: i32| {
        let mut buf = Vec::new();
        use spire_net::proto::Encode;
        let _ = Header {
            sequence: Sequence::new(sequence),
            ack_sequence: Sequence::NONE,
        }
        .encode(&mut buf);
        buf
    };

    let results: Vec<bool> = [5, 5, 4, 6]
        .into_iter()
        .map(|sequence| state.receive(&mut receiver.world, &receiver.types, &packet(sequence)))
        .collect();

    assert_eq!(results, vec![true, false, false, true]);
    assert_eq!(state.incoming_sequence, Sequence::new(6));
}

#[test]
fn late_joiner_after_ring_wrap_gets_full_payloads() {
    let mut sender = Sender::new();

    let entity = sender.peer.world.spawn(sender.peer.body.bit()).unwrap();
    sender.registrations.register(&sender.peer.world, TYPE_BODY, entity);

    // Run far enough for the ring to wrap past the early snapshots.
    let mut packet = Vec::new();
    for _ in 0..300 {
        // The peer acknowledged sequence 2 long ago; once the ring
        // wraps past it the packer must fall back to full records.
        packet = sender.tick(Sequence::new(2));
    }

    let records: Vec<_> = PacketRecords::new(body_of(&packet), &sender.peer.types)
        .map(Result::unwrap)
        .collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].changed);
}
