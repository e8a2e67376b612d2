//! Per-connection diff packing.
//!
//! For every entity in the current snapshot the packer emits the record
//! header, a one-byte `changed` marker and, only when changed, the full
//! payload. The diff base is the snapshot the peer last acknowledged;
//! base records are indexed by replication sequence, so two snapshots
//! that enumerate entities in different orders still diff correctly.

use indexmap::IndexMap;

use crate::entity::TypeRegistry;
use crate::proto::{Encode, EntityRecordHeader, Header, Sequence, MTU};
use crate::snapshot::{Snapshot, SnapshotRing};

/// Builds the full outgoing packet for one connection: header followed
/// by the diffed entity records of the current snapshot.
pub fn pack_packet(
    current: &Snapshot,
    ring: &SnapshotRing,
    ack_sequence: Sequence,
    incoming_sequence: Sequence,
    types: &TypeRegistry,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MTU);

    let header = Header {
        sequence: current.sequence(),
        ack_sequence: incoming_sequence,
    };
    let _ = header.encode(&mut buf);

    let base = ring.get(ack_sequence);
    pack_entities(&mut buf, current, base, types);

    buf
}

/// Appends one wire record per entity in `current`, diffed against
/// `base`.
///
/// A missing base (nothing acknowledged yet, or the ring wrapped past
/// the acknowledged slot) downgrades every record to a full payload.
/// Records stop before `out` would exceed [`MTU`]: the snapshot itself
/// is MTU-bounded, but the packet header and the per-entity marker
/// bytes can push a full snapshot past the ceiling.
pub fn pack_entities(
    out: &mut Vec<u8>,
    current: &Snapshot,
    base: Option<&Snapshot>,
    types: &TypeRegistry,
) {
    // Replication sequence -> (type, payload). A parse error in the
    // base is treated as "no base": every entity diffs as changed.
    let mut base_records = IndexMap::new();
    if let Some(base) = base {
        for record in base.records(types) {
            let Ok(record) = record else {
                tracing::warn!("unreadable diff base, assuming full diff");
                base_records.clear();
                break;
            };

            base_records.insert(
                record.header.replication_sequence,
                (record.header.entity_type, record.payload),
            );
        }
    }

    for record in current.records(types) {
        let Ok(record) = record else {
            // The local snapshot only contains registered types; a
            // parse error here means the registry changed mid-run.
            tracing::error!("unreadable current snapshot, truncating packet");
            return;
        };

        let changed = match base_records.get(&record.header.replication_sequence) {
            Some((entity_type, payload)) => {
                *entity_type != record.header.entity_type || *payload != record.payload
            }
            None => true,
        };

        let mut needed = EntityRecordHeader::SIZE + 1;
        if changed {
            needed += record.payload.len();
        }
        if out.len() + needed > MTU {
            tracing::debug!(
                "packet full, dropping entity {} and the rest of this tick",
                record.header.replication_sequence,
            );
            break;
        }

        let _ = record.header.encode(&mut *out);
        out.push(changed as u8);
        if changed {
            out.extend_from_slice(record.payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use spire_ecs::World;

    use crate::apply::PacketRecords;
    use crate::entity::{Registrations, TypeRegistry};
    use crate::proto::{EntityTypeId, Sequence, MTU};
    use crate::snapshot::SnapshotRing;

    fn test_world(component_size: usize) -> (World, TypeRegistry) {
        let mut world = World::new();
        let body = world.register_component("body", component_size).unwrap();

        let mut types = TypeRegistry::new();
        types.register(
            EntityTypeId(0),
            body.bit(),
            body.bit(),
            |_: &mut World, _: spire_ecs::EntityRef, _: EntityTypeId| {},
            &world,
        );

        (world, types)
    }

    #[test]
    fn absent_base_means_full_records() {
        let (mut world, types) = test_world(4);
        let mut registrations = Registrations::new();
        let entity = world.spawn(1).unwrap();
        registrations.register(&world, EntityTypeId(0), entity);

        let mut ring = SnapshotRing::new();
        ring.capture(Sequence::new(0), &world, &types, &registrations);

        let mut out = Vec::new();
        super::pack_entities(
            &mut out,
            ring.get(Sequence::new(0)).unwrap(),
            None,
            &types,
        );

        let records: Vec<_> = PacketRecords::new(&out, &types)
            .map(Result::unwrap)
            .collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].changed);
        assert_eq!(records[0].payload.unwrap().len(), 4);
    }

    #[test]
    fn unchanged_world_diffs_to_markers_only() {
        let (mut world, types) = test_world(4);
        let mut registrations = Registrations::new();
        let entity = world.spawn(1).unwrap();
        registrations.register(&world, EntityTypeId(0), entity);

        let mut ring = SnapshotRing::new();
        ring.capture(Sequence::new(0), &world, &types, &registrations);
        ring.capture(Sequence::new(1), &world, &types, &registrations);

        let mut out = Vec::new();
        super::pack_entities(
            &mut out,
            ring.get(Sequence::new(1)).unwrap(),
            ring.get(Sequence::new(0)),
            &types,
        );

        let records: Vec<_> = PacketRecords::new(&out, &types)
            .map(Result::unwrap)
            .collect();
        assert_eq!(records.len(), 1);
        assert!(!records[0].changed);
        assert!(records[0].payload.is_none());
    }

    #[test]
    fn changed_payload_is_resent_in_full() {
        let (mut world, types) = test_world(4);
        let body = spire_ecs::ComponentId(0);
        let mut registrations = Registrations::new();
        let entity = world.spawn(1).unwrap();
        registrations.register(&world, EntityTypeId(0), entity);

        let mut ring = SnapshotRing::new();
        ring.capture(Sequence::new(0), &world, &types, &registrations);

        world.component_mut(entity, body).unwrap()[0] = 0x5a;
        ring.capture(Sequence::new(1), &world, &types, &registrations);

        let mut out = Vec::new();
        super::pack_entities(
            &mut out,
            ring.get(Sequence::new(1)).unwrap(),
            ring.get(Sequence::new(0)),
            &types,
        );

        let records: Vec<_> = PacketRecords::new(&out, &types)
            .map(Result::unwrap)
            .collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].changed);
        assert_eq!(records[0].payload.unwrap()[0], 0x5a);
    }

    #[test]
    fn base_is_matched_by_replication_sequence_not_position() {
        let (mut world, types) = test_world(4);
        let mut registrations = Registrations::new();

        let a = world.spawn(1).unwrap();
        let b = world.spawn(1).unwrap();
        registrations.register(&world, EntityTypeId(0), a);
        registrations.register(&world, EntityTypeId(0), b);

        let mut ring = SnapshotRing::new();
        ring.capture(Sequence::new(0), &world, &types, &registrations);

        // `a` dies and a new entity claims its registration slot,
        // shifting `b`'s position between the two snapshots.
        world.destroy(a);
        let c = world.spawn(1).unwrap();
        registrations.register(&world, EntityTypeId(0), c);
        ring.capture(Sequence::new(1), &world, &types, &registrations);

        let mut out = Vec::new();
        super::pack_entities(
            &mut out,
            ring.get(Sequence::new(1)).unwrap(),
            ring.get(Sequence::new(0)),
            &types,
        );

        for record in PacketRecords::new(&out, &types).map(Result::unwrap) {
            if record.header.replication_sequence == b.generation() {
                // Unchanged entity stays a marker even though its
                // stream position moved.
                assert!(!record.changed);
            } else {
                assert_eq!(record.header.replication_sequence, c.generation());
                assert!(record.changed);
            }
        }
    }

    #[test]
    fn marker_bytes_never_push_past_mtu() {
        // 32 entities with 24-byte payloads fill the snapshot to
        // exactly 1024 bytes. On the wire each record grows by one
        // marker byte and the packet carries an 8-byte header, so only
        // 30 records fit.
        let (mut world, types) = test_world(24);

        let mut registrations = Registrations::new();
        for _ in 0..32 {
            let entity = world.spawn(1).unwrap();
            registrations.register(&world, EntityTypeId(0), entity);
        }

        let mut ring = SnapshotRing::new();
        ring.capture(Sequence::new(0), &world, &types, &registrations);

        let snapshot = ring.get(Sequence::new(0)).unwrap();
        assert_eq!(snapshot.bytes().len(), MTU);

        let out = super::pack_packet(snapshot, &ring, Sequence::NONE, Sequence::NONE, &types);
        assert!(out.len() <= MTU);

        let body = &out[crate::proto::Header::SIZE..];
        assert_eq!(PacketRecords::new(body, &types).count(), 30);
    }
}
