//! Per-tick snapshots of the replicated entity set.
//!
//! Every tick serializes the live registered entities into a snapshot
//! record stream, stored in a fixed ring keyed by world sequence. The
//! ring is the history the diff packer reads: a connection's last
//! acknowledged snapshot is looked up here and used as the diff base.

use spire_ecs::World;

use crate::entity::{replicated_components, Registrations, TypeRegistry};
use crate::proto::{Decode, Encode, EntityRecordHeader, Error, Sequence, MTU};

pub const SNAPSHOT_RING: usize = 256;

/// One tick's serialized entity state.
///
/// The buffer holds back-to-back records of
/// `EntityRecordHeader payload:u8[N]` with `N` given by the entity
/// type's replicated size.
#[derive(Clone, Debug)]
pub struct Snapshot {
    sequence: Sequence,
    buf: Vec<u8>,
}

impl Snapshot {
    fn new() -> Self {
        Self {
            sequence: Sequence::NONE,
            buf: Vec::with_capacity(MTU),
        }
    }

    #[inline]
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Iterates over the entity records in this snapshot.
    pub fn records<'a>(&'a self, types: &'a TypeRegistry) -> SnapshotRecords<'a> {
        SnapshotRecords {
            buf: &self.buf,
            types,
            failed: false,
        }
    }
}

/// A bounded history of snapshots keyed by `sequence % SNAPSHOT_RING`.
///
/// Old slots are silently overwritten; [`SnapshotRing::get`] validates
/// the stored sequence so a wrapped slot is never mistaken for the
/// requested one.
#[derive(Debug)]
pub struct SnapshotRing {
    slots: Vec<Snapshot>,
}

impl SnapshotRing {
    pub fn new() -> Self {
        Self {
            slots: (0..SNAPSHOT_RING).map(|_| Snapshot::new()).collect(),
        }
    }

    /// The snapshot captured at `sequence`, if it is still in the ring.
    pub fn get(&self, sequence: Sequence) -> Option<&Snapshot> {
        let index = usize::try_from(sequence.to_bits()).ok()? % SNAPSHOT_RING;

        let slot = &self.slots[index];
        (slot.sequence == sequence).then_some(slot)
    }

    /// Serializes every live registered entity into the ring slot for
    /// `sequence`.
    ///
    /// Entities are written in registration order. An entity whose
    /// record no longer fits in the [`MTU`] budget ends the snapshot;
    /// it and all entities after it are excluded for this tick.
    pub fn capture(
        &mut self,
        sequence: Sequence,
        world: &World,
        types: &TypeRegistry,
        registrations: &Registrations,
    ) -> &Snapshot {
        let index = sequence.to_bits().max(0) as usize % SNAPSHOT_RING;
        let slot = &mut self.slots[index];
        slot.sequence = sequence;
        slot.buf.clear();

        for registration in registrations.iter_live(world) {
            let Some(descriptor) = types.get(registration.entity_type) else {
                tracing::warn!(
                    "registered entity {:?} has unregistered type {:?}",
                    registration.entity,
                    registration.entity_type,
                );
                continue;
            };

            if slot.buf.len() + EntityRecordHeader::SIZE + descriptor.replicated_size > MTU {
                tracing::debug!(
                    "snapshot {} full, dropping entity {:?} and the rest of this tick",
                    sequence,
                    registration.entity,
                );
                break;
            }

            let header = EntityRecordHeader {
                entity_type: registration.entity_type,
                replication_sequence: registration.entity.generation(),
            };
            let _ = header.encode(&mut slot.buf);

            for component in replicated_components(descriptor.replicated) {
                // Live + registered shape implies the component exists.
                if let Some(bytes) = world.component(registration.entity, component) {
                    slot.buf.extend_from_slice(bytes);
                }
            }
        }

        slot
    }
}

impl Default for SnapshotRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed view of one entity record inside a snapshot or packet.
#[derive(Copy, Clone, Debug)]
pub struct EntityRecord<'a> {
    pub header: EntityRecordHeader,
    pub payload: &'a [u8],
}

/// Iterator over the records of a snapshot stream.
///
/// Record payload lengths are derived from the type registry; a record
/// with an unregistered type makes the remainder of the stream
/// unparseable and ends iteration with an error.
#[derive(Debug)]
pub struct SnapshotRecords<'a> {
    buf: &'a [u8],
    types: &'a TypeRegistry,
    failed: bool,
}

impl<'a> Iterator for SnapshotRecords<'a> {
    type Item = Result<EntityRecord<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }

        let header = match EntityRecordHeader::decode(self.buf) {
            Ok(header) => header,
            Err(err) => {
                self.failed = true;
                return Some(Err(err.into()));
            }
        };

        let Some(size) = self.types.payload_size(header.entity_type) else {
            self.failed = true;
            return Some(Err(crate::proto::InvalidEntityType(header.entity_type.0).into()));
        };

        let rest = &self.buf[EntityRecordHeader::SIZE..];
        if rest.len() < size {
            self.failed = true;
            return Some(Err(crate::proto::EofError {
                expected: size,
                found: rest.len(),
            }
            .into()));
        }

        let (payload, rest) = rest.split_at(size);
        self.buf = rest;
        Some(Ok(EntityRecord { header, payload }))
    }
}
