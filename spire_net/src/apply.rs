//! Applying received diffs to the local world.
//!
//! Each connection keeps a shadow table: its belief about the remote
//! entities it has seen, keyed by the sender's replication sequence.
//! A record for an unknown replication sequence spawns a local shadow
//! entity through the type's configure hook; a record marked changed
//! overwrites the replicated component bytes; a shadow absent from an
//! accepted packet is destroyed. Absence is the sole deletion
//! mechanism.

use spire_ecs::{EntityRef, World};

use crate::entity::{replicated_components, TypeRegistry, MAX_ENTITIES};
use crate::proto::{Decode, EntityRecordHeader, EofError, Error, InvalidEntityType, Sequence};

#[derive(Copy, Clone, Debug)]
struct ShadowEntity {
    local: EntityRef,
    remote_sequence: i32,
    last_world_sequence: Sequence,
}

/// Per-connection table of local proxies for remote entities.
///
/// Identity is the remote replication sequence, not the slot position.
#[derive(Debug, Default)]
pub struct ShadowTable {
    entries: [Option<ShadowEntity>; MAX_ENTITIES],
}

impl ShadowTable {
    pub fn new() -> Self {
        Self {
            entries: [None; MAX_ENTITIES],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The local entity shadowing `remote_sequence`, if any.
    pub fn get(&self, remote_sequence: i32) -> Option<EntityRef> {
        self.entries
            .iter()
            .flatten()
            .find(|shadow| shadow.remote_sequence == remote_sequence)
            .map(|shadow| shadow.local)
    }

    fn find_mut(&mut self, remote_sequence: i32) -> Option<&mut ShadowEntity> {
        self.entries
            .iter_mut()
            .flatten()
            .find(|shadow| shadow.remote_sequence == remote_sequence)
    }

    fn free_slot(&self, world: &World) -> Option<usize> {
        self.entries.iter().position(|entry| match entry {
            Some(existing) => !world.is_valid(existing.local),
            None => true,
        })
    }

    /// Destroys every shadow that was not seen at `world_sequence`.
    fn remove_absent(&mut self, world: &mut World, world_sequence: Sequence) {
        for entry in &mut self.entries {
            let Some(shadow) = entry else {
                continue;
            };

            if !world.is_valid(shadow.local) {
                *entry = None;
                continue;
            }

            if shadow.last_world_sequence != world_sequence {
                tracing::debug!("removing absent remote entity {}", shadow.remote_sequence);
                world.destroy(shadow.local);
                *entry = None;
            }
        }
    }
}

/// Applies the entity records of an accepted packet.
///
/// `world_sequence` is the packet's own sequence; it stamps every seen
/// shadow and decides which shadows are absent afterwards. Malformed
/// records abandon the rest of the packet: everything applied so far
/// stays applied, and the absence sweep is skipped since entities in
/// the unread remainder cannot be told apart from absent ones.
pub fn apply(
    world: &mut World,
    types: &TypeRegistry,
    shadows: &mut ShadowTable,
    world_sequence: Sequence,
    body: &[u8],
) {
    for record in PacketRecords::new(body, types) {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                tracing::debug!("malformed entity record: {}", err);
                return;
            }
        };

        let remote_sequence = record.header.replication_sequence;

        let local = match shadows.find_mut(remote_sequence) {
            Some(shadow) if world.is_valid(shadow.local) => {
                shadow.last_world_sequence = world_sequence;
                Some(shadow.local)
            }
            // Unknown entity (or its local proxy died): spawn a fresh
            // shadow, but only if the table has room for it.
            _ => spawn_shadow(world, types, shadows, &record.header, world_sequence),
        };

        if record.changed {
            let Some(payload) = record.payload else {
                continue;
            };
            let Some(local) = local else {
                continue;
            };
            let Some(descriptor) = types.get(record.header.entity_type) else {
                continue;
            };

            let mut offset = 0;
            for component in replicated_components(descriptor.replicated) {
                let size = world.component_size(component);
                if let Some(bytes) = world.component_mut(local, component) {
                    bytes.copy_from_slice(&payload[offset..offset + size]);
                }
                offset += size;
            }
        }
    }

    shadows.remove_absent(world, world_sequence);
}

fn spawn_shadow(
    world: &mut World,
    types: &TypeRegistry,
    shadows: &mut ShadowTable,
    header: &EntityRecordHeader,
    world_sequence: Sequence,
) -> Option<EntityRef> {
    let descriptor = types.get(header.entity_type)?;

    // Find room before spawning: with no slot left the entity must not
    // appear locally at all.
    let Some(slot) = shadows.free_slot(world) else {
        tracing::warn!(
            "out of shadow entity slots, dropping remote entity {}",
            header.replication_sequence,
        );
        return None;
    };

    let Some(local) = world.spawn(descriptor.components) else {
        tracing::warn!("entity store full, dropping remote entity");
        return None;
    };

    descriptor.spawner().spawn(world, local, header.entity_type);

    shadows.entries[slot] = Some(ShadowEntity {
        local,
        remote_sequence: header.replication_sequence,
        last_world_sequence: world_sequence,
    });
    Some(local)
}

/// Borrowed view of one wire entity record.
#[derive(Copy, Clone, Debug)]
pub struct PacketRecord<'a> {
    pub header: EntityRecordHeader,
    pub changed: bool,
    /// Present iff `changed`.
    pub payload: Option<&'a [u8]>,
}

/// Iterator over the entity records in a packet body.
#[derive(Debug)]
pub struct PacketRecords<'a> {
    buf: &'a [u8],
    types: &'a TypeRegistry,
    failed: bool,
}

impl<'a> PacketRecords<'a> {
    pub fn new(body: &'a [u8], types: &'a TypeRegistry) -> Self {
        Self {
            buf: body,
            types,
            failed: false,
        }
    }

    fn parse_next(&mut self) -> Result<PacketRecord<'a>, Error> {
        let header = EntityRecordHeader::decode(self.buf)?;
        let rest = &self.buf[EntityRecordHeader::SIZE..];

        let (&marker, rest) = rest.split_first().ok_or(EofError {
            expected: 1,
            found: 0,
        })?;

        if marker == 0 {
            self.buf = rest;
            return Ok(PacketRecord {
                header,
                changed: false,
                payload: None,
            });
        }

        let size = self
            .types
            .payload_size(header.entity_type)
            .ok_or(InvalidEntityType(header.entity_type.0))?;
        if rest.len() < size {
            return Err(EofError {
                expected: size,
                found: rest.len(),
            }
            .into());
        }

        let (payload, rest) = rest.split_at(size);
        self.buf = rest;
        Ok(PacketRecord {
            header,
            changed: true,
            payload: Some(payload),
        })
    }
}

impl<'a> Iterator for PacketRecords<'a> {
    type Item = Result<PacketRecord<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }

        let result = self.parse_next();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}
