//! Entity type descriptors and per-host entity registrations.

use spire_ecs::{ComponentId, EntityRef, World};

use crate::proto::EntityTypeId;

pub const MAX_ENTITY_TYPES: usize = 32;
pub const MAX_ENTITIES: usize = 32;

/// Configures a freshly spawned remote entity.
///
/// Invoked once per entity, right after the diff applier spawned it
/// with the type's full component mask and before any replicated
/// component bytes are written.
pub trait SpawnEntity: Send + Sync {
    fn spawn(&self, world: &mut World, entity: EntityRef, entity_type: EntityTypeId);
}

impl<F> SpawnEntity for F
where
    F: Fn(&mut World, EntityRef, EntityTypeId) + Send + Sync,
{
    fn spawn(&self, world: &mut World, entity: EntityRef, entity_type: EntityTypeId) {
        self(world, entity, entity_type)
    }
}

/// The replicated shape of one entity type.
pub struct EntityTypeDescriptor {
    /// Every component the entity holds.
    pub components: u64,
    /// The subset of components that travels over the wire.
    pub replicated: u64,
    /// Total byte size of the replicated components. Computed at
    /// registration time and immutable thereafter.
    pub replicated_size: usize,
    spawner: Box<dyn SpawnEntity>,
}

impl EntityTypeDescriptor {
    pub fn spawner(&self) -> &dyn SpawnEntity {
        &*self.spawner
    }
}

impl std::fmt::Debug for EntityTypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityTypeDescriptor")
            .field("components", &self.components)
            .field("replicated", &self.replicated)
            .field("replicated_size", &self.replicated_size)
            .finish_non_exhaustive()
    }
}

/// Maps [`EntityTypeId`]s to their descriptors.
///
/// Registered once at startup; descriptors never change afterwards.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: [Option<EntityTypeDescriptor>; MAX_ENTITY_TYPES],
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: [const { None }; MAX_ENTITY_TYPES],
        }
    }

    /// Registers an entity type.
    ///
    /// `replicated` selects the components serialized into snapshots;
    /// their total byte size is computed here from the store's
    /// component sizes. Out-of-range type ids are logged and dropped.
    pub fn register<S>(
        &mut self,
        entity_type: EntityTypeId,
        components: u64,
        replicated: u64,
        spawner: S,
        world: &World,
    ) where
        S: SpawnEntity + 'static,
    {
        let Some(slot) = usize::try_from(entity_type.0)
            .ok()
            .and_then(|index| self.types.get_mut(index))
        else {
            tracing::warn!("invalid entity type: {}", entity_type.0);
            return;
        };

        let replicated_size = replicated_components(replicated)
            .map(|id| world.component_size(id))
            .sum();

        *slot = Some(EntityTypeDescriptor {
            components,
            replicated,
            replicated_size,
            spawner: Box::new(spawner),
        });
    }

    pub fn get(&self, entity_type: EntityTypeId) -> Option<&EntityTypeDescriptor> {
        usize::try_from(entity_type.0)
            .ok()
            .and_then(|index| self.types.get(index))
            .and_then(Option::as_ref)
    }

    /// The wire payload size of one entity record of this type, or
    /// `None` for unregistered types.
    pub fn payload_size(&self, entity_type: EntityTypeId) -> Option<usize> {
        self.get(entity_type).map(|desc| desc.replicated_size)
    }
}

/// Iterates ascending over the component ids selected by `mask`.
pub fn replicated_components(mask: u64) -> impl Iterator<Item = ComponentId> {
    (0..u64::BITS).filter_map(move |bit| {
        if mask & 1 << bit != 0 {
            Some(ComponentId(bit))
        } else {
            None
        }
    })
}

#[derive(Copy, Clone, Debug)]
pub struct Registration {
    pub entity: EntityRef,
    pub entity_type: EntityTypeId,
}

/// The bounded set of local entities replicated to peers.
///
/// A slot becomes free when its entity reference is no longer valid;
/// registration claims the first free slot.
#[derive(Debug, Default)]
pub struct Registrations {
    entries: [Option<Registration>; MAX_ENTITIES],
}

impl Registrations {
    pub fn new() -> Self {
        Self {
            entries: [None; MAX_ENTITIES],
        }
    }

    pub fn register(&mut self, world: &World, entity_type: EntityTypeId, entity: EntityRef) {
        for entry in &mut self.entries {
            let free = match entry {
                Some(registration) => !world.is_valid(registration.entity),
                None => true,
            };

            if free {
                *entry = Some(Registration {
                    entity,
                    entity_type,
                });
                return;
            }
        }

        tracing::warn!("out of space to register entity {:?}", entity);
    }

    /// Iterates over registrations whose entity is still live, in
    /// registration order.
    pub fn iter_live<'a>(&'a self, world: &'a World) -> impl Iterator<Item = Registration> + 'a {
        self.entries
            .iter()
            .flatten()
            .filter(|registration| world.is_valid(registration.entity))
            .copied()
    }
}
