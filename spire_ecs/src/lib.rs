//! Entity store
//!
//! A fixed-capacity entity table with generational references and
//! fixed-size, opaque component records.
//!
//! Component data is stored as raw byte records whose layout is defined
//! by the game, not by this crate. Games that replicate components over
//! the network must fill these records with an explicit fixed-endian
//! encoding so that the bytes are a stable wire contract.

pub const MAX_ENTITIES: usize = 512;
pub const MAX_COMPONENT_TYPES: usize = 64;

/// Bit index of a registered component type inside an entity's
/// component mask.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ComponentId(pub u32);

impl ComponentId {
    #[inline]
    pub fn bit(self) -> u64 {
        1 << self.0
    }
}

/// Weak reference to an entity.
///
/// The reference is only valid while the slot's generation matches.
/// Generations are allocated from a world-global monotonic counter, so
/// a generation value uniquely identifies a single spawn event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityRef {
    index: u32,
    generation: i32,
}

impl EntityRef {
    /// The generation counter of the spawn event this reference points
    /// at.
    #[inline]
    pub fn generation(self) -> i32 {
        self.generation
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EntityState {
    Unused,
    Active,
}

#[derive(Clone, Debug)]
struct EntitySlot {
    state: EntityState,
    generation: i32,
    mask: u64,
}

#[derive(Clone, Debug)]
struct ComponentColumn {
    name: String,
    size: usize,
    data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct World {
    next_generation: i32,
    entities: Vec<EntitySlot>,
    components: Vec<ComponentColumn>,
}

impl World {
    pub fn new() -> Self {
        Self {
            next_generation: 0,
            entities: vec![
                EntitySlot {
                    state: EntityState::Unused,
                    generation: -1,
                    mask: 0,
                };
                MAX_ENTITIES
            ],
            components: Vec::new(),
        }
    }

    /// Registers a component type with a fixed record size.
    ///
    /// Returns `None` once all component ids are taken.
    pub fn register_component(&mut self, name: &str, size: usize) -> Option<ComponentId> {
        if self.components.len() >= MAX_COMPONENT_TYPES {
            tracing::warn!("out of component types, cannot register {:?}", name);
            return None;
        }

        let id = ComponentId(self.components.len() as u32);
        self.components.push(ComponentColumn {
            name: name.to_owned(),
            size,
            data: vec![0; size * MAX_ENTITIES],
        });
        Some(id)
    }

    /// The record size of a registered component type.
    ///
    /// Returns 0 for unregistered ids.
    pub fn component_size(&self, id: ComponentId) -> usize {
        self.components.get(id.0 as usize).map_or(0, |c| c.size)
    }

    pub fn component_name(&self, id: ComponentId) -> Option<&str> {
        self.components.get(id.0 as usize).map(|c| c.name.as_str())
    }

    /// Spawns an entity holding every component selected by `mask`.
    ///
    /// Returns `None` when the entity table is full. Component records
    /// of the new entity are zeroed.
    pub fn spawn(&mut self, mask: u64) -> Option<EntityRef> {
        let index = self
            .entities
            .iter()
            .position(|slot| slot.state == EntityState::Unused)?;

        let generation = self.next_generation;
        self.next_generation += 1;

        let slot = &mut self.entities[index];
        slot.state = EntityState::Active;
        slot.generation = generation;
        slot.mask = mask;

        for column in &mut self.components {
            let start = column.size * index;
            column.data[start..start + column.size].fill(0);
        }

        Some(EntityRef {
            index: index as u32,
            generation,
        })
    }

    pub fn destroy(&mut self, entity: EntityRef) {
        if !self.is_valid(entity) {
            tracing::warn!("attempted to destroy an invalid entity: {:?}", entity);
            return;
        }

        let slot = &mut self.entities[entity.index as usize];
        slot.state = EntityState::Unused;
        slot.mask = 0;
    }

    pub fn is_valid(&self, entity: EntityRef) -> bool {
        match self.entities.get(entity.index as usize) {
            Some(slot) => {
                slot.state == EntityState::Active && slot.generation == entity.generation
            }
            None => false,
        }
    }

    /// The component record of an entity, or `None` if the reference is
    /// stale or the entity does not hold the component.
    pub fn component(&self, entity: EntityRef, id: ComponentId) -> Option<&[u8]> {
        if !self.is_valid(entity) || !self.has_component(entity, id) {
            return None;
        }

        let column = self.components.get(id.0 as usize)?;
        let start = column.size * entity.index as usize;
        Some(&column.data[start..start + column.size])
    }

    pub fn component_mut(&mut self, entity: EntityRef, id: ComponentId) -> Option<&mut [u8]> {
        if !self.is_valid(entity) || !self.has_component(entity, id) {
            return None;
        }

        let column = self.components.get_mut(id.0 as usize)?;
        let start = column.size * entity.index as usize;
        Some(&mut column.data[start..start + column.size])
    }

    fn has_component(&self, entity: EntityRef, id: ComponentId) -> bool {
        self.entities[entity.index as usize].mask & id.bit() != 0
    }

    /// Iterates over all live entities holding every component in
    /// `mask`.
    pub fn query(&self, mask: u64) -> impl Iterator<Item = EntityRef> + '_ {
        self.entities
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.state == EntityState::Active && slot.mask & mask == mask)
            .map(|(index, slot)| EntityRef {
                index: index as u32,
                generation: slot.generation,
            })
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
