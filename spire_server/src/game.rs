//! Demo replicated content: a moving "orb" and a static "beacon".
//!
//! Component records are explicit big-endian encodings written through
//! the types in this module; the bytes in the entity store are exactly
//! the bytes that travel over the wire.

use glam::Vec3;
use spire_ecs::{ComponentId, EntityRef, World};
use spire_net::proto::{Decode, Encode};
use spire_net::{EntityTypeId, Host};

pub const TYPE_ORB: EntityTypeId = EntityTypeId(0);
pub const TYPE_BEACON: EntityTypeId = EntityTypeId(1);

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
}

impl Transform {
    pub const SIZE: usize = 12;

    pub fn write(&self, record: &mut [u8]) {
        let mut buf = &mut record[..];
        let _ = self.translation.x.encode(&mut buf);
        let _ = self.translation.y.encode(&mut buf);
        let _ = self.translation.z.encode(&mut buf);
    }

    pub fn read(mut record: &[u8]) -> Option<Self> {
        let x = f32::decode(&mut record).ok()?;
        let y = f32::decode(&mut record).ok()?;
        let z = f32::decode(&mut record).ok()?;
        Some(Self {
            translation: Vec3::new(x, y, z),
        })
    }
}

/// RGBA color, one `u32` record.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Color(pub u32);

impl Color {
    pub const SIZE: usize = 4;

    pub fn write(&self, record: &mut [u8]) {
        let mut buf = &mut record[..];
        let _ = self.0.encode(&mut buf);
    }

    pub fn read(mut record: &[u8]) -> Option<Self> {
        u32::decode(&mut record).ok().map(Self)
    }
}

pub struct Game {
    pub transform: ComponentId,
    pub color: ComponentId,
    orb: Option<EntityRef>,
    time: f32,
}

impl Game {
    /// Registers components and entity types on a fresh world/host
    /// pair.
    pub fn new(world: &mut World, host: &mut Host) -> Self {
        let transform = world
            .register_component("transform", Transform::SIZE)
            .expect("component registry exhausted at startup");
        let color = world
            .register_component("color", Color::SIZE)
            .expect("component registry exhausted at startup");

        host.register_entity_type(
            TYPE_ORB,
            transform.bit(),
            transform.bit(),
            |_: &mut World, entity: EntityRef, _: EntityTypeId| {
                tracing::info!("remote orb appeared: {:?}", entity);
            },
            world,
        );

        host.register_entity_type(
            TYPE_BEACON,
            transform.bit() | color.bit(),
            transform.bit() | color.bit(),
            |_: &mut World, entity: EntityRef, _: EntityTypeId| {
                tracing::info!("remote beacon appeared: {:?}", entity);
            },
            world,
        );

        Self {
            transform,
            color,
            orb: None,
            time: 0.0,
        }
    }

    /// Spawns the locally owned entities and registers them for
    /// replication.
    pub fn spawn_local(&mut self, world: &mut World, host: &mut Host) {
        let Some(orb) = world.spawn(self.transform.bit()) else {
            tracing::warn!("entity store full, no orb spawned");
            return;
        };
        host.register_entity(world, TYPE_ORB, orb);
        self.orb = Some(orb);
        tracing::info!("spawned local orb {:?}", orb);

        let Some(beacon) = world.spawn(self.transform.bit() | self.color.bit()) else {
            tracing::warn!("entity store full, no beacon spawned");
            return;
        };
        if let Some(record) = world.component_mut(beacon, self.color) {
            Color(0xff00_ffff).write(record);
        }
        host.register_entity(world, TYPE_BEACON, beacon);
        tracing::info!("spawned local beacon {:?}", beacon);
    }

    /// Advances the local simulation by `dt` seconds.
    pub fn tick(&mut self, world: &mut World, dt: f32) {
        self.time += dt;

        if let Some(orb) = self.orb {
            let transform = Transform {
                translation: Vec3::new(self.time.cos() * 5.0, 0.0, self.time.sin() * 5.0),
            };

            if let Some(record) = world.component_mut(orb, self.transform) {
                transform.write(record);
            }
        }
    }

    /// Number of live entities carrying a transform, local and remote.
    pub fn entity_count(&self, world: &World) -> usize {
        world.query(self.transform.bit()).count()
    }
}
