//! Snapshot building for network transmission

use crate::ws::protocol::{DroneData, HostData, ObjectData, ServerMsg};

use super::actor::{Actor, ActorKind};
use super::entity::{Entity, EntityKind};
use super::ids::ActorId;
use super::world::World;

/// Builds per-recipient state broadcasts
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// One `UpdatePlayer` per logged-in human.
    ///
    /// Updates each recipient's last-sent `fire_ready`, so only call this when
    /// the result is actually dispatched.
    pub fn build(world: &mut World) -> Vec<(ActorId, ServerMsg)> {
        let objects: Vec<ObjectData> = world.entities().values().map(Self::object_data).collect();
        let drones: Vec<DroneData> = world
            .actors()
            .values()
            .filter(|a| a.is_active())
            .map(Self::drone_data)
            .collect();

        world
            .actors_mut()
            .filter(|a| a.kind() == ActorKind::Human && a.authenticated)
            .map(|actor| {
                let others = drones.iter().filter(|d| d.id != actor.id).cloned().collect();
                let msg = ServerMsg::UpdatePlayer {
                    user: Self::host_data(actor),
                    others,
                    objects: objects.clone(),
                };
                (actor.id, msg)
            })
            .collect()
    }

    /// Full own-ship state; `fire_ready` only when it changed since last sent
    pub fn host_data(actor: &mut Actor) -> HostData {
        let fire_ready = if actor.sent_fire_ready != actor.ship.fire_ready {
            actor.sent_fire_ready = actor.ship.fire_ready;
            Some(actor.ship.fire_ready)
        } else {
            None
        };
        HostData {
            pos: actor.ship.pos,
            vel: actor.ship.vel,
            heading: actor.ship.heading,
            health: actor.health,
            fire_ready,
        }
    }

    pub fn drone_data(actor: &Actor) -> DroneData {
        DroneData {
            id: actor.id,
            kind: actor.kind(),
            pos: actor.ship.pos,
            vel: actor.ship.vel,
            heading: actor.ship.heading,
            target_heading: actor.ship.target_heading,
            thrust: actor.ship.thrust,
            health: actor.health,
        }
    }

    pub fn object_data(entity: &Entity) -> ObjectData {
        match &entity.kind {
            EntityKind::Generic => ObjectData::Generic {
                id: entity.id,
                pos: entity.pos,
                vel: entity.vel,
            },
            EntityKind::Projectile(_) => ObjectData::Projectile {
                id: entity.id,
                pos: entity.pos,
                vel: entity.vel,
            },
            EntityKind::Asteroid(asteroid) => ObjectData::Asteroid {
                id: entity.id,
                pos: entity.pos,
                vel: entity.vel,
                heading: asteroid.heading,
                shape: asteroid.shape.clone(),
            },
        }
    }
}
