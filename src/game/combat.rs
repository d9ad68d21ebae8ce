//! Combat system - projectile hit detection

use std::collections::BTreeMap;

use crate::config::{HitPolicy, SimSettings};

use super::actor::Actor;
use super::entity::Entity;
use super::ids::{ActorId, ObjectId};
use super::physics::{PhysicsSystem, Vec2};

/// What a projectile struck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitTarget {
    /// Only owned projectiles can hit ships
    Ship { victim: ActorId, shooter: ActorId },
    Asteroid(ObjectId),
}

/// Hit result from combat resolution
#[derive(Debug, Clone)]
pub struct HitRecord {
    pub projectile_id: ObjectId,
    pub shooter_id: ActorId,
    pub target_id: ActorId,
    /// Projectile position at impact
    pub projectile_pos: Vec2,
    pub shooter_pos: Vec2,
    pub target_pos: Vec2,
    pub target_killed: bool,
}

/// Combat system for resolving projectiles against ships and asteroids
pub struct CombatSystem;

impl CombatSystem {
    /// Find the single target a projectile hits this tick, if any.
    ///
    /// Ships are only tested when the projectile still has a live owner, and
    /// never against that owner.
    pub fn find_hit(
        projectile: &Entity,
        actors: &BTreeMap<ActorId, Actor>,
        entities: &BTreeMap<ObjectId, Entity>,
        settings: &SimSettings,
    ) -> Option<HitTarget> {
        let owner = projectile.as_projectile()?.owner;
        let pos = projectile.pos;

        let ships = owner.into_iter().flat_map(move |shooter| {
            actors
                .values()
                .filter(move |a| a.is_active() && a.id != shooter)
                .map(move |a| {
                    let target = HitTarget::Ship {
                        victim: a.id,
                        shooter,
                    };
                    (target, a.ship.pos, settings.hit_radius(a.health))
                })
        });

        let rocks = entities.values().filter_map(|e| {
            e.as_asteroid()
                .map(|rock| (HitTarget::Asteroid(e.id), e.pos, rock.collision_radius))
        });

        let mut candidates = ships
            .chain(rocks)
            .filter(|(_, center, radius)| PhysicsSystem::within(pos, *center, *radius));

        match settings.hit_policy {
            HitPolicy::FirstMatch => candidates.next().map(|(target, _, _)| target),
            HitPolicy::Nearest => candidates
                .min_by(|a, b| pos.distance(a.1).total_cmp(&pos.distance(b.1)))
                .map(|(target, _, _)| target),
        }
    }
}
