//! World objects: projectiles and asteroids sharing one integrator

use std::f32::consts::{FRAC_PI_4, TAU};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ArenaSettings;

use super::ids::{ActorId, ObjectId};
use super::physics::{normalize_angle, Vec2};

/// Asteroid silhouettes have between these many points (inclusive)
pub const ASTEROID_MIN_POINTS: usize = 6;
pub const ASTEROID_MAX_POINTS: usize = 17;
/// Asteroid speed range in units per second
pub const ASTEROID_MIN_SPEED: f32 = 46.0;
pub const ASTEROID_MAX_SPEED: f32 = 118.0;
/// Asteroid spin range in radians per second (symmetric around zero)
pub const ASTEROID_MAX_SPIN: f32 = 0.75;

/// A live projectile
#[derive(Debug, Clone)]
pub struct Projectile {
    /// Firing actor, cleared when that actor disconnects
    pub owner: Option<ActorId>,
    /// Seconds until the projectile is reaped
    pub remaining_life: f32,
}

/// Visual silhouette of an asteroid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsteroidShape {
    /// One radius per silhouette point
    pub radii: Vec<f32>,
}

/// A drifting, spinning asteroid
#[derive(Debug, Clone)]
pub struct Asteroid {
    pub heading: f32,
    pub angular_velocity: f32,
    pub shape: AsteroidShape,
    pub collision_radius: f32,
    /// Used for bounds testing; always larger than `collision_radius`
    pub outer_radius: f32,
}

impl Asteroid {
    /// Roll a fresh shape, heading and spin. Returns the asteroid and its velocity.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> (Self, Vec2) {
        let heading = rng.gen_range(0.0..TAU);
        let speed = rng.gen_range(ASTEROID_MIN_SPEED..ASTEROID_MAX_SPEED);
        let angular_velocity = rng.gen_range(-ASTEROID_MAX_SPIN..ASTEROID_MAX_SPIN);

        let points = rng.gen_range(ASTEROID_MIN_POINTS..=ASTEROID_MAX_POINTS);
        let collision_radius = 8.0 + points as f32 * 2.5;
        let spread = 6.0 + (points - ASTEROID_MIN_POINTS) as f32 * 2.5;
        let radii = (0..points)
            .map(|_| collision_radius + rng.gen_range(-0.5..0.5) * spread)
            .collect();
        let outer_radius = collision_radius + spread * 0.5 + 2.0;

        let asteroid = Self {
            heading,
            angular_velocity,
            shape: AsteroidShape { radii },
            collision_radius,
            outer_radius,
        };
        (asteroid, Vec2::from_heading(heading) * speed)
    }
}

/// Kind-specific entity data
#[derive(Debug, Clone)]
pub enum EntityKind {
    Generic,
    Projectile(Projectile),
    Asteroid(Asteroid),
}

/// A world-owned moving object
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: ObjectId,
    pub pos: Vec2,
    pub vel: Vec2,
    pub kind: EntityKind,
}

impl Entity {
    pub fn projectile(id: ObjectId, owner: ActorId, pos: Vec2, vel: Vec2, lifetime: f32) -> Self {
        Self {
            id,
            pos,
            vel,
            kind: EntityKind::Projectile(Projectile {
                owner: Some(owner),
                remaining_life: lifetime,
            }),
        }
    }

    /// A new asteroid somewhere inside the arena
    pub fn asteroid<R: Rng + ?Sized>(id: ObjectId, arena: &ArenaSettings, rng: &mut R) -> Self {
        let half = arena.half_extent();
        let (asteroid, vel) = Asteroid::generate(rng);
        Self {
            id,
            pos: Vec2::new(rng.gen_range(-half..=half), rng.gen_range(-half..=half)),
            vel,
            kind: EntityKind::Asteroid(asteroid),
        }
    }

    /// Shared integrator plus kind-specific decay/spin
    pub fn tick(&mut self, dt: f32) {
        self.pos += self.vel * dt;
        match &mut self.kind {
            EntityKind::Generic => {}
            EntityKind::Projectile(projectile) => projectile.remaining_life -= dt,
            EntityKind::Asteroid(asteroid) => asteroid.heading += asteroid.angular_velocity * dt,
        }
    }

    pub fn as_projectile(&self) -> Option<&Projectile> {
        match &self.kind {
            EntityKind::Projectile(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_projectile_mut(&mut self) -> Option<&mut Projectile> {
        match &mut self.kind {
            EntityKind::Projectile(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_asteroid(&self) -> Option<&Asteroid> {
        match &self.kind {
            EntityKind::Asteroid(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_projectile(&self) -> bool {
        matches!(self.kind, EntityKind::Projectile(_))
    }

    pub fn is_asteroid(&self) -> bool {
        matches!(self.kind, EntityKind::Asteroid(_))
    }

    /// True once a projectile's life has run out. Other kinds never expire.
    pub fn expired(&self) -> bool {
        self.as_projectile()
            .map(|p| p.remaining_life <= 0.0)
            .unwrap_or(false)
    }

    /// True once an asteroid's silhouette has fully left the arena
    pub fn out_of_bounds(&self, arena: &ArenaSettings) -> bool {
        let Some(asteroid) = self.as_asteroid() else {
            return false;
        };
        let limit = arena.half_extent() + asteroid.outer_radius;
        self.pos.x < -limit || self.pos.x > limit || self.pos.y < -limit || self.pos.y > limit
    }

    /// Recycle an asteroid: new shape and velocity, placed just outside the
    /// edge it will drift in across.
    pub fn respawn_asteroid<R: Rng + ?Sized>(&mut self, arena: &ArenaSettings, rng: &mut R) {
        if !self.is_asteroid() {
            return;
        }

        let (asteroid, vel) = Asteroid::generate(rng);
        let half = arena.half_extent();
        let inset = asteroid.outer_radius - 2.0;
        let heading = normalize_angle(vel.x.atan2(vel.y));
        let along = rng.gen_range(-half..=half);

        self.pos = if (-FRAC_PI_4..=FRAC_PI_4).contains(&heading) {
            // moving +y, enter from the bottom edge
            Vec2::new(along, -half - inset)
        } else if (FRAC_PI_4..=3.0 * FRAC_PI_4).contains(&heading) {
            Vec2::new(-half - inset, along)
        } else if (-3.0 * FRAC_PI_4..=-FRAC_PI_4).contains(&heading) {
            Vec2::new(half + inset, along)
        } else {
            Vec2::new(along, half + inset)
        };
        self.vel = vel;
        self.kind = EntityKind::Asteroid(asteroid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn projectile_life_counts_down() {
        let mut p = Entity::projectile(ObjectId(1), ActorId(1), Vec2::ZERO, Vec2::new(0.0, 10.0), 2.5);
        let mut last = 2.5;
        for _ in 0..10 {
            p.tick(0.1);
            let life = p.as_projectile().unwrap().remaining_life;
            assert!(life < last);
            last = life;
        }
        assert!((p.pos.y - 10.0).abs() < 1e-4);
        assert!(!p.expired());
    }

    #[test]
    fn respawned_asteroids_keep_valid_shapes() {
        let arena = ArenaSettings::default();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut rock = Entity::asteroid(ObjectId(1), &arena, &mut rng);
        for _ in 0..500 {
            rock.respawn_asteroid(&arena, &mut rng);
            let a = rock.as_asteroid().unwrap();
            assert!(a.shape.radii.len() >= ASTEROID_MIN_POINTS);
            assert!(a.shape.radii.len() <= ASTEROID_MAX_POINTS);
            assert!(a.collision_radius < a.outer_radius);
            assert!(a.shape.radii.iter().all(|r| *r < a.outer_radius));
            let speed = rock.vel.length();
            assert!((ASTEROID_MIN_SPEED - 1e-3..=ASTEROID_MAX_SPEED + 1e-3).contains(&speed));
            assert!(!rock.out_of_bounds(&arena), "fresh spawn already out: {:?}", rock.pos);
        }
    }

    #[test]
    fn respawned_asteroid_drifts_back_into_arena() {
        let arena = ArenaSettings::default();
        let half = arena.half_extent();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut rock = Entity::asteroid(ObjectId(1), &arena, &mut rng);
        for _ in 0..100 {
            rock.respawn_asteroid(&arena, &mut rng);
            let outside_x = rock.pos.x.abs() > half;
            let outside_y = rock.pos.y.abs() > half;
            assert!(outside_x || outside_y);
            if outside_x {
                assert!(rock.pos.x.signum() != rock.vel.x.signum());
            } else {
                assert!(rock.pos.y.signum() != rock.vel.y.signum());
            }
        }
    }

    #[test]
    fn asteroid_leaving_arena_is_out_of_bounds() {
        let arena = ArenaSettings::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut rock = Entity::asteroid(ObjectId(1), &arena, &mut rng);
        let outer = rock.as_asteroid().unwrap().outer_radius;
        rock.pos = Vec2::new(arena.half_extent() + outer + 1.0, 0.0);
        assert!(rock.out_of_bounds(&arena));
    }
}
