//! Ship physics and movement constraints

use std::f32::consts::{PI, TAU};
use std::ops::{Add, AddAssign, Mul, MulAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::config::{ArenaSettings, SimSettings};

use super::ids::ActorId;

/// 2D vector in world units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector for a heading, using the arena's `(sin, cos)` convention
    pub fn from_heading(heading: f32) -> Self {
        Self::new(heading.sin(), heading.cos())
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl MulAssign<f32> for Vec2 {
    fn mul_assign(&mut self, rhs: f32) {
        self.x *= rhs;
        self.y *= rhs;
    }
}

/// Wrap an angle into (-pi, pi]
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle % TAU;
    if wrapped > PI {
        wrapped - TAU
    } else if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`, in (-pi, pi]
pub fn angle_difference(from: f32, to: f32) -> f32 {
    normalize_angle(normalize_angle(to) - normalize_angle(from))
}

/// Heading that points a ship's nose along `delta` (ships thrust along `-(sin, cos)`)
pub fn heading_towards(delta: Vec2) -> f32 {
    normalize_angle(delta.x.atan2(delta.y) + PI)
}

/// Another ship as seen by the separation pass
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub id: ActorId,
    pub pos: Vec2,
    pub health: i32,
}

/// Kinematic and weapon state of one ship
#[derive(Debug, Clone, Default)]
pub struct ShipBody {
    pub pos: Vec2,
    pub vel: Vec2,
    pub heading: f32,
    pub target_heading: f32,
    /// 0.0..=1.0
    pub thrust: f32,
    /// Seconds until the weapon is ready
    pub fire_cooldown: f32,
    /// Latched once the cooldown runs out, cleared by firing
    pub fire_ready: bool,
}

impl ShipBody {
    pub fn at(pos: Vec2, fire_rate: f32) -> Self {
        Self {
            pos,
            fire_cooldown: fire_rate,
            ..Self::default()
        }
    }
}

/// Physics system for updating ship positions and velocities
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Run the shared per-tick integrator for one ship.
    ///
    /// `neighbors` must not include the ship itself; `self_id` only breaks
    /// ties when two ships sit on exactly the same point.
    pub fn step_ship(
        ship: &mut ShipBody,
        self_id: ActorId,
        health: i32,
        neighbors: &[Neighbor],
        settings: &SimSettings,
        dt: f32,
    ) {
        Self::advance_cooldown(ship, dt);

        let ang_diff = angle_difference(ship.heading, ship.target_heading)
            .clamp(-settings.max_turn_step, settings.max_turn_step);

        ship.vel *= settings.drag;
        ship.heading += ang_diff * settings.turn_gain * ship.thrust * dt;
        ship.vel -= Vec2::from_heading(ship.heading) * (ship.thrust * dt * settings.thrust_force);

        ship.vel += Self::separation(ship, self_id, health, neighbors, settings, dt);

        Self::integrate(ship, &settings.arena, dt);
    }

    /// Count the weapon cooldown down and latch `fire_ready` once it expires
    pub fn advance_cooldown(ship: &mut ShipBody, dt: f32) {
        if ship.fire_cooldown > 0.0 {
            ship.fire_cooldown -= dt;
        }
        if ship.fire_cooldown <= 0.0 {
            ship.fire_cooldown = 0.0;
            ship.fire_ready = true;
        }
    }

    /// Repulsive velocity keeping ships at a health-scaled distance
    pub fn separation(
        ship: &ShipBody,
        self_id: ActorId,
        health: i32,
        neighbors: &[Neighbor],
        settings: &SimSettings,
        dt: f32,
    ) -> Vec2 {
        if dt <= 0.0 {
            return Vec2::ZERO;
        }

        let projected = ship.pos + ship.vel * dt;
        let mut force = Vec2::ZERO;

        for other in neighbors {
            let min_dist = settings.separation_distance(health, other.health);
            let delta = projected - other.pos;
            let dist = delta.length();
            if dist >= min_dist {
                continue;
            }

            let axis = if dist > f32::EPSILON {
                delta * (1.0 / dist)
            } else if self_id < other.id {
                Vec2::new(-1.0, 0.0)
            } else {
                Vec2::new(1.0, 0.0)
            };
            force += axis * ((min_dist - dist) / dt);
        }

        force
    }

    /// Move by velocity, stopping against and clamping to the arena walls
    pub fn integrate(ship: &mut ShipBody, arena: &ArenaSettings, dt: f32) {
        let half = arena.half_extent();

        if (ship.pos.x < -half && ship.vel.x < 0.0) || (ship.pos.x > half && ship.vel.x > 0.0) {
            ship.vel.x = 0.0;
        }
        if (ship.pos.y < -half && ship.vel.y < 0.0) || (ship.pos.y > half && ship.vel.y > 0.0) {
            ship.vel.y = 0.0;
        }

        ship.pos += ship.vel * dt;
        ship.pos.x = ship.pos.x.clamp(-half, half);
        ship.pos.y = ship.pos.y.clamp(-half, half);
    }

    /// Map a target distance through the deadzone/influence ramp
    pub fn thrust_for_distance(distance: f32, settings: &SimSettings) -> f32 {
        let zones = &settings.zones;
        let thrust = ((distance - zones.deadzone_radius) / zones.influence_radius).clamp(0.0, 1.0);
        if thrust <= settings.thrust_epsilon {
            0.0
        } else {
            thrust
        }
    }

    /// Check whether a point lies inside a circle
    pub fn within(point: Vec2, center: Vec2, radius: f32) -> bool {
        point.distance(center) <= radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_wraps_into_half_open_range() {
        assert!((normalize_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert!((normalize_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-5);
        assert!((normalize_angle(PI) - PI).abs() < 1e-5);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-5);
    }

    #[test]
    fn angle_difference_takes_short_way_round() {
        let diff = angle_difference(PI - 0.1, -PI + 0.1);
        assert!((diff - 0.2).abs() < 1e-4, "diff={}", diff);
        let diff = angle_difference(0.0, -0.5);
        assert!((diff + 0.5).abs() < 1e-5);
    }

    #[test]
    fn thrust_ramp_respects_deadzone() {
        let settings = SimSettings::default();
        assert_eq!(PhysicsSystem::thrust_for_distance(10.0, &settings), 0.0);
        assert_eq!(PhysicsSystem::thrust_for_distance(14.05, &settings), 0.0);
        assert!((PhysicsSystem::thrust_for_distance(46.0, &settings) - 0.5).abs() < 1e-5);
        assert_eq!(PhysicsSystem::thrust_for_distance(500.0, &settings), 1.0);
    }

    #[test]
    fn thrust_pushes_nose_first() {
        let settings = SimSettings::default();
        let mut ship = ShipBody::at(Vec2::ZERO, 0.25);
        ship.thrust = 1.0;
        PhysicsSystem::step_ship(&mut ship, ActorId(1), 4, &[], &settings, 1.0 / 60.0);
        // heading 0 thrusts towards -y
        assert!(ship.vel.y < 0.0);
        assert!(ship.pos.y < 0.0);
        assert_eq!(ship.vel.x, 0.0);
    }

    #[test]
    fn cooldown_latches_ready() {
        let mut ship = ShipBody::at(Vec2::ZERO, 0.25);
        PhysicsSystem::advance_cooldown(&mut ship, 0.2);
        assert!(!ship.fire_ready);
        PhysicsSystem::advance_cooldown(&mut ship, 0.1);
        assert!(ship.fire_ready);
        assert_eq!(ship.fire_cooldown, 0.0);
    }

    #[test]
    fn ships_stop_at_walls() {
        let settings = SimSettings::default();
        let half = settings.arena.half_extent();
        let mut ship = ShipBody::at(Vec2::new(half + 5.0, 0.0), 0.25);
        ship.vel = Vec2::new(100.0, 0.0);
        PhysicsSystem::integrate(&mut ship, &settings.arena, 0.1);
        assert_eq!(ship.vel.x, 0.0);
        assert_eq!(ship.pos.x, half);
    }

    #[test]
    fn coincident_ships_separate_in_opposite_directions() {
        let settings = SimSettings::default();
        let ship = ShipBody::at(Vec2::ZERO, 0.25);
        let a = PhysicsSystem::separation(
            &ship,
            ActorId(1),
            1,
            &[Neighbor { id: ActorId(2), pos: Vec2::ZERO, health: 1 }],
            &settings,
            0.1,
        );
        let b = PhysicsSystem::separation(
            &ship,
            ActorId(2),
            1,
            &[Neighbor { id: ActorId(1), pos: Vec2::ZERO, health: 1 }],
            &settings,
            0.1,
        );
        assert!(a.x < 0.0 && b.x > 0.0);
    }
}
