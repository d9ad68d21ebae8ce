//! Simulation tunables shared by the world, the scheduler and the wire protocol

use serde::{Deserialize, Serialize};

/// Axis-aligned arena centred on the origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArenaSettings {
    /// Grid cell edge length in world units
    pub cell_size: f32,
    /// Number of cells along each axis
    pub cell_count: u32,
}

impl ArenaSettings {
    /// Half the arena width (and height)
    pub fn half_extent(&self) -> f32 {
        self.cell_size * self.cell_count as f32 * 0.5
    }

    /// Length of the arena diagonal
    pub fn diagonal(&self) -> f32 {
        let side = self.half_extent() * 2.0;
        (side * side * 2.0).sqrt()
    }
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            cell_size: 96.0,
            cell_count: 64,
        }
    }
}

/// How the scheduler turns wall-clock time into simulation steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// Step once per tick with the measured wall-clock delta
    Measured,
    /// Step in fixed increments, carrying the remainder to the next tick
    Fixed,
}

impl std::str::FromStr for TickMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "measured" => Ok(Self::Measured),
            "fixed" => Ok(Self::Fixed),
            _ => Err(()),
        }
    }
}

/// Which victim a projectile resolves against when several overlap it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitPolicy {
    /// First match in iteration order (actors before asteroids)
    FirstMatch,
    /// Closest overlapping target across actors and asteroids
    Nearest,
}

impl std::str::FromStr for HitPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first_match" => Ok(Self::FirstMatch),
            "nearest" => Ok(Self::Nearest),
            _ => Err(()),
        }
    }
}

/// Nickname acceptance rules applied on login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicknamePolicy {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for NicknamePolicy {
    fn default() -> Self {
        Self {
            min_len: 2,
            max_len: 16,
        }
    }
}

/// Live population counts and the knobs admins may change at runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationSettings {
    pub bots: u32,
    pub agents: u32,
    pub asteroids: u32,
    /// Health an actor respawns with
    pub health: i32,
    /// Seconds between shots
    pub fire_rate: f32,
}

impl Default for PopulationSettings {
    fn default() -> Self {
        Self {
            bots: 16,
            agents: 8,
            asteroids: 10,
            health: 4,
            fire_rate: 0.25,
        }
    }
}

/// Partial update sent by an admin; absent fields are left unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, alias = "nets")]
    pub agents: Option<u32>,
    #[serde(default)]
    pub bots: Option<u32>,
    #[serde(default)]
    pub asteroids: Option<u32>,
    #[serde(default)]
    pub health: Option<i32>,
    #[serde(default, alias = "fireRate")]
    pub fire_rate: Option<f32>,
}

/// Thrust/steering control mapping for scripted actors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InfluenceZones {
    /// No thrust inside this distance
    pub deadzone_radius: f32,
    /// Distance over which thrust ramps from 0 to 1
    pub influence_radius: f32,
}

impl Default for InfluenceZones {
    fn default() -> Self {
        Self {
            deadzone_radius: 14.0,
            influence_radius: 64.0,
        }
    }
}

/// Agent scoring and feature normalisation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSettings {
    /// A target closer than this accrues `score_radius - distance` per tick
    pub score_radius: f32,
    /// Velocity components are clamped to +/- this before rescaling
    pub velocity_scale: f32,
    /// Added to the attacking agent's controller when it lands a non-lethal hit
    pub hit_reward: f32,
    /// Added to the attacking agent's controller when it lands a kill
    pub kill_reward: f32,
    /// Subtracted when a controller emits a non-finite heading
    pub divergence_penalty: f32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            score_radius: 512.0,
            velocity_scale: 5.0,
            hit_reward: 0.0,
            kill_reward: 0.0,
            divergence_penalty: 9999.0,
        }
    }
}

/// Everything the simulation needs to advance one tick
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub arena: ArenaSettings,
    pub zones: InfluenceZones,
    pub population: PopulationSettings,
    pub nicknames: NicknamePolicy,
    pub agent: AgentSettings,
    pub hit_policy: HitPolicy,

    /// Per-tick velocity multiplier
    pub drag: f32,
    /// Heading gain applied to the clamped angular difference
    pub turn_gain: f32,
    /// Largest angular difference (radians) considered in one step
    pub max_turn_step: f32,
    /// Thrust impulse per second at full thrust
    pub thrust_force: f32,
    /// Thrust values at or below this snap to zero
    pub thrust_epsilon: f32,
    /// Extra separation distance per point of health above one
    pub separation_per_health: f32,

    pub muzzle_speed: f32,
    pub projectile_lifetime: f32,
    /// Live projectile cap; the oldest is evicted beyond this
    pub max_projectiles: usize,
    /// Projectile-vs-ship hit radius is `hit_radius_base + hit_radius_per_health * health`
    pub hit_radius_base: f32,
    pub hit_radius_per_health: f32,

    /// Seconds a bot or agent stays dead before respawning
    pub bot_respawn_delay: f32,
    /// Asteroid distances are scaled by a random factor in `1 +/- jitter`
    pub asteroid_jitter: f32,
}

impl SimSettings {
    /// Smallest distance two ships with the given health try to keep
    pub fn separation_distance(&self, health_a: i32, health_b: i32) -> f32 {
        self.zones.deadzone_radius * 2.0
            + self.separation_per_health * (health_a - 1) as f32
            + self.separation_per_health * (health_b - 1) as f32
    }

    /// Projectile hit radius for a ship with the given health
    pub fn hit_radius(&self, health: i32) -> f32 {
        self.hit_radius_base + self.hit_radius_per_health * health as f32
    }
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            arena: ArenaSettings::default(),
            zones: InfluenceZones::default(),
            population: PopulationSettings::default(),
            nicknames: NicknamePolicy::default(),
            agent: AgentSettings::default(),
            hit_policy: HitPolicy::FirstMatch,
            drag: 0.875,
            turn_gain: 7.5,
            max_turn_step: 1.0,
            thrust_force: 1500.0,
            thrust_epsilon: 0.001,
            separation_per_health: 8.0,
            muzzle_speed: 1024.0,
            projectile_lifetime: 2.5,
            max_projectiles: 512,
            hit_radius_base: 6.0,
            hit_radius_per_health: 8.0,
            bot_respawn_delay: 2.0,
            asteroid_jitter: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separation_grows_with_health() {
        let settings = SimSettings::default();
        assert_eq!(settings.separation_distance(1, 1), 28.0);
        assert_eq!(settings.separation_distance(4, 1), 52.0);
    }

    #[test]
    fn arena_extent_matches_grid() {
        let arena = ArenaSettings::default();
        assert_eq!(arena.half_extent(), 3072.0);
    }

    #[test]
    fn patch_accepts_legacy_keys() {
        let patch: SettingsPatch = serde_json::from_str(r#"{"nets": 3, "fireRate": 0.5}"#).unwrap();
        assert_eq!(patch.agents, Some(3));
        assert_eq!(patch.fire_rate, Some(0.5));
        assert_eq!(patch.bots, None);
    }
}
