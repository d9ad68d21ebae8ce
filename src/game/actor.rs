//! Ships and the brains that steer them

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SimSettings;

use super::agent::AgentBrain;
use super::ids::ActorId;
use super::physics::{heading_towards, PhysicsSystem, ShipBody, Vec2};

/// Who drives an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Human,
    Bot,
    Agent,
}

/// Steering decision for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInput {
    pub target_heading: f32,
    pub thrust: f32,
    pub fire: bool,
}

/// Another active ship as seen by a brain
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    pub id: ActorId,
    pub kind: ActorKind,
    pub pos: Vec2,
    pub vel: Vec2,
    pub health: i32,
}

/// What a brain may look at when choosing its input
pub struct Surroundings<'a> {
    /// Active actors other than the one deciding
    pub contacts: &'a [Contact],
    /// Positions of live asteroids
    pub asteroids: &'a [Vec2],
}

/// Input derivation strategy, invoked before the shared integrator
#[derive(Debug)]
pub enum Brain {
    /// Driven by transport messages; nothing to derive
    Human,
    Bot,
    Agent(AgentBrain),
}

impl Brain {
    pub fn kind(&self) -> ActorKind {
        match self {
            Brain::Human => ActorKind::Human,
            Brain::Bot => ActorKind::Bot,
            Brain::Agent(_) => ActorKind::Agent,
        }
    }

    /// `None` means keep whatever input the actor already holds
    pub fn derive_input<R: Rng + ?Sized>(
        &mut self,
        ship: &ShipBody,
        surroundings: &Surroundings<'_>,
        settings: &SimSettings,
        rng: &mut R,
    ) -> Option<ControlInput> {
        match self {
            Brain::Human => None,
            Brain::Bot => Some(bot_input(ship, surroundings, settings, rng)),
            Brain::Agent(agent) => Some(agent.derive_input(ship, surroundings, settings)),
        }
    }
}

/// Chase the nearest ship, or failing that the (jittered) nearest asteroid.
/// With nothing to chase the bot idles.
pub fn bot_input<R: Rng + ?Sized>(
    ship: &ShipBody,
    surroundings: &Surroundings<'_>,
    settings: &SimSettings,
    rng: &mut R,
) -> ControlInput {
    let nearest_ship = surroundings
        .contacts
        .iter()
        .map(|c| c.pos - ship.pos)
        .min_by(|a, b| a.length().total_cmp(&b.length()));

    let target = nearest_ship.or_else(|| {
        let jitter = settings.asteroid_jitter;
        surroundings
            .asteroids
            .iter()
            .map(|pos| {
                let scaled = ship.pos.distance(*pos) * rng.gen_range(1.0 - jitter..=1.0 + jitter);
                (scaled, *pos - ship.pos)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, delta)| delta)
    });

    match target {
        Some(delta) => ControlInput {
            target_heading: heading_towards(delta),
            thrust: PhysicsSystem::thrust_for_distance(delta.length(), settings),
            fire: ship.fire_ready,
        },
        None => ControlInput {
            target_heading: ship.target_heading,
            thrust: 0.0,
            fire: ship.fire_ready,
        },
    }
}

/// Result of a single point of damage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    Survived,
    Killed,
    /// Target was already dead
    Ignored,
}

/// A player-controlled ship (authoritative)
#[derive(Debug)]
pub struct Actor {
    pub id: ActorId,
    pub brain: Brain,
    /// Login name for humans, generated for bots and agents
    pub nickname: Option<String>,
    /// Telemetry session, present while authenticated
    pub session: Option<Uuid>,
    pub ship: ShipBody,
    pub health: i32,
    pub alive: bool,
    pub authenticated: bool,
    /// `fire_ready` value last sent to this actor's client
    pub sent_fire_ready: bool,
}

impl Actor {
    /// A freshly connected, not yet logged-in human
    pub fn human(id: ActorId, fire_rate: f32) -> Self {
        Self {
            id,
            brain: Brain::Human,
            nickname: None,
            session: None,
            ship: ShipBody::at(Vec2::ZERO, fire_rate),
            health: 0,
            alive: false,
            authenticated: false,
            sent_fire_ready: false,
        }
    }

    /// A scripted or controller-driven actor; authenticated from birth
    pub fn automated(id: ActorId, brain: Brain, fire_rate: f32) -> Self {
        let prefix = match brain.kind() {
            ActorKind::Agent => "Net",
            _ => "Bot",
        };
        Self {
            id,
            nickname: Some(format!("{} {}", prefix, id)),
            brain,
            session: None,
            ship: ShipBody::at(Vec2::ZERO, fire_rate),
            health: 0,
            alive: false,
            authenticated: true,
            sent_fire_ready: false,
        }
    }

    pub fn kind(&self) -> ActorKind {
        self.brain.kind()
    }

    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or("Unknown")
    }

    /// Simulated and targetable
    pub fn is_active(&self) -> bool {
        self.alive && self.authenticated
    }

    pub fn contact(&self) -> Contact {
        Contact {
            id: self.id,
            kind: self.kind(),
            pos: self.ship.pos,
            vel: self.ship.vel,
            health: self.health,
        }
    }

    pub fn agent_mut(&mut self) -> Option<&mut AgentBrain> {
        match &mut self.brain {
            Brain::Agent(agent) => Some(agent),
            _ => None,
        }
    }

    pub fn agent(&self) -> Option<&AgentBrain> {
        match &self.brain {
            Brain::Agent(agent) => Some(agent),
            _ => None,
        }
    }

    /// Store steering input; thrust is clamped into `[0, 1]`
    pub fn steer(&mut self, target_heading: f32, thrust: f32) {
        self.ship.target_heading = target_heading;
        self.ship.thrust = thrust.clamp(0.0, 1.0);
    }

    /// Consume `fire_ready` and return the projectile's spawn position and velocity
    pub fn try_fire(&mut self, fire_rate: f32, muzzle_speed: f32) -> Option<(Vec2, Vec2)> {
        if !self.is_active() || !self.ship.fire_ready {
            return None;
        }
        self.ship.fire_cooldown = fire_rate;
        self.ship.fire_ready = false;
        let vel = Vec2::from_heading(std::f32::consts::PI + self.ship.heading) * muzzle_speed;
        Some((self.ship.pos, vel))
    }

    /// Remove one point of health, flipping to dead at zero
    pub fn damage(&mut self) -> DamageOutcome {
        if !self.alive {
            return DamageOutcome::Ignored;
        }
        self.health = (self.health - 1).max(0);
        if self.health == 0 {
            self.alive = false;
            DamageOutcome::Killed
        } else {
            DamageOutcome::Survived
        }
    }

    pub fn respawn(&mut self, pos: Vec2, health: i32) {
        self.health = health.max(1);
        self.alive = true;
        self.ship.pos = pos;
        self.ship.vel = Vec2::ZERO;
        self.ship.thrust = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn live_bot(id: u32) -> Actor {
        let mut bot = Actor::automated(ActorId(id), Brain::Bot, 0.25);
        bot.respawn(Vec2::ZERO, 4);
        bot
    }

    #[test]
    fn health_never_goes_negative() {
        let mut actor = live_bot(1);
        let outcomes: Vec<_> = (0..6).map(|_| actor.damage()).collect();
        assert_eq!(outcomes[2], DamageOutcome::Survived);
        assert_eq!(outcomes[3], DamageOutcome::Killed);
        assert_eq!(outcomes[4], DamageOutcome::Ignored);
        assert_eq!(actor.health, 0);
        assert!(!actor.alive);
    }

    #[test]
    fn dead_actors_cannot_fire() {
        let mut actor = live_bot(1);
        actor.ship.fire_ready = true;
        actor.alive = false;
        assert!(actor.try_fire(0.25, 1024.0).is_none());
        assert!(actor.ship.fire_ready);
    }

    #[test]
    fn firing_resets_cooldown_and_aims_backwards_from_heading() {
        let mut actor = live_bot(1);
        actor.ship.fire_ready = true;
        let (pos, vel) = actor.try_fire(0.25, 1024.0).unwrap();
        assert_eq!(pos, Vec2::ZERO);
        assert!((vel.y + 1024.0).abs() < 1e-2);
        assert!(!actor.ship.fire_ready);
        assert_eq!(actor.ship.fire_cooldown, 0.25);
        assert!(actor.try_fire(0.25, 1024.0).is_none());
    }

    #[test]
    fn bot_without_targets_idles() {
        let settings = SimSettings::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ship = ShipBody::at(Vec2::ZERO, 0.25);
        ship.thrust = 1.0;
        let input = bot_input(&ship, &Surroundings { contacts: &[], asteroids: &[] }, &settings, &mut rng);
        assert_eq!(input.thrust, 0.0);
    }

    #[test]
    fn bot_prefers_ships_over_closer_asteroids() {
        let settings = SimSettings::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let ship = ShipBody::at(Vec2::ZERO, 0.25);
        let contacts = [Contact {
            id: ActorId(2),
            kind: ActorKind::Human,
            pos: Vec2::new(500.0, 0.0),
            vel: Vec2::ZERO,
            health: 4,
        }];
        let asteroids = [Vec2::new(0.0, 50.0)];
        let input = bot_input(&ship, &Surroundings { contacts: &contacts, asteroids: &asteroids }, &settings, &mut rng);
        assert_eq!(input.thrust, 1.0);
        // nose points along -(sin, cos), so facing +x needs heading -pi/2
        assert!((input.target_heading + std::f32::consts::FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn bot_chases_asteroid_when_alone() {
        let settings = SimSettings::default();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let ship = ShipBody::at(Vec2::ZERO, 0.25);
        let asteroids = [Vec2::new(0.0, 1000.0)];
        let input = bot_input(&ship, &Surroundings { contacts: &[], asteroids: &asteroids }, &settings, &mut rng);
        assert_eq!(input.thrust, 1.0);
        assert!((input.target_heading.abs() - std::f32::consts::PI).abs() < 1e-5);
    }
}
