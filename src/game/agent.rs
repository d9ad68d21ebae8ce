//! Controller-driven agents
//!
//! The decision function and the population it comes from belong to an
//! external evolution process. This module defines the contracts the world
//! calls through, the per-tick feature vector, and a small linear controller
//! used when no trained population is supplied.

use std::f32::consts::TAU;

use rand::Rng;
use tracing::info;

use crate::config::SimSettings;

use super::actor::{ActorKind, Contact, ControlInput, Surroundings};
use super::ids::ActorId;
use super::physics::{ShipBody, Vec2};

/// Number of inputs handed to a controller each tick
pub const FEATURE_COUNT: usize = 6;

pub type Features = [f32; FEATURE_COUNT];

/// Decision function plus a reward accumulator owned by the evolution process
pub trait AgentController: Send {
    /// Map the normalised feature vector to a target heading in radians
    fn decide(&mut self, features: &Features) -> f32;

    fn reward(&self) -> f32;

    fn add_reward(&mut self, amount: f32);

    fn reset_reward(&mut self);
}

/// A controller and the reward it earned during the last evaluation window
pub struct ScoredController {
    pub actor_id: ActorId,
    pub reward: f32,
    pub controller: Box<dyn AgentController>,
}

/// Source of controllers for agents (the evolution collaborator)
pub trait ControllerPool: Send {
    /// Controller for a newly spawned agent
    fn spawn_controller(&mut self) -> Box<dyn AgentController>;

    /// Score the finished generation and hand back one controller per entry,
    /// in the same order
    fn next_generation(&mut self, scored: Vec<ScoredController>) -> Vec<Box<dyn AgentController>>;
}

/// Agent brain: the controller slot plus the opponent it last tracked
pub struct AgentBrain {
    controller: Option<Box<dyn AgentController>>,
    target: Option<ActorId>,
}

impl std::fmt::Debug for AgentBrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBrain")
            .field("reward", &self.reward())
            .field("target", &self.target)
            .finish()
    }
}

impl AgentBrain {
    pub fn new(controller: Box<dyn AgentController>) -> Self {
        Self {
            controller: Some(controller),
            target: None,
        }
    }

    pub fn reward(&self) -> f32 {
        self.controller.as_ref().map(|c| c.reward()).unwrap_or(0.0)
    }

    pub fn add_reward(&mut self, amount: f32) {
        if let Some(controller) = self.controller.as_mut() {
            controller.add_reward(amount);
        }
    }

    pub fn reset_reward(&mut self) {
        if let Some(controller) = self.controller.as_mut() {
            controller.reset_reward();
        }
    }

    pub fn take_controller(&mut self) -> Option<Box<dyn AgentController>> {
        self.controller.take()
    }

    pub fn install(&mut self, controller: Box<dyn AgentController>) {
        self.controller = Some(controller);
        self.target = None;
    }

    pub fn target(&self) -> Option<ActorId> {
        self.target
    }

    /// Pick the nearest opponent, ask the controller for a heading, and fire
    /// whenever the weapon is ready. Thrust is always full.
    pub fn derive_input(
        &mut self,
        ship: &ShipBody,
        surroundings: &Surroundings<'_>,
        settings: &SimSettings,
    ) -> ControlInput {
        let opponent = nearest_opponent(ship.pos, surroundings.contacts);
        self.target = opponent.map(|c| c.id);

        let mut target_heading = ship.target_heading;
        if let Some(controller) = self.controller.as_mut() {
            let features = features(ship, opponent, settings);
            let output = controller.decide(&features);
            if output.is_infinite() {
                controller.add_reward(-settings.agent.divergence_penalty);
            } else if !output.is_nan() {
                target_heading = output;
            }
        }

        ControlInput {
            target_heading,
            thrust: 1.0,
            fire: ship.fire_ready,
        }
    }

    /// Reward for keeping the tracked opponent within the scoring radius
    pub fn accrue(&mut self, ship: &ShipBody, surroundings: &Surroundings<'_>, settings: &SimSettings) {
        let Some(target) = self.target else {
            return;
        };
        let Some(contact) = surroundings.contacts.iter().find(|c| c.id == target) else {
            return;
        };
        let dist = ship.pos.distance(contact.pos);
        if dist < settings.agent.score_radius {
            self.add_reward(settings.agent.score_radius - dist);
        }
    }
}

/// Agents hunt humans and bots, never other agents
fn nearest_opponent<'a>(pos: Vec2, contacts: &'a [Contact]) -> Option<&'a Contact> {
    contacts
        .iter()
        .filter(|c| c.kind != ActorKind::Agent)
        .min_by(|a, b| pos.distance(a.pos).total_cmp(&pos.distance(b.pos)))
}

/// Build the six normalised inputs: own velocity, opponent velocity,
/// bearing to opponent and distance to opponent, each in `[0, 1]`
pub fn features(ship: &ShipBody, opponent: Option<&Contact>, settings: &SimSettings) -> Features {
    let scale = settings.agent.velocity_scale;
    let norm_vel = |v: f32| (v.clamp(-scale, scale) + scale) / (2.0 * scale);

    let (tvx, tvy, bearing, dist) = match opponent {
        Some(contact) => {
            let delta = contact.pos - ship.pos;
            let dist = delta.length();
            let bearing = if dist > 0.0 {
                let a = (delta.x / dist).clamp(-1.0, 1.0).acos();
                let a = if delta.y < 0.0 { TAU - a } else { a };
                a / TAU
            } else {
                0.0
            };
            let dist = (dist / settings.arena.diagonal()).clamp(0.0, 1.0);
            (norm_vel(contact.vel.x), norm_vel(contact.vel.y), bearing, dist)
        }
        None => (0.0, 0.0, 0.0, 0.0),
    };

    [norm_vel(ship.vel.x), norm_vel(ship.vel.y), tvx, tvy, bearing, dist]
}

/// Weighted sum of the features scaled onto a heading
#[derive(Debug, Clone)]
pub struct LinearController {
    weights: Features,
    bias: f32,
    reward: f32,
}

impl LinearController {
    pub fn new(weights: Features, bias: f32) -> Self {
        Self {
            weights,
            bias,
            reward: 0.0,
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut weights = [0.0; FEATURE_COUNT];
        for w in weights.iter_mut() {
            *w = rng.gen_range(-1.0..1.0);
        }
        Self::new(weights, rng.gen_range(-1.0..1.0))
    }
}

impl AgentController for LinearController {
    fn decide(&mut self, features: &Features) -> f32 {
        let sum: f32 = self
            .weights
            .iter()
            .zip(features.iter())
            .map(|(w, f)| w * f)
            .sum::<f32>()
            + self.bias;
        sum.tanh() * std::f32::consts::PI
    }

    fn reward(&self) -> f32 {
        self.reward
    }

    fn add_reward(&mut self, amount: f32) {
        self.reward += amount;
    }

    fn reset_reward(&mut self) {
        self.reward = 0.0;
    }
}

/// Stand-in pool: random linear controllers that are kept across generations
pub struct FixedControllerPool<R: Rng + Send> {
    rng: R,
    generation: u64,
}

impl<R: Rng + Send> FixedControllerPool<R> {
    pub fn new(rng: R) -> Self {
        Self { rng, generation: 0 }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<R: Rng + Send> ControllerPool for FixedControllerPool<R> {
    fn spawn_controller(&mut self) -> Box<dyn AgentController> {
        Box::new(LinearController::random(&mut self.rng))
    }

    fn next_generation(&mut self, scored: Vec<ScoredController>) -> Vec<Box<dyn AgentController>> {
        if !scored.is_empty() {
            let average = scored.iter().map(|s| s.reward).sum::<f32>() / scored.len() as f32;
            let fittest = scored.iter().map(|s| s.reward).fold(f32::MIN, f32::max);
            info!(
                generation = self.generation,
                agents = scored.len(),
                average = average.round(),
                fittest = fittest.round(),
                "Agent generation evaluated"
            );
        }
        self.generation += 1;
        scored.into_iter().map(|s| s.controller).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    struct Constant(f32, f32);

    impl AgentController for Constant {
        fn decide(&mut self, _features: &Features) -> f32 {
            self.0
        }
        fn reward(&self) -> f32 {
            self.1
        }
        fn add_reward(&mut self, amount: f32) {
            self.1 += amount;
        }
        fn reset_reward(&mut self) {
            self.1 = 0.0;
        }
    }

    fn contact(id: u32, kind: ActorKind, pos: Vec2, vel: Vec2) -> Contact {
        Contact {
            id: ActorId(id),
            kind,
            pos,
            vel,
            health: 4,
        }
    }

    #[test]
    fn features_are_normalised() {
        let settings = SimSettings::default();
        let mut ship = ShipBody::at(Vec2::new(100.0, -40.0), 0.25);
        ship.vel = Vec2::new(300.0, -2.5);
        let opp = contact(2, ActorKind::Bot, Vec2::new(-900.0, 700.0), Vec2::new(-1.0, 50.0));
        let f = features(&ship, Some(&opp), &settings);
        assert!(f.iter().all(|v| (0.0..=1.0).contains(v)), "{:?}", f);
        assert_eq!(f[0], 1.0);
        assert!((f[1] - 0.25).abs() < 1e-5);
        assert!((f[2] - 0.4).abs() < 1e-5);
    }

    #[test]
    fn agents_ignore_other_agents() {
        let settings = SimSettings::default();
        let ship = ShipBody::at(Vec2::ZERO, 0.25);
        let contacts = [
            contact(2, ActorKind::Agent, Vec2::new(10.0, 0.0), Vec2::ZERO),
            contact(3, ActorKind::Human, Vec2::new(300.0, 0.0), Vec2::ZERO),
        ];
        let mut brain = AgentBrain::new(Box::new(Constant(1.0, 0.0)));
        let input = brain.derive_input(&ship, &Surroundings { contacts: &contacts, asteroids: &[] }, &settings);
        assert_eq!(brain.target(), Some(ActorId(3)));
        assert_eq!(input.thrust, 1.0);
        assert_eq!(input.target_heading, 1.0);
    }

    #[test]
    fn divergent_output_is_penalised() {
        let settings = SimSettings::default();
        let ship = ShipBody::at(Vec2::ZERO, 0.25);
        let mut brain = AgentBrain::new(Box::new(Constant(f32::INFINITY, 0.0)));
        let input = brain.derive_input(&ship, &Surroundings { contacts: &[], asteroids: &[] }, &settings);
        assert_eq!(input.target_heading, 0.0);
        assert_eq!(brain.reward(), -settings.agent.divergence_penalty);
    }

    #[test]
    fn reward_accrues_inside_score_radius() {
        let settings = SimSettings::default();
        let ship = ShipBody::at(Vec2::ZERO, 0.25);
        let contacts = [contact(3, ActorKind::Bot, Vec2::new(112.0, 0.0), Vec2::ZERO)];
        let surroundings = Surroundings { contacts: &contacts, asteroids: &[] };
        let mut brain = AgentBrain::new(Box::new(Constant(0.0, 0.0)));
        brain.derive_input(&ship, &surroundings, &settings);
        brain.accrue(&ship, &surroundings, &settings);
        assert!((brain.reward() - 400.0).abs() < 1e-3);
        brain.reset_reward();
        assert_eq!(brain.reward(), 0.0);
    }

    #[test]
    fn fixed_pool_returns_controllers_in_order() {
        let mut pool = FixedControllerPool::new(ChaCha8Rng::seed_from_u64(1));
        let scored = vec![
            ScoredController { actor_id: ActorId(1), reward: 5.0, controller: Box::new(Constant(1.0, 5.0)) },
            ScoredController { actor_id: ActorId(2), reward: 1.0, controller: Box::new(Constant(2.0, 1.0)) },
        ];
        let mut next = pool.next_generation(scored);
        assert_eq!(next.len(), 2);
        assert_eq!(next[1].decide(&[0.0; FEATURE_COUNT]), 2.0);
        assert_eq!(pool.generation(), 1);
    }
}
