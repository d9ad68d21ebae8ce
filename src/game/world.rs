//! World state and per-tick orchestration
//!
//! The world owns every actor and entity. External commands are applied
//! through its methods between ticks; [`World::step`] advances one tick.
//! Messages produced along the way are queued in an outbox that the session
//! drains and hands to the transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{PopulationSettings, SettingsPatch, SimSettings};
use crate::ws::protocol::ServerMsg;

use super::actor::{Actor, ActorKind, Brain, Contact, DamageOutcome, Surroundings};
use super::agent::{AgentBrain, AgentController, ControllerPool, ScoredController};
use super::combat::{CombatSystem, HitRecord, HitTarget};
use super::entity::Entity;
use super::ids::{ActorId, IdAllocator, IdError, ObjectId};
use super::physics::{Neighbor, PhysicsSystem, Vec2};
use super::telemetry::Telemetry;
use super::timers::{DeferredAction, DeferredTasks};

pub const LOGIN_SUCCESS: &str = "Successfully logged in.";

/// Where an outbound message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Actor(ActorId),
    /// Every connected stats page
    Observers,
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Recipient,
    pub msg: ServerMsg,
}

/// Lifecycle faults. These indicate misuse of ids or actors and abort the
/// current operation.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Id(#[from] IdError),

    #[error("unknown actor {0}")]
    UnknownActor(ActorId),

    #[error("actor {0} is not a {1:?}")]
    WrongKind(ActorId, ActorKind),
}

/// Why a client command was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("no such actor")]
    UnknownActor,
    #[error("only humans may send this")]
    NotHuman,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("already logged in")]
    AlreadyLoggedIn,
    #[error("ship is dead")]
    Dead,
    #[error("ship is alive")]
    Alive,
    #[error("non-finite input")]
    InvalidInput,
    #[error("page already initialised")]
    PageAlreadyChosen,
    #[error("only valid on the stats page")]
    StatsPageOnly,
}

/// Nickname refusal, sent back verbatim in the login response
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("Nickname is too short")]
    TooShort,
    #[error("Nickname is too long")]
    TooLong,
    #[error("Nickname contains illegal characters")]
    IllegalCharacters,
    #[error("Nickname is already active")]
    AlreadyActive,
}

/// What happened during one [`World::step`]
#[derive(Debug, Default)]
pub struct StepReport {
    pub tick: u64,
    pub hits: Vec<HitRecord>,
    /// `(victim, killer)` pairs
    pub kills: Vec<(ActorId, ActorId)>,
    pub projectiles_fired: usize,
    pub projectiles_reaped: usize,
    pub asteroid_respawns: usize,
}

/// The authoritative simulation state
pub struct World {
    settings: SimSettings,
    actors: BTreeMap<ActorId, Actor>,
    entities: BTreeMap<ObjectId, Entity>,
    actor_ids: IdAllocator<ActorId>,
    object_ids: IdAllocator<ObjectId>,
    timers: DeferredTasks,
    rng: ChaCha8Rng,
    telemetry: Arc<dyn Telemetry>,
    outbox: Vec<Outbound>,
    tick: u64,
}

impl World {
    pub fn new(settings: SimSettings, rng: ChaCha8Rng, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            settings,
            actors: BTreeMap::new(),
            entities: BTreeMap::new(),
            actor_ids: IdAllocator::new(),
            object_ids: IdAllocator::new(),
            timers: DeferredTasks::new(),
            rng,
            telemetry,
            outbox: Vec::new(),
            tick: 0,
        }
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub fn actors(&self) -> &BTreeMap<ActorId, Actor> {
        &self.actors
    }

    pub fn entities(&self) -> &BTreeMap<ObjectId, Entity> {
        &self.entities
    }

    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.get_mut(&id)
    }

    pub fn actors_mut(&mut self) -> impl Iterator<Item = &mut Actor> {
        self.actors.values_mut()
    }

    pub fn entity(&self, id: ObjectId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: ObjectId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn telemetry(&self) -> &Arc<dyn Telemetry> {
        &self.telemetry
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn count_kind(&self, kind: ActorKind) -> usize {
        self.actors.values().filter(|a| a.kind() == kind).count()
    }

    pub fn is_respawn_pending(&self, id: ActorId) -> bool {
        self.timers.is_scheduled(id, DeferredAction::Respawn)
    }

    /// Messages produced since the last call
    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    // ------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------

    /// Register a new game connection as an unauthenticated human
    pub fn connect_human(&mut self) -> ActorId {
        let id = self.actor_ids.allocate();
        self.actors
            .insert(id, Actor::human(id, self.settings.population.fire_rate));
        info!(actor_id = %id, "Client connected");
        id
    }

    pub fn spawn_bot(&mut self) -> ActorId {
        self.spawn_automated(Brain::Bot)
    }

    pub fn spawn_agent(&mut self, controller: Box<dyn AgentController>) -> ActorId {
        self.spawn_automated(Brain::Agent(AgentBrain::new(controller)))
    }

    fn spawn_automated(&mut self, brain: Brain) -> ActorId {
        let id = self.actor_ids.allocate();
        let mut actor = Actor::automated(id, brain, self.settings.population.fire_rate);
        let session = Uuid::new_v4();
        self.telemetry
            .session_started(session, id, actor.display_name(), actor.kind());
        actor.session = Some(session);
        debug!(actor_id = %id, kind = ?actor.kind(), "Spawned automated actor");
        self.actors.insert(id, actor);
        self.respawn_actor(id, false);
        id
    }

    pub fn spawn_asteroid(&mut self) -> ObjectId {
        let id = self.object_ids.allocate();
        let asteroid = Entity::asteroid(id, &self.settings.arena, &mut self.rng);
        self.entities.insert(id, asteroid);
        id
    }

    /// Spawn a projectile, evicting the oldest live ones beyond the cap
    fn spawn_projectile(&mut self, owner: ActorId, pos: Vec2, vel: Vec2) -> Result<ObjectId, WorldError> {
        let live = self.entities.values().filter(|e| e.is_projectile()).count();
        if live >= self.settings.max_projectiles {
            let oldest: Vec<ObjectId> = {
                let mut projectiles: Vec<(f32, ObjectId)> = self
                    .entities
                    .values()
                    .filter_map(|e| e.as_projectile().map(|p| (p.remaining_life, e.id)))
                    .collect();
                projectiles.sort_by(|a, b| a.0.total_cmp(&b.0));
                projectiles
                    .into_iter()
                    .take(live + 1 - self.settings.max_projectiles)
                    .map(|(_, id)| id)
                    .collect()
            };
            for id in oldest {
                self.destroy_entity(id)?;
            }
            warn!(
                limit = self.settings.max_projectiles,
                "Projectile limit reached, evicted oldest"
            );
        }

        let id = self.object_ids.allocate();
        let projectile = Entity::projectile(id, owner, pos, vel, self.settings.projectile_lifetime);
        self.entities.insert(id, projectile);
        Ok(id)
    }

    fn destroy_entity(&mut self, id: ObjectId) -> Result<(), WorldError> {
        if self.entities.remove(&id).is_some() {
            self.object_ids.release(id)?;
        }
        Ok(())
    }

    /// Remove an actor for good: cancel its timers, orphan its projectiles,
    /// close its telemetry session and release its id.
    pub fn remove_actor(&mut self, id: ActorId) -> Result<Actor, WorldError> {
        let actor = self.actors.remove(&id).ok_or(WorldError::UnknownActor(id))?;

        let cancelled = self.timers.cancel(id);
        for projectile in self.entities.values_mut().filter_map(Entity::as_projectile_mut) {
            if projectile.owner == Some(id) {
                projectile.owner = None;
            }
        }
        if let Some(session) = actor.session {
            self.telemetry.session_ended(session);
        }
        self.actor_ids.release(id)?;

        debug!(actor_id = %id, cancelled_timers = cancelled, "Actor removed");
        Ok(actor)
    }

    /// Transport connection closed
    pub fn disconnect(&mut self, id: ActorId) -> Result<(), WorldError> {
        let actor = self.remove_actor(id)?;
        match &actor.nickname {
            Some(nick) if actor.authenticated => {
                info!(actor_id = %id, nickname = %nick, "Client has disconnected")
            }
            _ => info!(actor_id = %id, "Client has disconnected"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Client commands
    // ------------------------------------------------------------------

    fn human_mut(&mut self, id: ActorId) -> Result<&mut Actor, Rejection> {
        let actor = self.actors.get_mut(&id).ok_or(Rejection::UnknownActor)?;
        if actor.kind() != ActorKind::Human {
            return Err(Rejection::NotHuman);
        }
        Ok(actor)
    }

    /// Check a nickname against the length, charset and uniqueness rules
    pub fn validate_nickname(&self, nickname: &str) -> Result<(), LoginError> {
        let policy = &self.settings.nicknames;
        let len = nickname.chars().count();
        if len < policy.min_len {
            return Err(LoginError::TooShort);
        }
        if len > policy.max_len {
            return Err(LoginError::TooLong);
        }
        if !nickname.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LoginError::IllegalCharacters);
        }
        if self
            .actors
            .values()
            .any(|a| a.nickname.as_deref() == Some(nickname))
        {
            return Err(LoginError::AlreadyActive);
        }
        Ok(())
    }

    /// Attempt to log a connected human in. A refused nickname is answered
    /// with a failed login response, not a rejection.
    pub fn login(&mut self, id: ActorId, nickname: &str) -> Result<(), Rejection> {
        if self.human_mut(id)?.authenticated {
            return Err(Rejection::AlreadyLoggedIn);
        }

        if let Err(e) = self.validate_nickname(nickname) {
            info!(actor_id = %id, nickname = %nickname, reason = %e, "Login refused");
            self.send(
                id,
                ServerMsg::LoginResponse {
                    success: false,
                    message: e.to_string(),
                },
            );
            return Ok(());
        }

        let session = Uuid::new_v4();
        let actor = self.human_mut(id)?;
        actor.authenticated = true;
        actor.nickname = Some(nickname.to_string());
        actor.session = Some(session);
        self.telemetry
            .session_started(session, id, nickname, ActorKind::Human);
        self.respawn_actor(id, true);

        info!(actor_id = %id, nickname = %nickname, "Client logged in");
        self.send(
            id,
            ServerMsg::LoginResponse {
                success: true,
                message: LOGIN_SUCCESS.to_string(),
            },
        );
        self.notify_humans(format!("\"{}\" has joined.", nickname), None);
        Ok(())
    }

    pub fn chat(&mut self, id: ActorId, message: &str) -> Result<(), Rejection> {
        let actor = self.human_mut(id)?;
        if !actor.authenticated {
            return Err(Rejection::NotLoggedIn);
        }
        let sender = actor.display_name().to_string();
        info!(actor_id = %id, sender = %sender, message = %message, "Chat");
        let msg = ServerMsg::ChatMessage {
            sender,
            message: message.to_string(),
        };
        self.send_humans(msg, None);
        Ok(())
    }

    /// Steering input from a human; fires immediately when requested and ready
    pub fn player_update(
        &mut self,
        id: ActorId,
        target_heading: f32,
        thrust: f32,
        fire: bool,
    ) -> Result<(), Rejection> {
        if !target_heading.is_finite() || !thrust.is_finite() {
            return Err(Rejection::InvalidInput);
        }
        let fire_rate = self.settings.population.fire_rate;
        let muzzle_speed = self.settings.muzzle_speed;

        let actor = self.human_mut(id)?;
        if !actor.authenticated {
            return Err(Rejection::NotLoggedIn);
        }
        if !actor.alive {
            return Err(Rejection::Dead);
        }
        actor.steer(target_heading, thrust);
        let shot = if fire {
            let shot = actor.try_fire(fire_rate, muzzle_speed);
            if shot.is_none() {
                debug!(actor_id = %id, "Fire ignored, weapon cooling down");
            }
            shot
        } else {
            None
        };

        if let Some((pos, vel)) = shot {
            if let Err(e) = self.spawn_projectile(id, pos, vel) {
                error!(actor_id = %id, error = %e, "Failed to spawn projectile");
            }
        }
        Ok(())
    }

    /// Log out but keep the connection
    pub fn quit(&mut self, id: ActorId) -> Result<(), Rejection> {
        let actor = self.human_mut(id)?;
        if !actor.authenticated {
            return Err(Rejection::NotLoggedIn);
        }
        actor.authenticated = false;
        let nickname = actor.nickname.take().unwrap_or_default();
        let session = actor.session.take();

        if let Some(session) = session {
            self.telemetry.session_ended(session);
        }
        self.notify_humans(format!("{} has disconnected.", nickname), Some(id));
        Ok(())
    }

    pub fn respawn_request(&mut self, id: ActorId) -> Result<(), Rejection> {
        let actor = self.human_mut(id)?;
        if !actor.authenticated {
            return Err(Rejection::NotLoggedIn);
        }
        if actor.alive {
            return Err(Rejection::Alive);
        }
        self.respawn_actor(id, true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------

    /// Spawn whatever the configured population is missing
    pub fn populate(&mut self, pool: &mut dyn ControllerPool) {
        let population = self.settings.population;
        let asteroids = self.entities.values().filter(|e| e.is_asteroid()).count();
        for _ in asteroids..population.asteroids as usize {
            self.spawn_asteroid();
        }
        for _ in self.count_kind(ActorKind::Bot)..population.bots as usize {
            self.spawn_bot();
        }
        for _ in self.count_kind(ActorKind::Agent)..population.agents as usize {
            let controller = pool.spawn_controller();
            self.spawn_agent(controller);
        }
    }

    /// Patch population settings, growing or shrinking the world to match
    pub fn apply_settings(
        &mut self,
        patch: SettingsPatch,
        pool: &mut dyn ControllerPool,
    ) -> Result<PopulationSettings, WorldError> {
        if let Some(health) = patch.health {
            self.settings.population.health = health.max(1);
        }
        if let Some(rate) = patch.fire_rate.filter(|r| r.is_finite() && *r >= 0.0) {
            self.settings.population.fire_rate = rate;
        }
        if let Some(bots) = patch.bots {
            self.settings.population.bots = bots;
            self.trim_actors(ActorKind::Bot, bots as usize)?;
        }
        if let Some(agents) = patch.agents {
            self.settings.population.agents = agents;
            self.trim_actors(ActorKind::Agent, agents as usize)?;
        }
        if let Some(asteroids) = patch.asteroids {
            self.settings.population.asteroids = asteroids;
            let surplus: Vec<ObjectId> = self
                .entities
                .values()
                .filter(|e| e.is_asteroid())
                .map(|e| e.id)
                .collect();
            let excess = surplus.len().saturating_sub(asteroids as usize);
            for id in surplus.into_iter().take(excess) {
                self.destroy_entity(id)?;
            }
        }
        self.populate(pool);

        let population = self.settings.population;
        info!(
            bots = population.bots,
            agents = population.agents,
            asteroids = population.asteroids,
            health = population.health,
            fire_rate = population.fire_rate,
            "Applied new settings"
        );
        self.outbox.push(Outbound {
            to: Recipient::Observers,
            msg: ServerMsg::StatsSettings {
                settings: population,
            },
        });
        Ok(population)
    }

    /// Remove the lowest-id actors of `kind` until at most `keep` remain
    fn trim_actors(&mut self, kind: ActorKind, keep: usize) -> Result<(), WorldError> {
        let ids: Vec<ActorId> = self
            .actors
            .values()
            .filter(|a| a.kind() == kind)
            .map(|a| a.id)
            .collect();
        let excess = ids.len().saturating_sub(keep);
        for id in ids.into_iter().take(excess) {
            self.remove_actor(id)?;
        }
        Ok(())
    }

    /// Drop every actor and entity, wipe telemetry and rebuild the configured
    /// population. Returns the humans whose connections must be closed.
    pub fn reset(&mut self, pool: &mut dyn ControllerPool) -> Result<Vec<ActorId>, WorldError> {
        let ids: Vec<ActorId> = self.actors.keys().copied().collect();
        let mut humans = Vec::new();
        for id in ids {
            if self.remove_actor(id)?.kind() == ActorKind::Human {
                humans.push(id);
            }
        }
        let objects: Vec<ObjectId> = self.entities.keys().copied().collect();
        for id in objects {
            self.destroy_entity(id)?;
        }
        self.timers.clear();
        self.telemetry.clear();
        self.populate(pool);

        info!(disconnected = humans.len(), "World reset");
        Ok(humans)
    }

    /// Hand every agent's controller and reward to the pool, install the next
    /// generation and respawn the agents silently.
    pub fn end_evaluation(&mut self, pool: &mut dyn ControllerPool) -> usize {
        let mut agents = Vec::new();
        let mut scored = Vec::new();
        for actor in self.actors.values_mut() {
            let id = actor.id;
            let Some(agent) = actor.agent_mut() else {
                continue;
            };
            agents.push(id);
            let reward = agent.reward();
            if let Some(controller) = agent.take_controller() {
                scored.push(ScoredController {
                    actor_id: id,
                    reward,
                    controller,
                });
            }
        }
        if agents.is_empty() {
            return 0;
        }

        let mut next = pool.next_generation(scored).into_iter();
        for id in &agents {
            let controller = next.next().unwrap_or_else(|| pool.spawn_controller());
            if let Some(agent) = self.actors.get_mut(id).and_then(Actor::agent_mut) {
                agent.install(controller);
                agent.reset_reward();
            }
            self.timers.cancel(*id);
            self.respawn_actor(*id, false);
        }
        agents.len()
    }

    // ------------------------------------------------------------------
    // Lifecycle helpers
    // ------------------------------------------------------------------

    fn random_position(&mut self) -> Vec2 {
        let half = self.settings.arena.half_extent();
        Vec2::new(
            self.rng.gen_range(-half..=half),
            self.rng.gen_range(-half..=half),
        )
    }

    fn respawn_actor(&mut self, id: ActorId, announce: bool) {
        let pos = self.random_position();
        let health = self.settings.population.health;
        let Some(actor) = self.actors.get_mut(&id) else {
            return;
        };
        actor.respawn(pos, health);
        let name = actor.display_name().to_string();
        if let Some(session) = actor.session {
            self.telemetry.instance_started(session);
        }
        if announce {
            self.notify_humans(format!("{} has respawned.", name), Some(id));
        }
    }

    /// Death side effects once `victim`'s health reached zero
    fn kill(&mut self, victim: ActorId, killer: ActorId) -> Result<(), WorldError> {
        let killer_name = self
            .actors
            .get(&killer)
            .map(|a| a.display_name().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let actor = self.actors.get(&victim).ok_or(WorldError::UnknownActor(victim))?;
        let victim_name = actor.display_name().to_string();
        let kind = actor.kind();
        let session = actor.session;

        self.notify_humans(
            format!("{} was killed by {}", victim_name, killer_name),
            Some(victim),
        );
        if kind == ActorKind::Human {
            self.send(
                victim,
                ServerMsg::UpdateDeath {
                    killer: killer_name,
                    killer_id: killer,
                },
            );
        }

        let owned: Vec<ObjectId> = self
            .entities
            .values()
            .filter(|e| e.as_projectile().is_some_and(|p| p.owner == Some(victim)))
            .map(|e| e.id)
            .collect();
        for id in owned {
            self.destroy_entity(id)?;
        }

        if let Some(session) = session {
            self.telemetry.instance_ended(session);
        }
        if kind != ActorKind::Human {
            self.timers
                .schedule(victim, DeferredAction::Respawn, self.settings.bot_respawn_delay);
        }
        Ok(())
    }

    fn send(&mut self, to: ActorId, msg: ServerMsg) {
        self.outbox.push(Outbound {
            to: Recipient::Actor(to),
            msg,
        });
    }

    /// Queue `msg` for every connected human except `except`
    fn send_humans(&mut self, msg: ServerMsg, except: Option<ActorId>) {
        let targets: Vec<ActorId> = self
            .actors
            .values()
            .filter(|a| a.kind() == ActorKind::Human && Some(a.id) != except)
            .map(|a| a.id)
            .collect();
        for id in targets {
            self.send(id, msg.clone());
        }
    }

    fn notify_humans(&mut self, message: String, except: Option<ActorId>) {
        info!(tick = self.tick, "{}", message);
        self.send_humans(ServerMsg::SystemMessage { message }, except);
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the world by `dt` seconds: due timers, actors, entities,
    /// collisions, then reaping.
    pub fn step(&mut self, dt: f32) -> Result<StepReport, WorldError> {
        self.tick += 1;
        let mut report = StepReport {
            tick: self.tick,
            ..StepReport::default()
        };

        self.run_timers(dt);
        report.projectiles_fired = self.step_actors(dt)?;
        report.asteroid_respawns = self.step_entities(dt);
        self.resolve_collisions(&mut report)?;
        report.projectiles_reaped = self.reap()?;

        Ok(report)
    }

    fn run_timers(&mut self, dt: f32) {
        for (id, action) in self.timers.advance(dt) {
            match action {
                DeferredAction::Respawn => {
                    if self.actors.get(&id).is_some_and(|a| !a.alive) {
                        self.respawn_actor(id, true);
                    }
                }
            }
        }
    }

    /// Derive input, fire and integrate every active actor. Returns shots fired.
    fn step_actors(&mut self, dt: f32) -> Result<usize, WorldError> {
        let contacts: Vec<Contact> = self
            .actors
            .values()
            .filter(|a| a.is_active())
            .map(Actor::contact)
            .collect();
        let asteroids: Vec<Vec2> = self
            .entities
            .values()
            .filter(|e| e.is_asteroid())
            .map(|e| e.pos)
            .collect();

        let fire_rate = self.settings.population.fire_rate;
        let mut shots = Vec::new();

        for actor in self.actors.values_mut() {
            if !actor.is_active() {
                continue;
            }
            let id = actor.id;
            let others: Vec<Contact> = contacts.iter().filter(|c| c.id != id).copied().collect();
            let surroundings = Surroundings {
                contacts: &others,
                asteroids: &asteroids,
            };

            if let Some(input) =
                actor
                    .brain
                    .derive_input(&actor.ship, &surroundings, &self.settings, &mut self.rng)
            {
                actor.steer(input.target_heading, input.thrust);
                if input.fire {
                    if let Some(shot) = actor.try_fire(fire_rate, self.settings.muzzle_speed) {
                        shots.push((id, shot));
                    }
                }
            }

            let neighbors: Vec<Neighbor> = others
                .iter()
                .map(|c| Neighbor {
                    id: c.id,
                    pos: c.pos,
                    health: c.health,
                })
                .collect();
            PhysicsSystem::step_ship(&mut actor.ship, id, actor.health, &neighbors, &self.settings, dt);

            if let Brain::Agent(agent) = &mut actor.brain {
                agent.accrue(&actor.ship, &surroundings, &self.settings);
            }
        }

        let fired = shots.len();
        for (owner, (pos, vel)) in shots {
            self.spawn_projectile(owner, pos, vel)?;
        }
        Ok(fired)
    }

    /// Move every entity and recycle asteroids that drifted out. Returns recycles.
    fn step_entities(&mut self, dt: f32) -> usize {
        let arena = self.settings.arena;
        let mut recycled = 0;
        for entity in self.entities.values_mut() {
            entity.tick(dt);
            if entity.out_of_bounds(&arena) {
                entity.respawn_asteroid(&arena, &mut self.rng);
                recycled += 1;
            }
        }
        recycled
    }

    fn resolve_collisions(&mut self, report: &mut StepReport) -> Result<(), WorldError> {
        let projectiles: Vec<ObjectId> = self
            .entities
            .values()
            .filter(|e| e.is_projectile() && !e.expired())
            .map(|e| e.id)
            .collect();

        for pid in projectiles {
            // a kill earlier in this pass may have destroyed it
            let Some(projectile) = self.entities.get(&pid) else {
                continue;
            };
            let Some(target) =
                CombatSystem::find_hit(projectile, &self.actors, &self.entities, &self.settings)
            else {
                continue;
            };
            let projectile_pos = projectile.pos;
            if let Some(p) = self.entities.get_mut(&pid).and_then(Entity::as_projectile_mut) {
                p.remaining_life = 0.0;
            }

            match target {
                HitTarget::Ship { victim, shooter } => {
                    let record = self.resolve_ship_hit(pid, shooter, victim, projectile_pos)?;
                    if record.target_killed {
                        report.kills.push((victim, shooter));
                    }
                    report.hits.push(record);
                }
                HitTarget::Asteroid(rock) => {
                    let arena = self.settings.arena;
                    if let Some(entity) = self.entities.get_mut(&rock) {
                        entity.respawn_asteroid(&arena, &mut self.rng);
                        report.asteroid_respawns += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_ship_hit(
        &mut self,
        projectile_id: ObjectId,
        shooter: ActorId,
        victim: ActorId,
        projectile_pos: Vec2,
    ) -> Result<HitRecord, WorldError> {
        let (shooter_pos, shooter_session) = self
            .actors
            .get(&shooter)
            .map(|a| (a.ship.pos, a.session))
            .ok_or(WorldError::UnknownActor(shooter))?;
        let target = self
            .actors
            .get_mut(&victim)
            .ok_or(WorldError::UnknownActor(victim))?;
        let target_pos = target.ship.pos;
        let target_session = target.session;
        let outcome = target.damage();

        let record = HitRecord {
            projectile_id,
            shooter_id: shooter,
            target_id: victim,
            projectile_pos,
            shooter_pos,
            target_pos,
            target_killed: outcome == DamageOutcome::Killed,
        };
        debug!(
            object_id = %record.projectile_id,
            shooter_id = %record.shooter_id,
            target_id = %record.target_id,
            killed = record.target_killed,
            "Projectile hit"
        );

        if let (Some(s), Some(t)) = (shooter_session, target_session) {
            self.telemetry.hit(s, t, &record);
        }

        let reward = match outcome {
            DamageOutcome::Survived => self.settings.agent.hit_reward,
            DamageOutcome::Killed => self.settings.agent.kill_reward,
            DamageOutcome::Ignored => 0.0,
        };
        if let Some(agent) = self.actors.get_mut(&shooter).and_then(Actor::agent_mut) {
            agent.add_reward(reward);
        }

        if outcome == DamageOutcome::Killed {
            self.kill(victim, shooter)?;
        }
        Ok(record)
    }

    /// Remove projectiles whose life ran out. Returns how many were reaped.
    fn reap(&mut self) -> Result<usize, WorldError> {
        let expired: Vec<ObjectId> = self
            .entities
            .values()
            .filter(|e| e.expired())
            .map(|e| e.id)
            .collect();
        for id in &expired {
            self.destroy_entity(*id)?;
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;
    use crate::game::agent::FixedControllerPool;
    use crate::game::telemetry::SessionStats;
    use rand::SeedableRng;

    fn world() -> World {
        World::new(
            SimSettings::default(),
            ChaCha8Rng::seed_from_u64(42),
            Arc::new(SessionStats::new()),
        )
    }

    fn logged_in(world: &mut World, nick: &str) -> ActorId {
        let id = world.connect_human();
        world.login(id, nick).unwrap();
        world.take_outbox();
        id
    }

    fn messages_for(outbox: &[Outbound], id: ActorId) -> Vec<&ServerMsg> {
        outbox
            .iter()
            .filter(|o| o.to == Recipient::Actor(id))
            .map(|o| &o.msg)
            .collect()
    }

    #[test]
    fn login_rules() {
        let mut world = world();
        let a = logged_in(&mut world, "alice");
        let b = world.connect_human();

        for (nick, expected) in [
            ("a", LoginError::TooShort),
            ("abcdefghijklmnopq", LoginError::TooLong),
            ("bad name", LoginError::IllegalCharacters),
            ("alice", LoginError::AlreadyActive),
        ] {
            world.login(b, nick).unwrap();
            let out = world.take_outbox();
            match messages_for(&out, b).as_slice() {
                [ServerMsg::LoginResponse { success, message }] => {
                    assert!(!success);
                    assert_eq!(message, &expected.to_string());
                }
                other => panic!("unexpected {:?}", other),
            }
            assert!(!world.actor(b).unwrap().authenticated);
        }

        assert_eq!(world.login(a, "again"), Err(Rejection::AlreadyLoggedIn));
    }

    #[test]
    fn successful_login_spawns_and_announces() {
        let mut world = world();
        let watcher = world.connect_human();
        let id = world.connect_human();
        world.login(id, "bob").unwrap();

        let actor = world.actor(id).unwrap();
        assert!(actor.is_active());
        assert_eq!(actor.health, 4);

        let out = world.take_outbox();
        assert!(messages_for(&out, id).iter().any(|m| matches!(
            m,
            ServerMsg::LoginResponse { success: true, message } if message == LOGIN_SUCCESS
        )));
        assert!(messages_for(&out, watcher).iter().any(|m| matches!(
            m,
            ServerMsg::SystemMessage { message } if message == "\"bob\" has joined."
        )));
    }

    #[test]
    fn commands_from_logged_out_humans_are_rejected() {
        let mut world = world();
        let id = world.connect_human();
        assert_eq!(world.chat(id, "hi"), Err(Rejection::NotLoggedIn));
        assert_eq!(world.player_update(id, 0.0, 1.0, true), Err(Rejection::NotLoggedIn));
        assert_eq!(world.quit(id), Err(Rejection::NotLoggedIn));
        let bot = world.spawn_bot();
        assert_eq!(world.chat(bot, "hi"), Err(Rejection::NotHuman));
    }

    #[test]
    fn firing_spawns_a_projectile_once_per_cooldown() {
        let mut world = world();
        let id = logged_in(&mut world, "alice");
        world.actor_mut(id).unwrap().ship.fire_ready = true;

        world.player_update(id, 0.0, 0.0, true).unwrap();
        world.player_update(id, 0.0, 0.0, true).unwrap();
        let shots = world.entities().values().filter(|e| e.is_projectile()).count();
        assert_eq!(shots, 1);
    }

    #[test]
    fn quit_logs_out_and_frees_the_nickname() {
        let mut world = world();
        let id = logged_in(&mut world, "alice");
        world.quit(id).unwrap();
        let actor = world.actor(id).unwrap();
        assert!(!actor.authenticated);
        assert!(actor.nickname.is_none());
        assert!(world.validate_nickname("alice").is_ok());
    }

    #[test]
    fn lethal_hit_kills_and_schedules_bot_respawn() {
        let mut world = world();
        let shooter = logged_in(&mut world, "alice");
        let bot = world.spawn_bot();
        {
            let actor = world.actor_mut(bot).unwrap();
            actor.health = 1;
            actor.ship.pos = Vec2::new(500.0, 500.0);
        }
        world.actor_mut(shooter).unwrap().ship.pos = Vec2::new(-500.0, -500.0);
        let pid = world
            .spawn_projectile(shooter, Vec2::new(500.0, 500.0), Vec2::ZERO)
            .unwrap();
        // a second shot of the victim must be destroyed by the kill
        let victim_shot = world
            .spawn_projectile(bot, Vec2::new(0.0, 2000.0), Vec2::ZERO)
            .unwrap();

        let report = world.resolve_collisions_for_test();
        assert_eq!(report.kills, vec![(bot, shooter)]);
        assert!(!world.actor(bot).unwrap().alive);
        assert!(world.entity(victim_shot).is_none());
        assert!(world.entity(pid).unwrap().expired());
        assert!(world.is_respawn_pending(bot));

        let out = world.take_outbox();
        assert!(messages_for(&out, shooter).iter().any(|m| matches!(
            m,
            ServerMsg::SystemMessage { message } if message == "Bot 2 was killed by alice"
        )));
    }

    #[test]
    fn human_death_sends_private_notice() {
        let mut world = world();
        let shooter = world.spawn_bot();
        let victim = logged_in(&mut world, "alice");
        world.actor_mut(victim).unwrap().health = 1;
        world.actor_mut(victim).unwrap().ship.pos = Vec2::new(100.0, 100.0);
        world.actor_mut(shooter).unwrap().ship.pos = Vec2::new(-900.0, -900.0);
        world
            .spawn_projectile(shooter, Vec2::new(100.0, 100.0), Vec2::ZERO)
            .unwrap();

        world.resolve_collisions_for_test();
        let out = world.take_outbox();
        assert!(messages_for(&out, victim).iter().any(|m| matches!(
            m,
            ServerMsg::UpdateDeath { killer_id, .. } if *killer_id == shooter
        )));
        assert!(!world.is_respawn_pending(victim));
        assert_eq!(world.respawn_request(victim), Ok(()));
        assert!(world.actor(victim).unwrap().alive);
    }

    #[test]
    fn disconnect_orphans_projectiles_and_cancels_timers() {
        let mut world = world();
        let bot = world.spawn_bot();
        let pid = world.spawn_projectile(bot, Vec2::ZERO, Vec2::ZERO).unwrap();
        world.actor_mut(bot).unwrap().alive = false;
        world.timers.schedule(bot, DeferredAction::Respawn, 1.0);

        world.remove_actor(bot).unwrap();
        assert!(!world.is_respawn_pending(bot));
        assert_eq!(world.entity(pid).unwrap().as_projectile().unwrap().owner, None);
        assert!(matches!(world.disconnect(bot), Err(WorldError::UnknownActor(_))));
    }

    #[test]
    fn projectile_cap_evicts_oldest() {
        let mut world = World::new(
            SimSettings {
                max_projectiles: 2,
                ..SimSettings::default()
            },
            ChaCha8Rng::seed_from_u64(1),
            Arc::new(SessionStats::new()),
        );
        let bot = world.spawn_bot();
        let first = world.spawn_projectile(bot, Vec2::ZERO, Vec2::ZERO).unwrap();
        world.entity_mut(first).unwrap().as_projectile_mut().unwrap().remaining_life = 0.5;
        let second = world.spawn_projectile(bot, Vec2::ZERO, Vec2::ZERO).unwrap();
        let third = world.spawn_projectile(bot, Vec2::ZERO, Vec2::ZERO).unwrap();

        // the evicted id is the first one reissued
        assert_eq!(third, first);
        assert_eq!(world.entity(third).unwrap().as_projectile().unwrap().remaining_life, 2.5);
        assert!(world.entity(second).is_some());
        assert_eq!(world.entities().values().filter(|e| e.is_projectile()).count(), 2);
    }

    #[test]
    fn apply_settings_grows_and_shrinks_population() {
        let mut world = world();
        let mut pool = FixedControllerPool::new(ChaCha8Rng::seed_from_u64(3));
        world.populate(&mut pool);
        assert_eq!(world.count_kind(ActorKind::Bot), 16);
        assert_eq!(world.count_kind(ActorKind::Agent), 8);

        let patch = SettingsPatch {
            bots: Some(2),
            agents: Some(10),
            asteroids: Some(3),
            ..SettingsPatch::default()
        };
        let population = world.apply_settings(patch, &mut pool).unwrap();
        assert_eq!(population.bots, 2);
        assert_eq!(world.count_kind(ActorKind::Bot), 2);
        assert_eq!(world.count_kind(ActorKind::Agent), 10);
        assert_eq!(world.entities().values().filter(|e| e.is_asteroid()).count(), 3);
        assert!(world
            .take_outbox()
            .iter()
            .any(|o| o.to == Recipient::Observers));
    }

    #[test]
    fn reset_returns_humans_and_rebuilds() {
        let mut world = world();
        let mut pool = FixedControllerPool::new(ChaCha8Rng::seed_from_u64(3));
        world.populate(&mut pool);
        let human = logged_in(&mut world, "alice");

        let closed = world.reset(&mut pool).unwrap();
        assert_eq!(closed, vec![human]);
        assert_eq!(world.count_kind(ActorKind::Human), 0);
        assert_eq!(world.count_kind(ActorKind::Bot), 16);
    }

    #[test]
    fn evaluation_swaps_controllers_and_resets_reward() {
        let mut world = world();
        let mut pool = FixedControllerPool::new(ChaCha8Rng::seed_from_u64(3));
        let agent = world.spawn_agent(pool.spawn_controller());
        world.actor_mut(agent).unwrap().agent_mut().unwrap().add_reward(50.0);

        assert_eq!(world.end_evaluation(&mut pool), 1);
        let brain = world.actor(agent).unwrap().agent().unwrap();
        assert_eq!(brain.reward(), 0.0);
        assert_eq!(pool.generation(), 1);
        assert!(world.actor(agent).unwrap().alive);
    }

    #[test]
    fn shot_asteroid_respawns_and_projectile_is_removed() {
        let mut world = world();
        let shooter = world.spawn_bot();
        world.actor_mut(shooter).unwrap().ship.pos = Vec2::new(-900.0, -900.0);
        let rock = world.spawn_asteroid();
        let (old_pos, old_shape) = {
            let entity = world.entity(rock).unwrap();
            (entity.pos, entity.as_asteroid().unwrap().shape.clone())
        };

        let pid = world.spawn_projectile(shooter, old_pos, Vec2::ZERO).unwrap();
        let report = world.resolve_collisions_for_test();
        assert_eq!(report.asteroid_respawns, 1);
        assert!(report.hits.is_empty());

        assert_eq!(world.reap().unwrap(), 1);
        assert!(world.entity(pid).is_none());

        let entity = world.entity(rock).unwrap();
        assert_ne!(entity.pos, old_pos);
        assert_ne!(entity.as_asteroid().unwrap().shape, old_shape);
    }

    #[test]
    fn agent_is_credited_for_hits_and_kills() {
        let settings = SimSettings {
            agent: AgentSettings {
                hit_reward: 7.0,
                kill_reward: 20.0,
                ..AgentSettings::default()
            },
            ..SimSettings::default()
        };
        let mut world = World::new(
            settings,
            ChaCha8Rng::seed_from_u64(42),
            Arc::new(SessionStats::new()),
        );
        let mut pool = FixedControllerPool::new(ChaCha8Rng::seed_from_u64(3));
        let agent = world.spawn_agent(pool.spawn_controller());
        world.actor_mut(agent).unwrap().ship.pos = Vec2::new(-500.0, -500.0);
        let bot = world.spawn_bot();
        {
            let actor = world.actor_mut(bot).unwrap();
            actor.health = 2;
            actor.ship.pos = Vec2::new(500.0, 500.0);
        }
        let reward = |world: &World| world.actor(agent).unwrap().agent().unwrap().reward();

        world
            .spawn_projectile(agent, Vec2::new(500.0, 500.0), Vec2::ZERO)
            .unwrap();
        let report = world.resolve_collisions_for_test();
        assert_eq!(report.hits.len(), 1);
        assert!(report.kills.is_empty());
        assert_eq!(reward(&world), 7.0);

        world.reap().unwrap();
        world
            .spawn_projectile(agent, Vec2::new(500.0, 500.0), Vec2::ZERO)
            .unwrap();
        let report = world.resolve_collisions_for_test();
        assert_eq!(report.kills, vec![(bot, agent)]);
        assert_eq!(reward(&world), 27.0);
        assert!(!world.actor(bot).unwrap().alive);
    }

    impl World {
        fn resolve_collisions_for_test(&mut self) -> StepReport {
            let mut report = StepReport::default();
            self.resolve_collisions(&mut report).unwrap();
            report
        }
    }
}
