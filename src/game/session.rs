//! Game session task: the authoritative tick loop
//!
//! Owns the [`World`] and is its only writer. Transport handlers talk to it
//! through [`SessionHandle`]; queued commands are drained at the start of
//! every tick so no step observes a half-applied command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, TickMode};
use crate::util::rate_limit::CHAT_SPAM_WINDOW;
use crate::ws::hub::ClientLink;
use crate::ws::protocol::{ClientMsg, ClientSettings, ServerMsg};

use super::actor::ActorKind;
use super::agent::ControllerPool;
use super::clock::{SyncClock, TickClock};
use super::ids::{ActorId, ObserverId};
use super::snapshot::SnapshotBuilder;
use super::world::{Recipient, Rejection, World};

/// Outbound side of the transport
pub trait Transport: Send + Sync {
    /// Route messages for `actor_id` to a freshly connected client
    fn attach(&self, actor_id: ActorId, link: ClientLink);

    /// Forget and close the client bound to `actor_id`
    fn detach(&self, actor_id: ActorId);

    /// Must not block; a full or closed client queue drops the message
    fn send(&self, to: ActorId, msg: ServerMsg);

    fn send_observer(&self, to: ObserverId, msg: ServerMsg);

    fn broadcast_observers(&self, msg: ServerMsg);
}

/// Inbound commands queued for the next tick
#[derive(Debug)]
pub enum Command {
    /// A game page connected
    Connect {
        link: ClientLink,
        reply: oneshot::Sender<ActorId>,
    },
    /// A message from a game page
    Client {
        actor_id: ActorId,
        conn_id: Uuid,
        msg: ClientMsg,
    },
    Disconnect {
        actor_id: ActorId,
        conn_id: Uuid,
    },
    /// A stats page connected
    ObserverJoined { observer_id: ObserverId },
    /// A message from a stats page
    Admin {
        observer_id: ObserverId,
        msg: ClientMsg,
    },
}

/// Errors talking to the session task
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("game session has stopped")]
    Closed,
}

/// Counters published by the session for health reporting
#[derive(Debug, Default)]
pub struct SessionGauges {
    ticks: AtomicU64,
    actors: AtomicUsize,
    entities: AtomicUsize,
    humans: AtomicUsize,
}

impl SessionGauges {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn actors(&self) -> usize {
        self.actors.load(Ordering::Relaxed)
    }

    pub fn entities(&self) -> usize {
        self.entities.load(Ordering::Relaxed)
    }

    pub fn humans(&self) -> usize {
        self.humans.load(Ordering::Relaxed)
    }
}

/// Handle to the running session
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<Command>,
    pub gauges: Arc<SessionGauges>,
}

impl SessionHandle {
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Register a game connection and wait for its actor id
    pub async fn connect(&self, link: ClientLink) -> Result<ActorId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { link, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Scheduler settings taken from [`Config`]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tick_interval: Duration,
    pub sync_interval: Duration,
    pub tick_mode: TickMode,
    pub telemetry_interval: Duration,
    pub evaluation_interval: Duration,
    pub tick_rate: u32,
    pub sync_rate: u32,
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            sync_interval: config.sync_interval(),
            tick_mode: config.tick_mode,
            telemetry_interval: config.telemetry_interval,
            evaluation_interval: config.evaluation_interval,
            tick_rate: config.tick_rate,
            sync_rate: config.sync_rate,
        }
    }
}

/// The authoritative game session
pub struct GameSession {
    config: SessionConfig,
    world: World,
    pool: Box<dyn ControllerPool>,
    transport: Arc<dyn Transport>,
    command_rx: mpsc::Receiver<Command>,
    /// Live game connections; commands from any other connection are stale
    connections: HashMap<ActorId, Uuid>,
    tick_clock: TickClock,
    sync_clock: SyncClock,
    gauges: Arc<SessionGauges>,
}

impl GameSession {
    pub fn new(
        config: SessionConfig,
        world: World,
        pool: Box<dyn ControllerPool>,
        transport: Arc<dyn Transport>,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(1024);
        let gauges = Arc::new(SessionGauges::default());

        let handle = SessionHandle {
            command_tx,
            gauges: gauges.clone(),
        };

        let session = Self {
            tick_clock: TickClock::new(config.tick_mode, config.tick_interval.as_secs_f32()),
            sync_clock: SyncClock::new(config.sync_interval.as_secs_f32()),
            config,
            world,
            pool,
            transport,
            command_rx,
            connections: HashMap::new(),
            gauges,
        };

        (session, handle)
    }

    /// Run until every [`SessionHandle`] is dropped
    pub async fn run(mut self) {
        info!(
            tick_rate = self.config.tick_rate,
            sync_rate = self.config.sync_rate,
            mode = ?self.config.tick_mode,
            "Game session started"
        );

        let mut tick_interval = interval(self.config.tick_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut telemetry_interval = interval(self.config.telemetry_interval);
        telemetry_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let evaluation = self.config.evaluation_interval;
        let mut evaluation_interval = interval_at(Instant::now() + evaluation, evaluation);
        evaluation_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let measured = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    if !self.process_commands() {
                        break;
                    }
                    self.run_tick(measured);
                }
                _ = telemetry_interval.tick() => {
                    let summary = self.world.telemetry().summary();
                    self.transport.broadcast_observers(ServerMsg::StatsUpdate { summary });
                }
                _ = evaluation_interval.tick() => {
                    let agents = self.world.end_evaluation(self.pool.as_mut());
                    debug!(agents, "Evaluation window closed");
                    self.dispatch_outbox();
                }
            }
        }

        info!(ticks = self.world.tick_count(), "Game session stopped");
    }

    /// Drain queued commands. Returns false once every handle is gone.
    fn process_commands(&mut self) -> bool {
        loop {
            match self.command_rx.try_recv() {
                Ok(command) => self.handle_command(command),
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { link, reply } => {
                let actor_id = self.world.connect_human();
                self.connections.insert(actor_id, link.conn_id);
                self.transport.attach(actor_id, link);
                self.transport.send(
                    actor_id,
                    ServerMsg::SettingsInit {
                        settings: self.client_settings(),
                    },
                );
                if reply.send(actor_id).is_err() {
                    // handler went away before hearing back
                    self.drop_connection(actor_id);
                }
            }
            Command::Client {
                actor_id,
                conn_id,
                msg,
            } => {
                if self.connections.get(&actor_id) != Some(&conn_id) {
                    debug!(actor_id = %actor_id, "Dropping command from stale connection");
                    return;
                }
                if let Err(reason) = self.handle_client(actor_id, msg) {
                    debug!(actor_id = %actor_id, reason = %reason, "Ignored client command");
                }
            }
            Command::Disconnect { actor_id, conn_id } => {
                if self.connections.get(&actor_id) == Some(&conn_id) {
                    self.drop_connection(actor_id);
                }
            }
            Command::ObserverJoined { observer_id } => {
                info!(observer_id = %observer_id, "Stats page connected");
                self.transport.send_observer(
                    observer_id,
                    ServerMsg::StatsSettings {
                        settings: self.world.settings().population,
                    },
                );
            }
            Command::Admin { observer_id, msg } => self.handle_admin(observer_id, msg),
        }
    }

    fn handle_client(&mut self, actor_id: ActorId, msg: ClientMsg) -> Result<(), Rejection> {
        match msg {
            ClientMsg::LoginAttempt { nickname } => self.world.login(actor_id, &nickname),
            ClientMsg::ChatMessage { text } => self.world.chat(actor_id, &text),
            ClientMsg::PlayerUpdate {
                target_heading,
                thrust,
                fire,
            } => self
                .world
                .player_update(actor_id, target_heading, thrust, fire),
            ClientMsg::QuitAttempt => self.world.quit(actor_id),
            ClientMsg::RespawnAttempt => self.world.respawn_request(actor_id),
            ClientMsg::PageInit { .. } => Err(Rejection::PageAlreadyChosen),
            ClientMsg::ApplySettings { .. } | ClientMsg::ResetStats | ClientMsg::GetSessions => {
                Err(Rejection::StatsPageOnly)
            }
        }
    }

    fn handle_admin(&mut self, observer_id: ObserverId, msg: ClientMsg) {
        match msg {
            ClientMsg::ApplySettings { settings } => {
                if let Err(e) = self.world.apply_settings(settings, self.pool.as_mut()) {
                    error!(observer_id = %observer_id, error = %e, "Failed to apply settings");
                }
            }
            ClientMsg::ResetStats => match self.world.reset(self.pool.as_mut()) {
                Ok(closed) => {
                    for actor_id in closed {
                        self.connections.remove(&actor_id);
                        self.transport.detach(actor_id);
                    }
                }
                Err(e) => error!(observer_id = %observer_id, error = %e, "World reset failed"),
            },
            ClientMsg::GetSessions => {
                let sessions = self.world.telemetry().export();
                self.transport
                    .broadcast_observers(ServerMsg::Sessions { sessions });
            }
            other => {
                debug!(observer_id = %observer_id, msg = ?other, "Ignored stats page message");
            }
        }
    }

    fn drop_connection(&mut self, actor_id: ActorId) {
        self.connections.remove(&actor_id);
        self.transport.detach(actor_id);
        if let Err(e) = self.world.disconnect(actor_id) {
            error!(actor_id = %actor_id, error = %e, "Disconnect failed");
        }
    }

    /// Settings handed to every game page on connect
    pub fn client_settings(&self) -> ClientSettings {
        let settings = self.world.settings();
        ClientSettings {
            arena: settings.arena,
            tick_rate: self.config.tick_rate,
            sync_rate: self.config.sync_rate,
            chat_spam_ms: CHAT_SPAM_WINDOW.as_millis() as u64,
            min_nickname_len: settings.nicknames.min_len,
            max_nickname_len: settings.nicknames.max_len,
            population: settings.population,
        }
    }

    fn run_tick(&mut self, measured: f32) {
        if self.tick_clock.is_overloaded(measured) {
            warn!(
                tick = self.world.tick_count(),
                tick_ms = measured * 1000.0,
                target_ms = self.config.tick_interval.as_secs_f32() * 1000.0,
                "Heavy load detected"
            );
        }

        for dt in self.tick_clock.steps(measured) {
            match self.world.step(dt) {
                Ok(report) => {
                    if !report.kills.is_empty() {
                        debug!(
                            tick = report.tick,
                            hits = report.hits.len(),
                            kills = report.kills.len(),
                            "Combat resolved"
                        );
                    }
                }
                Err(e) => {
                    // keep simulating; mutations applied before the fault stand
                    error!(tick = self.world.tick_count(), error = %e, "Tick aborted");
                }
            }
        }

        self.dispatch_outbox();

        if self.sync_clock.advance(measured) {
            for (actor_id, msg) in SnapshotBuilder::build(&mut self.world) {
                self.transport.send(actor_id, msg);
            }
        }

        self.publish_gauges();
    }

    fn dispatch_outbox(&mut self) {
        for outbound in self.world.take_outbox() {
            match outbound.to {
                Recipient::Actor(actor_id) => self.transport.send(actor_id, outbound.msg),
                Recipient::Observers => self.transport.broadcast_observers(outbound.msg),
            }
        }
    }

    fn publish_gauges(&self) {
        self.gauges
            .ticks
            .store(self.world.tick_count(), Ordering::Relaxed);
        self.gauges
            .actors
            .store(self.world.actors().len(), Ordering::Relaxed);
        self.gauges
            .entities
            .store(self.world.entities().len(), Ordering::Relaxed);
        self.gauges
            .humans
            .store(self.world.count_kind(ActorKind::Human), Ordering::Relaxed);
    }
}
