//! Session and hit telemetry
//!
//! The world reports lifecycle and hit events through [`Telemetry`]; calls
//! must return immediately. [`SessionStats`] keeps a bounded window of it in
//! memory for the statistics page.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actor::ActorKind;
use super::combat::HitRecord;
use super::ids::ActorId;
use super::physics::Vec2;

/// Sink for simulation telemetry
pub trait Telemetry: Send + Sync {
    fn session_started(&self, session: Uuid, actor_id: ActorId, name: &str, kind: ActorKind);
    /// A new life (spawn) within a session
    fn instance_started(&self, session: Uuid);
    fn instance_ended(&self, session: Uuid);
    fn session_ended(&self, session: Uuid);
    fn hit(&self, shooter: Uuid, target: Uuid, record: &HitRecord);
    fn clear(&self);
    fn summary(&self) -> TelemetrySummary;
    fn export(&self) -> HashMap<Uuid, SessionExport>;
}

/// Counters pushed periodically to observers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub active_humans: usize,
    pub active_bots: usize,
    pub active_agents: usize,
    pub total_hits: usize,
}

/// Per-life numbers in a session export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceExport {
    pub dealt: usize,
    pub taken: usize,
    /// Seconds alive (so far, if still alive)
    pub lifetime: f64,
    pub hits: Vec<HitExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub id: Uuid,
    pub actor_id: ActorId,
    pub name: String,
    pub kind: ActorKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub instances: Vec<InstanceExport>,
}

/// One landed shot, stored on the shooter's instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitExport {
    /// Victim session
    pub target: Uuid,
    pub target_pos: Vec2,
    pub origin_pos: Vec2,
    pub projectile_pos: Vec2,
    pub time: DateTime<Utc>,
}

/// Lives kept per session; the oldest are dropped first
pub const MAX_INSTANCES_PER_SESSION: usize = 64;

/// Ended sessions kept for export; the earliest ended are dropped first
pub const MAX_ENDED_SESSIONS: usize = 256;

#[derive(Debug, Clone)]
struct Instance {
    hits: Vec<HitExport>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct SessionRecord {
    actor_id: ActorId,
    name: String,
    kind: ActorKind,
    instances: VecDeque<Instance>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Store {
    sessions: HashMap<Uuid, SessionRecord>,
    /// Ended sessions in the order they ended
    ended: VecDeque<Uuid>,
    /// Lifetime counters, unaffected by pruning
    total_sessions: usize,
    total_hits: usize,
}

impl Store {
    fn prune_ended(&mut self) {
        while self.ended.len() > MAX_ENDED_SESSIONS {
            if let Some(id) = self.ended.pop_front() {
                self.sessions.remove(&id);
            }
        }
    }
}

/// In-memory telemetry store
#[derive(Debug, Default)]
pub struct SessionStats {
    store: Mutex<Store>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Telemetry for SessionStats {
    fn session_started(&self, session: Uuid, actor_id: ActorId, name: &str, kind: ActorKind) {
        let mut store = self.store.lock();
        store.total_sessions += 1;
        store.sessions.insert(
            session,
            SessionRecord {
                actor_id,
                name: name.to_string(),
                kind,
                instances: VecDeque::new(),
                start: Utc::now(),
                end: None,
            },
        );
    }

    fn instance_started(&self, session: Uuid) {
        if let Some(record) = self.store.lock().sessions.get_mut(&session) {
            if record.instances.len() >= MAX_INSTANCES_PER_SESSION {
                record.instances.pop_front();
            }
            record.instances.push_back(Instance {
                hits: Vec::new(),
                start: Utc::now(),
                end: None,
            });
        }
    }

    fn instance_ended(&self, session: Uuid) {
        if let Some(instance) = self
            .store
            .lock()
            .sessions
            .get_mut(&session)
            .and_then(|r| r.instances.back_mut())
        {
            instance.end.get_or_insert_with(Utc::now);
        }
    }

    fn session_ended(&self, session: Uuid) {
        let mut store = self.store.lock();
        let Some(record) = store.sessions.get_mut(&session) else {
            return;
        };
        if record.end.is_some() {
            return;
        }
        let now = Utc::now();
        record.end = Some(now);
        if let Some(instance) = record.instances.back_mut() {
            instance.end.get_or_insert(now);
        }
        store.ended.push_back(session);
        store.prune_ended();
    }

    fn hit(&self, shooter: Uuid, target: Uuid, record: &HitRecord) {
        let mut store = self.store.lock();
        store.total_hits += 1;
        if let Some(instance) = store
            .sessions
            .get_mut(&shooter)
            .and_then(|r| r.instances.back_mut())
        {
            instance.hits.push(HitExport {
                target,
                target_pos: record.target_pos,
                origin_pos: record.shooter_pos,
                projectile_pos: record.projectile_pos,
                time: Utc::now(),
            });
        }
    }

    fn clear(&self) {
        *self.store.lock() = Store::default();
    }

    fn summary(&self) -> TelemetrySummary {
        let store = self.store.lock();
        let mut summary = TelemetrySummary {
            total_sessions: store.total_sessions,
            total_hits: store.total_hits,
            ..TelemetrySummary::default()
        };
        for record in store.sessions.values() {
            if record.end.is_some() {
                continue;
            }
            summary.active_sessions += 1;
            match record.kind {
                ActorKind::Human => summary.active_humans += 1,
                ActorKind::Bot => summary.active_bots += 1,
                ActorKind::Agent => summary.active_agents += 1,
            }
        }
        summary
    }

    fn export(&self) -> HashMap<Uuid, SessionExport> {
        let store = self.store.lock();
        let sessions = &store.sessions;
        let now = Utc::now();

        let mut taken: HashMap<Uuid, Vec<DateTime<Utc>>> = HashMap::new();
        for record in sessions.values() {
            for hit in record.instances.iter().flat_map(|i| i.hits.iter()) {
                taken.entry(hit.target).or_default().push(hit.time);
            }
        }

        sessions
            .iter()
            .map(|(id, record)| {
                let hits_taken = taken.get(id).map(Vec::as_slice).unwrap_or(&[]);
                let instances = record
                    .instances
                    .iter()
                    .map(|instance| {
                        let end = instance.end.unwrap_or(now);
                        InstanceExport {
                            dealt: instance.hits.len(),
                            taken: hits_taken
                                .iter()
                                .filter(|t| **t >= instance.start && **t <= end)
                                .count(),
                            lifetime: (end - instance.start).num_milliseconds() as f64 / 1000.0,
                            hits: instance.hits.clone(),
                        }
                    })
                    .collect();
                (
                    *id,
                    SessionExport {
                        id: *id,
                        actor_id: record.actor_id,
                        name: record.name.clone(),
                        kind: record.kind,
                        started_at: record.start,
                        ended_at: record.end,
                        instances,
                    },
                )
            })
            .collect()
    }
}
