//! Deferred per-actor tasks measured in simulation time
//!
//! Every task is tied to the actor that owns it and is dropped when that actor
//! is removed, so a recycled id can never be revived by a stale timer.

use super::ids::ActorId;

/// Work to run once a delay elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    Respawn,
}

#[derive(Debug, Clone)]
struct Deferred {
    actor_id: ActorId,
    action: DeferredAction,
    remaining: f32,
}

/// Pending deferred tasks
#[derive(Debug, Default)]
pub struct DeferredTasks {
    pending: Vec<Deferred>,
}

impl DeferredTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `action` for `actor_id`, replacing any pending task of the same kind
    pub fn schedule(&mut self, actor_id: ActorId, action: DeferredAction, delay: f32) {
        self.pending
            .retain(|t| !(t.actor_id == actor_id && t.action == action));
        self.pending.push(Deferred {
            actor_id,
            action,
            remaining: delay,
        });
    }

    /// Drop every task owned by `actor_id`. Returns how many were cancelled.
    pub fn cancel(&mut self, actor_id: ActorId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|t| t.actor_id != actor_id);
        before - self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_scheduled(&self, actor_id: ActorId, action: DeferredAction) -> bool {
        self.pending
            .iter()
            .any(|t| t.actor_id == actor_id && t.action == action)
    }

    /// Advance all timers and return the tasks that came due, in scheduling order
    pub fn advance(&mut self, dt: f32) -> Vec<(ActorId, DeferredAction)> {
        let mut due = Vec::new();
        self.pending.retain_mut(|t| {
            t.remaining -= dt;
            if t.remaining <= 0.0 {
                due.push((t.actor_id, t.action));
                false
            } else {
                true
            }
        });
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_fire_once_after_delay() {
        let mut tasks = DeferredTasks::new();
        tasks.schedule(ActorId(1), DeferredAction::Respawn, 2.0);
        assert!(tasks.advance(1.5).is_empty());
        assert_eq!(tasks.advance(0.6), vec![(ActorId(1), DeferredAction::Respawn)]);
        assert!(tasks.advance(5.0).is_empty());
    }

    #[test]
    fn cancelled_tasks_never_fire() {
        let mut tasks = DeferredTasks::new();
        tasks.schedule(ActorId(1), DeferredAction::Respawn, 2.0);
        tasks.schedule(ActorId(2), DeferredAction::Respawn, 2.0);
        assert_eq!(tasks.cancel(ActorId(1)), 1);
        assert_eq!(tasks.advance(3.0), vec![(ActorId(2), DeferredAction::Respawn)]);
    }

    #[test]
    fn rescheduling_replaces_pending_task() {
        let mut tasks = DeferredTasks::new();
        tasks.schedule(ActorId(1), DeferredAction::Respawn, 1.0);
        tasks.schedule(ActorId(1), DeferredAction::Respawn, 3.0);
        assert!(tasks.advance(2.0).is_empty());
        assert!(tasks.is_scheduled(ActorId(1), DeferredAction::Respawn));
    }
}
