//! Tick and broadcast cadence accounting

use crate::config::TickMode;

/// Most fixed steps run in one tick before the backlog is dropped
pub const MAX_CATCH_UP_STEPS: u32 = 5;

/// Broadcast cadence driven by accumulated tick time
#[derive(Debug, Clone)]
pub struct SyncClock {
    interval: f32,
    timer: f32,
}

impl SyncClock {
    pub fn new(interval: f32) -> Self {
        Self {
            interval,
            timer: 0.0,
        }
    }

    /// Add one tick's delta; true when a broadcast is due.
    ///
    /// The timer is reduced by exactly one interval so the long-run rate holds
    /// under jitter.
    pub fn advance(&mut self, dt: f32) -> bool {
        self.timer += dt;
        if self.timer >= self.interval {
            self.timer -= self.interval;
            true
        } else {
            false
        }
    }
}

/// Turns measured wall-clock deltas into the simulation steps to run
#[derive(Debug, Clone)]
pub struct TickClock {
    mode: TickMode,
    step: f32,
    carry: f32,
}

impl TickClock {
    pub fn new(mode: TickMode, step: f32) -> Self {
        Self {
            mode,
            step,
            carry: 0.0,
        }
    }

    /// Step sizes to simulate for a measured delta
    pub fn steps(&mut self, measured: f32) -> Vec<f32> {
        match self.mode {
            TickMode::Measured => vec![measured],
            TickMode::Fixed => {
                self.carry += measured;
                let mut steps = Vec::new();
                while self.carry >= self.step && steps.len() < MAX_CATCH_UP_STEPS as usize {
                    self.carry -= self.step;
                    steps.push(self.step);
                }
                if self.carry >= self.step {
                    // too far behind, drop the backlog
                    self.carry %= self.step;
                }
                steps
            }
        }
    }

    /// A measured delta this far over target indicates heavy load
    pub fn is_overloaded(&self, measured: f32) -> bool {
        measured > self.step * 1.35
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sync_fires_at_interval() {
        let mut sync = SyncClock::new(0.1);
        assert!(!sync.advance(0.06));
        assert!(sync.advance(0.06));
        assert!(!sync.advance(0.06));
        assert!(sync.advance(0.06));
    }

    #[test]
    fn fixed_mode_carries_remainder() {
        let mut clock = TickClock::new(TickMode::Fixed, 0.01);
        assert!(clock.steps(0.004).is_empty());
        assert_eq!(clock.steps(0.007).len(), 1);
        assert_eq!(clock.steps(0.025).len(), 2);
    }

    #[test]
    fn fixed_mode_caps_catch_up() {
        let mut clock = TickClock::new(TickMode::Fixed, 0.01);
        assert_eq!(clock.steps(1.0).len(), MAX_CATCH_UP_STEPS as usize);
        assert!(clock.steps(0.0).is_empty());
    }

    #[test]
    fn measured_mode_passes_delta_through() {
        let mut clock = TickClock::new(TickMode::Measured, 1.0 / 60.0);
        assert_eq!(clock.steps(0.05), vec![0.05]);
        assert!(clock.is_overloaded(0.05));
    }

    proptest! {
        /// At most one broadcast per tick. Ticks longer than an interval leave a
        /// backlog that drains one interval per later tick, so broadcasts plus the
        /// remaining backlog always account for the elapsed time.
        #[test]
        fn prop_sync_count_matches_elapsed(deltas in prop::collection::vec(0.001f32..0.1, 1..1000)) {
            let interval = 1.0 / 30.0;
            let mut sync = SyncClock::new(interval);
            let total: f64 = deltas.iter().map(|d| *d as f64).sum();
            let fired = deltas.iter().filter(|d| sync.advance(**d)).count() as i64;
            let expected = (total / interval as f64).floor() as i64;
            prop_assert!(fired <= deltas.len() as i64);
            prop_assert!(fired <= expected + 1, "fired {} expected {}", fired, expected);

            let mut backlog = 0i64;
            while sync.advance(0.0) {
                backlog += 1;
            }
            prop_assert!(
                (fired + backlog - expected).abs() <= 1,
                "fired {} backlog {} expected {}",
                fired,
                backlog,
                expected
            );
        }
    }
}
