use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use drp_core::Clock;
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// How replica clocks are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    pub base_millis: i64,
    /// Simulated time per round.
    pub tick_millis: i64,
    /// Each replica gets a constant offset in `[-max, max]`.
    pub max_abs_skew_millis: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            base_millis: 1_700_000_000_000,
            tick_millis: 100,
            max_abs_skew_millis: 25,
        }
    }
}

impl ClockConfig {
    /// Future-timestamp tolerance that admits any honest replica's vertices.
    #[must_use]
    pub const fn tolerated_skew_millis(&self) -> i64 {
        self.max_abs_skew_millis.saturating_mul(2)
    }
}

/// Round number shared by every replica clock of a run.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTime(Arc<AtomicU64>);

impl SimulatedTime {
    pub fn advance_to(&self, round: u64) {
        self.0.store(round, Ordering::Relaxed);
    }

    #[must_use]
    pub fn round(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A replica's view of simulated time: base plus ticks plus its skew.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    time: SimulatedTime,
    base_millis: i64,
    tick_millis: i64,
    skew_millis: i64,
}

impl SimulatedClock {
    /// Draw a skew for one replica.
    #[must_use]
    pub fn assign(config: &ClockConfig, time: &SimulatedTime, rng: &mut DeterministicRng) -> Self {
        let span = u64::try_from(config.max_abs_skew_millis.saturating_mul(2)).unwrap_or(0);
        let offset = i64::try_from(rng.next_bounded(span.saturating_add(1))).unwrap_or(0);
        Self {
            time: time.clone(),
            base_millis: config.base_millis,
            tick_millis: config.tick_millis,
            skew_millis: offset - config.max_abs_skew_millis.max(0),
        }
    }

    #[must_use]
    pub const fn skew_millis(&self) -> i64 {
        self.skew_millis
    }
}

impl Clock for SimulatedClock {
    fn now_millis(&self) -> i64 {
        let round = i64::try_from(self.time.round()).unwrap_or(i64::MAX);
        self.base_millis
            .saturating_add(self.skew_millis)
            .saturating_add(self.tick_millis.saturating_mul(round))
    }
}
