//! Tick-based worker target policy.

use std::time::Duration;

use serde::Serialize;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Queue exhausted and every claimed item finished.
    Drained,
    /// The time budget ran out.
    TimeBudget,
    /// Stopped from outside (Ctrl-C, [`super::StopHandle`]).
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Drained => "drained",
            StopReason::TimeBudget => "time budget exceeded",
            StopReason::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Decision for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// `target_workers` is already ramped; the pool is sized to it each tick
    /// with no further throttling. `spawn_rate` is the configured ramp rate,
    /// reported for logging only.
    Run {
        target_workers: usize,
        spawn_rate: usize,
    },
    Stop(StopReason),
}

/// Ramps the worker target from 0 to a ceiling, then holds it.
#[derive(Debug, Clone)]
pub struct RateController {
    ceiling: usize,
    ramp_rate: usize,
    time_budget: Duration,
}

impl RateController {
    pub fn new(ceiling: usize, ramp_rate: usize, time_budget: Duration) -> Self {
        Self {
            ceiling,
            ramp_rate,
            time_budget,
        }
    }

    /// Worker target after `elapsed`: `ramp_rate` workers per started second,
    /// capped at the ceiling. A ramp rate of 0 means no ramp.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        if self.ramp_rate == 0 {
            return self.ceiling;
        }
        let seconds = elapsed.as_secs() as usize;
        self.ramp_rate
            .saturating_mul(seconds.saturating_add(1))
            .min(self.ceiling)
    }

    /// Decide the next step.
    ///
    /// Exhaustion is checked first, so a drained queue stops the run on the
    /// very first tick whatever the ramp settings.
    pub fn tick(&self, elapsed: Duration, queue_exhausted: bool, outstanding: usize) -> Tick {
        if queue_exhausted && outstanding == 0 {
            return Tick::Stop(StopReason::Drained);
        }
        if elapsed >= self.time_budget {
            return Tick::Stop(StopReason::TimeBudget);
        }
        Tick::Run {
            target_workers: self.target_at(elapsed),
            spawn_rate: if self.ramp_rate == 0 {
                self.ceiling
            } else {
                self.ramp_rate
            },
        }
    }
}
