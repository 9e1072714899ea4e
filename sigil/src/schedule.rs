//! Periodic tick scheduling shared by the agent's tasks.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// When the first tick of a periodic task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstTick {
    /// Fire as soon as the task starts.
    Immediate,
    /// Fire one full period after the task starts.
    AfterPeriod,
}

/// Build the interval driving one periodic task.
///
/// Late ticks are delayed rather than bursted, so a slow tick never causes a
/// pile-up of catch-up ticks.
pub fn ticker(period: Duration, first: FirstTick) -> Interval {
    let start = match first {
        FirstTick::Immediate => Instant::now(),
        FirstTick::AfterPeriod => Instant::now() + period,
    };
    let mut interval = interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
