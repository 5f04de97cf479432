//! Fixed-interval tick scheduler.
//!
//! Ticks fire every `interval`; there is no notion of simulation `dt`.
//! What the scheduler adds over `tokio::time::interval` is explicit
//! overrun handling (late ticks are skipped, never replayed) and a budget
//! check on how long each pass took.

use std::time::{Duration, Instant};

use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between ticks. `None` means the scheduler never fires.
    pub interval: Option<Duration>,
    /// Fraction of the interval (0.0-1.0) after which a pass logs a warning.
    pub budget_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: None,
            budget_warn_threshold: 0.80,
        }
    }
}

impl TickConfig {
    /// Shortest accepted interval.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    pub fn every(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            ..Default::default()
        }
    }

    /// Shorthand for [`every`](Self::every) with a millisecond count,
    /// the unit `gameLoopSpeed` is configured in.
    pub fn from_millis(ms: u64) -> Self {
        Self::every(Duration::from_millis(ms))
    }

    /// Clamps out-of-range values. Called by [`TickScheduler::new`].
    ///
    /// - `interval` raised to [`Self::MIN_INTERVAL`].
    /// - `budget_warn_threshold` clamped to `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        if let Some(interval) = self.interval {
            if interval < Self::MIN_INTERVAL {
                warn!(?interval, "tick interval below minimum, clamping");
                self.interval = Some(Self::MIN_INTERVAL);
            }
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }
}

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// `true` if the tick woke up more than 10% of an interval late.
    pub overrun: bool,
    /// Whole intervals missed because of the overrun.
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    next_tick: Option<TokioInstant>,
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let next_tick = config.interval.map(|d| TokioInstant::now() + d);

        match config.interval {
            Some(interval) => debug!(?interval, "tick scheduler created"),
            None => debug!("tick scheduler created without interval, it will never fire"),
        }

        Self {
            config,
            tick_count: 0,
            next_tick,
            tick_start: None,
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self::new(TickConfig::every(interval))
    }

    /// Waits until the next tick is due.
    ///
    /// Without an interval this pends forever; inside `tokio::select!` the
    /// other branches keep running.
    ///
    /// A late tick fires once and the next one is scheduled a full
    /// interval from now, so missed ticks are never replayed.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, interval) = match (self.next_tick, self.config.interval) {
            (Some(next), Some(interval)) => (next, interval),
            _ => return std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > interval / 10;
        let behind = (late_by.as_nanos() / interval.as_nanos()) as u64;
        let ticks_skipped = if overrun { behind } else { 0 };

        if ticks_skipped > 0 {
            warn!(
                tick = self.tick_count,
                skipped = ticks_skipped,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "tick overrun, skipping ahead"
            );
        }
        self.next_tick = Some(now + interval);

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the end of the work done for the current tick and returns
    /// how long it took.
    ///
    /// Logs a warning when the pass used more than the warn threshold of
    /// the interval. Returns `None` if no tick is in progress.
    pub fn record_tick_end(&mut self) -> Option<Duration> {
        let start = self.tick_start.take()?;
        let elapsed = start.elapsed();

        if let Some(budget) = self.config.interval {
            let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
            if utilization >= 1.0 {
                warn!(
                    tick = self.tick_count,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    budget_ms = budget.as_secs_f64() * 1000.0,
                    "maintenance pass exceeded tick interval"
                );
            } else if utilization >= self.config.budget_warn_threshold {
                warn!(
                    tick = self.tick_count,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    budget_ms = budget.as_secs_f64() * 1000.0,
                    "maintenance pass approaching tick interval"
                );
            }
        }
        Some(elapsed)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn interval(&self) -> Option<Duration> {
        self.config.interval
    }
}
