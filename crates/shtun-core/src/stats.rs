//! Traffic counters and the throughput status line.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::constants::{STATS_REFRESH, STATS_WINDOW};

/// Cumulative byte counts at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    /// Bytes sent from the local interface to the remote side.
    pub l2r: u64,
    /// Bytes received from the remote side and written locally.
    pub r2l: u64,
}

/// Shared cumulative counters, updated by both pump directions.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct TrafficCounters {
    inner: Arc<Mutex<Totals>>,
}

impl TrafficCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Totals> {
        // counters stay meaningful even if a holder panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count bytes sent to the remote side.
    pub fn add_l2r(&self, bytes: u64) {
        let mut totals = self.lock();
        totals.l2r = totals.l2r.saturating_add(bytes);
    }

    /// Count bytes received from the remote side.
    pub fn add_r2l(&self, bytes: u64) {
        let mut totals = self.lock();
        totals.r2l = totals.r2l.saturating_add(bytes);
    }

    /// Current totals.
    pub fn snapshot(&self) -> Totals {
        *self.lock()
    }
}

/// Result of one stats tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSample {
    /// Time since the engine started.
    pub uptime: Duration,
    /// Cumulative totals.
    pub totals: Totals,
    /// Local-to-remote bytes per second over the window.
    pub l2r_rate: f64,
    /// Remote-to-local bytes per second over the window.
    pub r2l_rate: f64,
}

/// Samples [`TrafficCounters`] and renders a sliding-window throughput line.
pub struct StatsEngine {
    counters: TrafficCounters,
    started: Instant,
    window: Duration,
    refresh: Duration,
    history: VecDeque<(Instant, Totals)>,
}

impl StatsEngine {
    /// Create an engine with the default window and refresh interval.
    pub fn new(counters: TrafficCounters) -> Self {
        Self::with_timing(counters, STATS_WINDOW, STATS_REFRESH)
    }

    /// Create an engine with explicit timing.
    pub fn with_timing(counters: TrafficCounters, window: Duration, refresh: Duration) -> Self {
        Self {
            counters,
            started: Instant::now(),
            window,
            refresh,
            history: VecDeque::new(),
        }
    }

    /// Number of retained snapshots.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Take a snapshot at `now` and compute rates over the window.
    pub fn tick(&mut self, now: Instant) -> StatsSample {
        let totals = self.counters.snapshot();
        self.history.push_back((now, totals));
        while let Some(&(at, _)) = self.history.front() {
            if now.saturating_duration_since(at) > self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let (l2r_rate, r2l_rate) = match (self.history.front(), self.history.back()) {
            (Some(&(t0, first)), Some(&(t1, last))) => {
                let elapsed = t1.saturating_duration_since(t0).as_secs_f64();
                if elapsed > 0.0 {
                    (
                        last.l2r.saturating_sub(first.l2r) as f64 / elapsed,
                        last.r2l.saturating_sub(first.r2l) as f64 / elapsed,
                    )
                } else {
                    (0.0, 0.0)
                }
            }
            _ => (0.0, 0.0),
        };

        StatsSample {
            uptime: now.saturating_duration_since(self.started),
            totals,
            l2r_rate,
            r2l_rate,
        }
    }

    /// Render a sample as the status line (without the line reset prefix).
    pub fn render(sample: &StatsSample) -> String {
        format!(
            "{} | In: {} @ {}/s | Out: {} @ {}/s",
            seconds_to_human(sample.uptime),
            bytes_to_human(sample.totals.r2l as f64),
            bytes_to_human(sample.r2l_rate),
            bytes_to_human(sample.totals.l2r as f64),
            bytes_to_human(sample.l2r_rate),
        )
    }

    /// Redraw the status line on stderr until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        self.run_to(io::stderr(), cancel).await;
    }

    /// Redraw the status line on `out` until `cancel` fires.
    pub async fn run_to<W: Write>(mut self, mut out: W, cancel: CancellationToken) {
        async move {
            debug!("Stats engine started");
            let mut interval = tokio::time::interval(self.refresh);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    now = interval.tick() => {
                        let sample = self.tick(now);
                        // best effort
                        let _ = write!(out, "\r\x1b[K{}", Self::render(&sample));
                        let _ = out.flush();
                    }
                }
            }
            let _ = writeln!(out);
            let _ = out.flush();
            debug!("Stats engine stopped");
        }
        .instrument(info_span!("stats"))
        .await
    }
}

/// Format a byte count or rate, e.g. `  12.5kB`.
///
/// Scales by 1024 while the value is at least 2048.
pub fn bytes_to_human(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 2048.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:6.1}{:>2}", value, UNITS[unit])
}

/// Format a duration as `HH:MM:SS`.
pub fn seconds_to_human(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

// =============================================================================
// Tests
// =============================================================================
