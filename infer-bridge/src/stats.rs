use std::time::{Duration, Instant};

use serde::Serialize;

/// Invoke timing for the currently loaded model.
///
/// The rate is recomputed once per window from the number of invocations
/// that completed inside it, the way a frame counter reports frames per
/// second.
#[derive(Debug, Clone)]
pub struct InferenceStats {
    window: Duration,
    invocations: u64,
    last: Option<Duration>,
    total: Duration,
    window_start: Option<Instant>,
    window_count: u32,
    rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub invocations: u64,
    pub last_micros: u64,
    pub mean_micros: u64,
    pub per_second: f64,
}

impl InferenceStats {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            invocations: 0,
            last: None,
            total: Duration::ZERO,
            window_start: None,
            window_count: 0,
            rate: 0.0,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.record_at(elapsed, Instant::now());
    }

    pub fn record_at(&mut self, elapsed: Duration, now: Instant) {
        self.invocations += 1;
        self.last = Some(elapsed);
        self.total += elapsed;
        self.window_count += 1;

        let start = *self.window_start.get_or_insert(now);
        let span = now.saturating_duration_since(start);
        if span >= self.window && !span.is_zero() {
            self.rate = f64::from(self.window_count) / span.as_secs_f64();
            self.window_start = Some(now);
            self.window_count = 0;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub fn last(&self) -> Option<Duration> {
        self.last
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mean_micros = match self.invocations {
            0 => 0,
            n => self.total.as_micros() / u128::from(n),
        };
        StatsSnapshot {
            invocations: self.invocations,
            last_micros: self.last.map(|d| d.as_micros() as u64).unwrap_or(0),
            mean_micros: mean_micros as u64,
            per_second: self.rate,
        }
    }
}
