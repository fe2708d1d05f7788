//! Rate-limited progress reporting.
//!
//! Progress lines go through `log` at `info` level, at most once per
//! interval, so a multi-terabyte pass produces a readable trail instead of
//! a line per chunk.

use std::time::{Duration, Instant};

use log::info;

use crate::config::Region;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks one pass over a region and logs its position periodically.
#[derive(Debug)]
pub struct ProgressMeter {
    label: &'static str,
    region: Region,
    start_position: u64,
    started: Instant,
    last_emit: Instant,
    interval: Duration,
    enabled: bool,
}

impl ProgressMeter {
    pub fn new(label: &'static str, region: Region, start_position: u64, enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            label,
            region,
            start_position,
            started: now,
            last_emit: now,
            interval: DEFAULT_INTERVAL,
            enabled,
        }
    }

    /// Record that the pass reached `position`; logs if the interval elapsed.
    pub fn update(&mut self, position: u64) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last_emit) < self.interval {
            return;
        }
        self.last_emit = now;
        info!("{}", self.line(position, now.duration_since(self.started)));
    }

    /// Log the final line unconditionally.
    pub fn finish(&mut self, position: u64) {
        if self.enabled {
            info!("{}", self.line(position, self.started.elapsed()));
        }
    }

    fn line(&self, position: u64, elapsed: Duration) -> String {
        let done = position.saturating_sub(self.region.begin);
        let total = self.region.len();
        let percent = if total == 0 {
            100.0
        } else {
            done as f64 * 100.0 / total as f64
        };

        let moved = position.saturating_sub(self.start_position);
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { moved as f64 / secs } else { 0.0 };

        let mut line = format!(
            "{}: {} / {} ({percent:.2}%), {}/s",
            self.label,
            format_bytes(done),
            format_bytes(total),
            format_bytes(rate as u64),
        );
        let remaining = self.region.end.saturating_sub(position);
        if rate > 0.0 && remaining > 0 {
            let eta = Duration::from_secs_f64(remaining as f64 / rate);
            line.push_str(&format!(", ETA {}", format_duration(eta)));
        }
        line
    }
}

/// Human-readable binary size, e.g. `1.50 GiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// `H:MM:SS` for durations of an hour or more, `M:SS` otherwise.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}
