//! Wall-clock accounting for the optimization phases.

use std::time::{Duration, Instant};

/// Accumulating stopwatch.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    total: Duration,
    count: usize,
    started: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.total += started.elapsed();
            self.count += 1;
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self.started {
            Some(started) => self.total + started.elapsed(),
            None => self.total,
        }
    }

    pub fn laps(&self) -> usize {
        self.count
    }

    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.elapsed() / self.count as u32
        }
    }

    /// Human-readable duration, e.g. `1.25 s` or `834.1 ms`.
    pub fn format(duration: Duration) -> String {
        let secs = duration.as_secs_f64();
        if secs >= 60.0 {
            format!("{:.0} m {:.1} s", (secs / 60.0).floor(), secs % 60.0)
        } else if secs >= 1.0 {
            format!("{secs:.2} s")
        } else {
            format!("{:.1} ms", secs * 1e3)
        }
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Timer::format(self.elapsed()))
    }
}

/// Per-phase timers of one optimization run.
#[derive(Debug, Clone, Default)]
pub struct Timers {
    pub build: Timer,
    pub reorder: Timer,
    pub substitute: Timer,
    pub update: Timer,
}

impl Timers {
    pub fn total(&self) -> Duration {
        self.build.elapsed()
            + self.reorder.elapsed()
            + self.substitute.elapsed()
            + self.update.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_accumulates() {
        let mut t = Timer::new();
        t.start();
        t.stop();
        t.start();
        t.stop();
        assert_eq!(t.laps(), 2);
    }

    #[test]
    fn test_format() {
        assert_eq!(Timer::format(Duration::from_millis(1500)), "1.50 s");
        assert_eq!(Timer::format(Duration::from_millis(250)), "250.0 ms");
        assert_eq!(Timer::format(Duration::from_secs(61)), "1 m 1.0 s");
    }
}
