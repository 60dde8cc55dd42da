//! Playback clock arithmetic.
//!
//! Position is never stored while playing; it is recomputed from the hardware clock,
//! the last anchor and the playback rate on every read.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic time source in seconds.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-clock monotonic source based on [`Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Used for offline driving and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Session parameters of the playback clock.
pub struct PlaybackClock {
    source: Arc<dyn ClockSource>,
    start_position: f64,
    anchor: f64,
    rate: f64,
}

impl PlaybackClock {
    pub fn new(source: Arc<dyn ClockSource>) -> Self {
        let anchor = source.now();
        Self {
            source,
            start_position: 0.0,
            anchor,
            rate: 1.0,
        }
    }

    /// Hardware time now.
    pub fn now(&self) -> f64 {
        self.source.now()
    }

    /// Set the session start position and anchor it to hardware-now.
    pub fn anchor_at(&mut self, position: f64) {
        self.start_position = position;
        self.anchor = self.source.now();
    }

    /// Seconds of clip played since the last anchor.
    pub fn played_since_anchor(&self) -> f64 {
        ((self.source.now() - self.anchor) * self.rate).max(0.0)
    }

    /// Position while playing: `start + (now - anchor) * rate`.
    pub fn running_position(&self) -> f64 {
        self.start_position + self.played_since_anchor()
    }

    pub fn start_position(&self) -> f64 {
        self.start_position
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_position_scales_with_rate() {
        let source = Arc::new(ManualClock::new());
        source.set(10.0);
        let mut clock = PlaybackClock::new(source.clone());
        clock.anchor_at(3.0);
        source.advance(2.0);
        assert!((clock.running_position() - 5.0).abs() < 1e-9);

        clock.anchor_at(clock.running_position());
        clock.set_rate(2.0);
        source.advance(1.5);
        assert!((clock.running_position() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn position_is_recomputed_not_accumulated() {
        let source = Arc::new(ManualClock::new());
        let mut clock = PlaybackClock::new(source.clone());
        clock.anchor_at(0.0);
        for _ in 0..1000 {
            source.advance(0.001);
            let _ = clock.running_position();
        }
        assert!((clock.running_position() - source.now()).abs() < 1e-12);
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
