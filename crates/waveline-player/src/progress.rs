//! Generation-guarded progress loop.
//!
//! Every play transition mints a new generation and schedules a ticker for it.
//! A ticker keeps running only while its generation is the latest one and the
//! engine is not paused; there is no cancel call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a ticker samples on each frame.
pub trait ProgressSource {
    fn is_paused(&self) -> bool;
    fn played_fraction(&self) -> f64;
}

/// Why a ticker stopped rescheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// A newer generation has been minted.
    Superseded,
    /// The engine is no longer playing.
    Paused,
}

/// Result of one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Tick {
    /// Emit progress and stay scheduled.
    Continue(f64),
    Stop(StopReason),
}

/// Source of generation tokens; the last minted token is the only live one.
#[derive(Clone, Debug, Default)]
pub struct ProgressGenerations {
    latest: Arc<AtomicU64>,
}

impl ProgressGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new generation, retiring every ticker minted before it.
    pub fn mint(&self) -> ProgressTicker {
        let generation = self.latest.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        ProgressTicker {
            generation,
            latest: self.latest.clone(),
        }
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::Relaxed)
    }
}

/// One scheduled loop instance.
#[derive(Clone, Debug)]
pub struct ProgressTicker {
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl ProgressTicker {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_live(&self) -> bool {
        self.latest.load(Ordering::Relaxed) == self.generation
    }

    pub fn tick(&self, source: &impl ProgressSource) -> Tick {
        if !self.is_live() {
            return Tick::Stop(StopReason::Superseded);
        }
        if source.is_paused() {
            return Tick::Stop(StopReason::Paused);
        }
        Tick::Continue(source.played_fraction())
    }
}

/// Tickers waiting for the next animation frame.
#[derive(Debug, Default)]
pub struct ProgressLoop {
    generations: ProgressGenerations,
    scheduled: Vec<ProgressTicker>,
}

impl ProgressLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new loop instance for a play transition and run its first tick.
    pub fn restart(&mut self, source: &impl ProgressSource) -> Option<f64> {
        let ticker = self.generations.mint();
        match ticker.tick(source) {
            Tick::Continue(fraction) => {
                self.scheduled.push(ticker);
                Some(fraction)
            }
            Tick::Stop(_) => None,
        }
    }

    /// Run every scheduled ticker once, returning the fractions to publish.
    pub fn frame(&mut self, source: &impl ProgressSource) -> Vec<f64> {
        let mut out = Vec::new();
        self.scheduled.retain(|ticker| match ticker.tick(source) {
            Tick::Continue(fraction) => {
                out.push(fraction);
                true
            }
            Tick::Stop(reason) => {
                tracing::trace!(generation = ticker.generation(), ?reason, "progress loop stopped");
                false
            }
        });
        out
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled.len()
    }
}

impl ProgressSource for crate::engine::PlaybackEngine {
    fn is_paused(&self) -> bool {
        crate::engine::PlaybackEngine::is_paused(self)
    }

    fn played_fraction(&self) -> f64 {
        crate::engine::PlaybackEngine::played_fraction(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeSource {
        paused: Cell<bool>,
        fraction: Cell<f64>,
    }

    impl FakeSource {
        fn playing(fraction: f64) -> Self {
            Self {
                paused: Cell::new(false),
                fraction: Cell::new(fraction),
            }
        }
    }

    impl ProgressSource for FakeSource {
        fn is_paused(&self) -> bool {
            self.paused.get()
        }

        fn played_fraction(&self) -> f64 {
            self.fraction.get()
        }
    }

    #[test]
    fn only_latest_generation_ticks() {
        let generations = ProgressGenerations::new();
        let source = FakeSource::playing(0.25);
        let stale = generations.mint();
        assert_eq!(stale.tick(&source), Tick::Continue(0.25));

        let fresh = generations.mint();
        assert_eq!(fresh.tick(&source), Tick::Continue(0.25));
        assert_eq!(stale.tick(&source), Tick::Stop(StopReason::Superseded));
        assert!(fresh.is_live());
        assert_eq!(generations.latest(), fresh.generation());
    }

    #[test]
    fn paused_source_stops_ticker() {
        let generations = ProgressGenerations::new();
        let source = FakeSource::playing(0.5);
        let ticker = generations.mint();
        source.paused.set(true);
        assert_eq!(ticker.tick(&source), Tick::Stop(StopReason::Paused));
    }

    #[test]
    fn stale_loop_never_emits_after_restart() {
        let mut progress = ProgressLoop::new();
        let source = FakeSource::playing(0.1);
        assert_eq!(progress.restart(&source), Some(0.1));
        assert_eq!(progress.frame(&source), vec![0.1]);

        source.fraction.set(0.2);
        assert_eq!(progress.restart(&source), Some(0.2));
        assert_eq!(progress.frame(&source), vec![0.2]);
        assert_eq!(progress.scheduled(), 1);
    }

    #[test]
    fn pause_drains_scheduled_tickers() {
        let mut progress = ProgressLoop::new();
        let source = FakeSource::playing(0.3);
        progress.restart(&source);
        source.paused.set(true);
        assert!(progress.frame(&source).is_empty());
        assert_eq!(progress.scheduled(), 0);
        assert_eq!(progress.restart(&source), None);
        assert_eq!(progress.scheduled(), 0);
    }
}
