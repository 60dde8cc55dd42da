//! Playback state machine.
//!
//! Owns the Playing/Paused/Finished state, the playback clock and the single
//! hardware handle. Position is derived from the clock on every read.
//!
//! The host drives it with [`PlaybackEngine::on_audio_process`]; ticks are only
//! processed while Playing, which stands in for registering and deregistering the
//! audio-processing callback on state entry.

use std::sync::Arc;

use waveline_types::{LoopRange, PlaybackState};

use crate::clock::{ClockSource, PlaybackClock};
use crate::decode::DecodedAudio;
use crate::driver::{AudioDriver, PlaybackHandle, StartRequest};
use crate::events::{EventBus, Subscription};

/// Notifications published by [`PlaybackEngine`].
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Play,
    Pause,
    Finish,
    AudioProcess(f64),
    Error(String),
}

/// Start/end pair resolved by [`PlaybackEngine::seek_to`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayRange {
    pub start: f64,
    pub end: f64,
}

pub struct PlaybackEngine {
    driver: Box<dyn AudioDriver>,
    clock: PlaybackClock,
    buffer: Option<Arc<DecodedAudio>>,
    state: PlaybackState,
    handle: Option<Box<dyn PlaybackHandle>>,
    scheduled_stop: Option<f64>,
    loop_range: Option<LoopRange>,
    prev_frame_time: f64,
    volume: f32,
    events: EventBus<EngineEvent>,
}

impl PlaybackEngine {
    pub fn new(driver: Box<dyn AudioDriver>, source: Arc<dyn ClockSource>, rate: f64) -> Self {
        let mut clock = PlaybackClock::new(source);
        clock.set_rate(sanitize_rate(rate));
        Self {
            driver,
            clock,
            buffer: None,
            state: PlaybackState::Paused,
            handle: None,
            scheduled_stop: None,
            loop_range: None,
            prev_frame_time: 0.0,
            volume: 1.0,
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription<EngineEvent> {
        self.events.subscribe()
    }

    /// Replace the clip. Playback stops silently and the position resets to 0.
    pub fn load(&mut self, buffer: Arc<DecodedAudio>) {
        tracing::debug!(
            duration = buffer.duration(),
            channels = buffer.channel_count(),
            "engine loaded clip"
        );
        self.reset_session();
        self.buffer = Some(buffer);
    }

    /// Drop the clip, returning to the unloaded state.
    pub fn unload(&mut self) {
        self.reset_session();
        self.buffer = None;
    }

    fn reset_session(&mut self) {
        self.teardown_handle();
        self.state = PlaybackState::Paused;
        self.scheduled_stop = None;
        self.loop_range = None;
        self.prev_frame_time = 0.0;
        self.clock.anchor_at(0.0);
    }

    pub fn buffer(&self) -> Option<&Arc<DecodedAudio>> {
        self.buffer.as_ref()
    }

    /// Clip duration in seconds, 0 before load.
    pub fn duration(&self) -> f64 {
        self.buffer.as_ref().map(|b| b.duration()).unwrap_or(0.0)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state != PlaybackState::Playing
    }

    pub fn current_time(&self) -> f64 {
        match self.state {
            PlaybackState::Playing => self.clock.running_position(),
            PlaybackState::Paused => self.clock.start_position(),
            PlaybackState::Finished => self.duration(),
        }
    }

    /// `current_time / duration`, 0 when nothing is loaded.
    pub fn played_fraction(&self) -> f64 {
        let duration = self.duration();
        if duration > 0.0 {
            self.current_time() / duration
        } else {
            0.0
        }
    }

    /// Resolve a start/end pair and re-anchor the clock at the resolved start.
    ///
    /// `start` defaults to the current position, or 0 once the end has been reached;
    /// `end` defaults to the duration. Both are clamped into `[0, duration]` and
    /// `end` never precedes `start`. A finished session returns to Paused.
    pub fn seek_to(&mut self, start: Option<f64>, end: Option<f64>) -> PlayRange {
        let duration = self.duration();
        self.scheduled_stop = None;

        let start = start.unwrap_or_else(|| {
            let current = self.current_time();
            if current >= duration { 0.0 } else { current }
        });
        let start = clamp_finite(start, duration);
        let end = clamp_finite(end.unwrap_or(duration), duration).max(start);

        self.clock.anchor_at(start);
        if self.state == PlaybackState::Finished {
            self.state = PlaybackState::Paused;
        }
        PlayRange { start, end }
    }

    /// Start a session at `start` that stops itself at `end`.
    ///
    /// Any previous handle is stopped and dropped first. Without a loaded clip this
    /// is a no-op; a driver failure is reported as [`EngineEvent::Error`] and leaves
    /// the engine Paused.
    pub fn play(&mut self, start: Option<f64>, end: Option<f64>) {
        let Some(buffer) = self.buffer.clone() else {
            tracing::warn!("play requested with no clip loaded");
            return;
        };

        self.teardown_handle();
        let range = self.seek_to(start, end);
        self.scheduled_stop = Some(range.end);
        self.prev_frame_time = range.start;

        let request = StartRequest {
            buffer,
            when: self.clock.now(),
            offset: range.start,
            duration: range.end - range.start,
            rate: self.clock.rate(),
        };
        match self.driver.start(request) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = PlaybackState::Playing;
                tracing::debug!(
                    start = range.start,
                    end = range.end,
                    rate = self.clock.rate(),
                    "playback session started"
                );
                self.events.emit(EngineEvent::Play);
            }
            Err(e) => {
                tracing::warn!("failed to start playback: {e:#}");
                self.scheduled_stop = None;
                self.state = PlaybackState::Paused;
                self.events.emit(EngineEvent::Error(format!("{e:#}")));
            }
        }
    }

    /// Freeze the position and stop the handle. No-op unless Playing.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.scheduled_stop = None;
        let position = self.clock.running_position();
        self.clock.anchor_at(position);
        self.teardown_handle();
        self.state = PlaybackState::Paused;
        self.events.emit(EngineEvent::Pause);
    }

    /// Audio-processing tick.
    pub fn on_audio_process(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let time = self.current_time();

        if time >= self.duration() {
            self.teardown_handle();
            self.scheduled_stop = None;
            self.state = PlaybackState::Finished;
            tracing::debug!("playback reached end of clip");
            self.events.emit(EngineEvent::Finish);
            self.events.emit(EngineEvent::Pause);
            return;
        }

        if let Some(range) = self.loop_range {
            let prev = self.prev_frame_time;
            if prev >= range.start && prev <= range.end && time > range.end {
                tracing::debug!(start = range.start, end = range.end, "loop restart");
                self.play(Some(range.start), None);
                return;
            }
        }

        if let Some(stop) = self.scheduled_stop.filter(|stop| time >= *stop) {
            self.scheduled_stop = None;
            self.clock.anchor_at(stop);
            self.teardown_handle();
            self.state = PlaybackState::Paused;
            self.events.emit(EngineEvent::Pause);
            return;
        }

        self.prev_frame_time = time;
        self.events.emit(EngineEvent::AudioProcess(time));
    }

    pub fn playback_rate(&self) -> f64 {
        self.clock.rate()
    }

    /// Change the rate. While Playing this restarts the session at the current
    /// position (pause, set, play). Non-positive or non-finite values become 1.
    pub fn set_playback_rate(&mut self, rate: f64) {
        let rate = sanitize_rate(rate);
        if self.is_paused() {
            self.clock.set_rate(rate);
        } else {
            self.pause();
            self.clock.set_rate(rate);
            self.play(None, None);
        }
    }

    /// Loop between two fractions of the duration. Reversed bounds are swapped;
    /// an empty range clears the loop.
    pub fn set_loop_range(&mut self, start_fraction: f64, end_fraction: f64) {
        let duration = self.duration();
        let mut a = clamp_finite(start_fraction, 1.0);
        let mut b = clamp_finite(end_fraction, 1.0);
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        if duration <= 0.0 || a == b {
            self.loop_range = None;
            return;
        }
        self.loop_range = Some(LoopRange {
            start: a * duration,
            end: b * duration,
        });
    }

    pub fn clear_loop_range(&mut self) {
        self.loop_range = None;
    }

    pub fn loop_range(&self) -> Option<LoopRange> {
        self.loop_range
    }

    /// Output gain, clamped to `[0, 1]`.
    pub fn set_volume(&mut self, gain: f32) {
        let gain = if gain.is_finite() { gain.clamp(0.0, 1.0) } else { 0.0 };
        self.volume = gain;
        self.driver.set_volume(gain);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Pause, release the handle and the clip, and drop every subscriber.
    pub fn destroy(&mut self) {
        self.pause();
        self.unload();
        self.events.clear();
    }

    fn teardown_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop(0.0);
        }
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 { rate } else { 1.0 }
}

fn clamp_finite(value: f64, max: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, max.max(0.0)) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::driver::testing::{Call, RecordingDriver};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fixture {
        engine: PlaybackEngine,
        clock: Arc<ManualClock>,
        calls: Rc<RefCell<Vec<Call>>>,
        fail: Rc<RefCell<bool>>,
        events: Subscription<EngineEvent>,
    }

    /// Engine with a 10 second mono clip at 100 Hz.
    fn fixture() -> Fixture {
        let driver = RecordingDriver::new();
        let calls = driver.calls.clone();
        let fail = driver.fail.clone();
        let clock = Arc::new(ManualClock::new());
        let mut engine = PlaybackEngine::new(Box::new(driver), clock.clone(), 1.0);
        engine.load(Arc::new(DecodedAudio::new(100, vec![vec![0.0; 1000]]).unwrap()));
        let events = engine.subscribe();
        Fixture {
            engine,
            clock,
            calls,
            fail,
            events,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn pause_freezes_current_time() {
        let mut f = fixture();
        f.engine.play(None, None);
        f.clock.advance(2.5);
        f.engine.pause();
        assert!(approx(f.engine.current_time(), 2.5));
        f.clock.advance(5.0);
        assert!(approx(f.engine.current_time(), 2.5));
        assert_eq!(f.events.drain(), vec![EngineEvent::Play, EngineEvent::Pause]);
    }

    #[test]
    fn second_pause_is_a_no_op() {
        let mut f = fixture();
        f.engine.play(None, None);
        f.clock.advance(1.0);
        f.engine.pause();
        f.clock.advance(3.0);
        f.engine.pause();
        assert!(approx(f.engine.current_time(), 1.0));
        assert_eq!(f.engine.state(), PlaybackState::Paused);
        assert_eq!(f.events.drain(), vec![EngineEvent::Play, EngineEvent::Pause]);
    }

    #[test]
    fn resume_continues_from_paused_position() {
        let mut f = fixture();
        f.engine.play(None, None);
        f.clock.advance(1.0);
        f.engine.pause();
        f.clock.advance(10.0);
        f.engine.play(None, None);
        f.clock.advance(0.5);
        assert!(approx(f.engine.current_time(), 1.5));
    }

    #[test]
    fn reaching_the_end_finishes_then_pauses() {
        let mut f = fixture();
        f.engine.play(None, None);
        f.clock.advance(11.0);
        f.engine.on_audio_process();
        assert_eq!(f.engine.state(), PlaybackState::Finished);
        assert!(approx(f.engine.current_time(), 10.0));
        assert!(approx(f.engine.played_fraction(), 1.0));
        assert_eq!(
            f.events.drain(),
            vec![EngineEvent::Play, EngineEvent::Finish, EngineEvent::Pause]
        );
        assert_eq!(f.calls.borrow().last(), Some(&Call::Stop(1)));
    }

    #[test]
    fn seek_without_start_after_end_resolves_to_zero() {
        let mut f = fixture();
        f.engine.play(None, None);
        f.clock.advance(12.0);
        f.engine.on_audio_process();
        let range = f.engine.seek_to(None, None);
        assert_eq!(range, PlayRange { start: 0.0, end: 10.0 });
        assert_eq!(f.engine.state(), PlaybackState::Paused);
    }

    #[test]
    fn seek_clamps_out_of_range_bounds() {
        let mut f = fixture();
        let range = f.engine.seek_to(Some(-3.0), Some(40.0));
        assert_eq!(range, PlayRange { start: 0.0, end: 10.0 });
        let range = f.engine.seek_to(Some(8.0), Some(2.0));
        assert_eq!(range, PlayRange { start: 8.0, end: 8.0 });
        assert!(approx(f.engine.current_time(), 8.0));
    }

    #[test]
    fn rate_change_while_playing_restarts_session() {
        let mut f = fixture();
        f.engine.play(None, None);
        f.clock.advance(1.0);
        f.engine.set_playback_rate(2.0);

        assert_eq!(f.engine.state(), PlaybackState::Playing);
        assert_eq!(f.engine.playback_rate(), 2.0);
        assert_eq!(
            f.events.drain(),
            vec![EngineEvent::Play, EngineEvent::Pause, EngineEvent::Play]
        );
        let starts = RecordingDriver::starts(&f.calls);
        assert_eq!(
            starts[1],
            Call::Start {
                session: 2,
                offset: 1.0,
                duration: 9.0,
                rate: 2.0
            }
        );

        f.clock.advance(1.0);
        assert!(approx(f.engine.current_time(), 3.0));
    }

    #[test]
    fn rate_change_while_paused_only_stores() {
        let mut f = fixture();
        f.engine.set_playback_rate(0.5);
        f.engine.set_playback_rate(f64::NAN);
        assert_eq!(f.engine.playback_rate(), 1.0);
        f.engine.set_playback_rate(-2.0);
        assert_eq!(f.engine.playback_rate(), 1.0);
        assert!(f.events.drain().is_empty());
        assert!(f.calls.borrow().is_empty());
    }

    #[test]
    fn play_stops_previous_handle_before_starting() {
        let mut f = fixture();
        f.engine.play(None, None);
        f.engine.play(Some(4.0), None);
        let calls = f.calls.borrow().clone();
        assert!(matches!(calls[0], Call::Start { session: 1, .. }));
        assert_eq!(calls[1], Call::Stop(1));
        assert!(matches!(calls[2], Call::Start { session: 2, .. }));
    }

    #[test]
    fn scheduled_stop_pauses_at_end_bound() {
        let mut f = fixture();
        f.engine.play(Some(1.0), Some(2.0));
        f.clock.advance(0.5);
        f.engine.on_audio_process();
        f.clock.advance(0.75);
        f.engine.on_audio_process();
        assert_eq!(f.engine.state(), PlaybackState::Paused);
        assert!(approx(f.engine.current_time(), 2.0));
        assert_eq!(
            f.events.drain(),
            vec![
                EngineEvent::Play,
                EngineEvent::AudioProcess(1.5),
                EngineEvent::Pause
            ]
        );
    }

    #[test]
    fn loop_restarts_at_loop_start() {
        let mut f = fixture();
        f.engine.set_loop_range(0.4, 0.2);
        assert_eq!(f.engine.loop_range(), Some(LoopRange { start: 2.0, end: 4.0 }));

        f.engine.play(Some(2.0), None);
        f.clock.advance(1.0);
        f.engine.on_audio_process();
        f.clock.advance(1.5);
        f.engine.on_audio_process();

        assert_eq!(f.engine.state(), PlaybackState::Playing);
        assert!(approx(f.engine.current_time(), 2.0));
        assert_eq!(
            f.events.drain(),
            vec![
                EngineEvent::Play,
                EngineEvent::AudioProcess(3.0),
                EngineEvent::Play
            ]
        );
        let calls = f.calls.borrow().clone();
        assert_eq!(calls[1], Call::Stop(1));
        assert!(matches!(calls[2], Call::Start { session: 2, offset, .. } if offset == 2.0));
    }

    #[test]
    fn loop_ignored_when_playing_outside_range() {
        let mut f = fixture();
        f.engine.set_loop_range(0.2, 0.4);
        f.engine.play(Some(5.0), None);
        f.clock.advance(1.0);
        f.engine.on_audio_process();
        assert_eq!(f.events.drain().last(), Some(&EngineEvent::AudioProcess(6.0)));
    }

    #[test]
    fn empty_loop_range_clears_loop() {
        let mut f = fixture();
        f.engine.set_loop_range(0.2, 0.4);
        f.engine.set_loop_range(0.3, 0.3);
        assert_eq!(f.engine.loop_range(), None);
    }

    #[test]
    fn driver_failure_reports_error_and_stays_paused() {
        let mut f = fixture();
        *f.fail.borrow_mut() = true;
        f.engine.play(None, None);
        assert_eq!(f.engine.state(), PlaybackState::Paused);
        assert_eq!(
            f.events.drain(),
            vec![EngineEvent::Error("device unavailable".to_string())]
        );
    }

    #[test]
    fn play_without_clip_is_ignored() {
        let clock = Arc::new(ManualClock::new());
        let mut engine = PlaybackEngine::new(Box::new(RecordingDriver::new()), clock, 1.0);
        let events = engine.subscribe();
        engine.play(None, None);
        engine.on_audio_process();
        assert!(engine.is_paused());
        assert_eq!(engine.played_fraction(), 0.0);
        assert!(events.drain().is_empty());
    }

    #[test]
    fn ticks_are_ignored_while_paused() {
        let mut f = fixture();
        f.clock.advance(1.0);
        f.engine.on_audio_process();
        assert!(f.events.drain().is_empty());
    }

    #[test]
    fn volume_is_clamped_and_forwarded() {
        let mut f = fixture();
        f.engine.set_volume(1.5);
        assert_eq!(f.engine.volume(), 1.0);
        f.engine.set_volume(0.25);
        assert_eq!(f.calls.borrow().last(), Some(&Call::Volume(0.25)));
    }

    #[test]
    fn destroy_releases_handle_and_subscribers() {
        let mut f = fixture();
        f.engine.play(None, None);
        f.engine.destroy();
        assert_eq!(f.engine.duration(), 0.0);
        assert_eq!(f.calls.borrow().last(), Some(&Call::Stop(1)));
        assert_eq!(f.events.drain(), vec![EngineEvent::Play, EngineEvent::Pause]);
        f.engine.play(None, None);
        assert!(f.events.drain().is_empty());
    }
}
