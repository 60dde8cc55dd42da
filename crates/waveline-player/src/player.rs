//! Player facade.
//!
//! Wires the playback engine, the progress loop and the annotation index together
//! and republishes their notifications as [`PlayerEvent`]s. Component events are
//! drained after every engine or timeline call, so a `play` inside a seek gets its
//! first progress tick while the engine is still playing.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use waveline_types::{
    LoopRange, MarkerInfo, PlaybackState, PlayerEvent, RegionInfo, SelectionInfo,
};

use crate::clock::ClockSource;
use crate::config::PlayerConfig;
use crate::decode::{self, AudioDecoder, DecodedAudio};
use crate::driver::AudioDriver;
use crate::engine::{EngineEvent, PlaybackEngine};
use crate::events::{EventBus, Subscription, SubscriptionId};
use crate::peaks::{self, PeakMode};
use crate::progress::ProgressLoop;
use crate::timeline::{AnnotationIndex, MarkOptions, RegionOptions, TimelineEvent};

pub struct WavePlayer {
    config: PlayerConfig,
    decoder: Arc<dyn AudioDecoder>,
    engine: PlaybackEngine,
    engine_events: Subscription<EngineEvent>,
    timeline: AnnotationIndex,
    timeline_events: Subscription<TimelineEvent>,
    progress: ProgressLoop,
    events: EventBus<PlayerEvent>,
    loop_selection: bool,
    seek_in_progress: bool,
    muted: bool,
    saved_volume: f32,
    pending_load: Option<Receiver<Result<DecodedAudio>>>,
}

impl WavePlayer {
    pub fn new(
        config: PlayerConfig,
        decoder: Arc<dyn AudioDecoder>,
        driver: Box<dyn AudioDriver>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let mut engine = PlaybackEngine::new(driver, clock, config.audio_rate);
        let engine_events = engine.subscribe();
        let mut timeline = AnnotationIndex::new(config.marker_width, config.selection_border);
        let timeline_events = timeline.subscribe();
        Self {
            loop_selection: config.loop_selection,
            config,
            decoder,
            engine,
            engine_events,
            timeline,
            timeline_events,
            progress: ProgressLoop::new(),
            events: EventBus::new(),
            seek_in_progress: false,
            muted: false,
            saved_volume: 1.0,
            pending_load: None,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn subscribe(&mut self) -> Subscription<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }

    // Loading

    /// Install an already decoded clip.
    pub fn load_decoded(&mut self, audio: DecodedAudio) {
        self.pending_load = None;
        self.empty();
        self.install(audio);
    }

    /// Decode `bytes` synchronously and install the result.
    pub fn load_bytes(&mut self, bytes: Vec<u8>, hint: Option<&str>) {
        self.pending_load = None;
        self.empty();
        self.unload();
        match self.decoder.decode(bytes, hint) {
            Ok(audio) => self.install(audio),
            Err(e) => self.fail_load(e.context("Error decoding audio")),
        }
    }

    /// Read and decode a file, using its extension as the format hint.
    pub fn load_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Error reading file {}", path.display()));
        match bytes {
            Ok(bytes) => {
                let hint = path.extension().and_then(|e| e.to_str());
                self.load_bytes(bytes, hint);
            }
            Err(e) => {
                self.pending_load = None;
                self.empty();
                self.unload();
                self.fail_load(e);
            }
        }
    }

    /// Start decoding `bytes` on a background thread. Call [`Self::poll_load`]
    /// to apply the result.
    pub fn begin_load(&mut self, bytes: Vec<u8>, hint: Option<&str>) {
        self.empty();
        self.unload();
        self.pending_load = Some(decode::spawn_decode(
            self.decoder.clone(),
            bytes,
            hint.map(str::to_string),
        ));
    }

    pub fn is_loading(&self) -> bool {
        self.pending_load.is_some()
    }

    /// Apply a finished background decode. Returns `true` once the pending load
    /// has been resolved (successfully or not).
    pub fn poll_load(&mut self) -> bool {
        let Some(rx) = self.pending_load.as_ref() else {
            return false;
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => Err(anyhow::anyhow!("decoder thread exited")),
        };
        self.pending_load = None;
        match result {
            Ok(audio) => self.install(audio),
            Err(e) => self.fail_load(e.context("Error decoding audio")),
        }
        true
    }

    fn install(&mut self, audio: DecodedAudio) {
        if audio.frames() == 0 {
            self.unload();
            self.fail_load(anyhow::anyhow!("no decodable audio"));
            return;
        }
        let duration = audio.duration();
        let channels = audio.channel_count();
        tracing::info!(
            duration,
            channels,
            rate_hz = audio.sample_rate(),
            "clip loaded"
        );
        self.engine.load(Arc::new(audio));
        self.timeline.set_duration(duration);
        self.pump();
        self.events.emit(PlayerEvent::Ready { duration, channels });
    }

    fn unload(&mut self) {
        self.engine.unload();
        self.timeline.set_duration(0.0);
    }

    fn fail_load(&mut self, e: anyhow::Error) {
        tracing::warn!("load failed: {e:#}");
        self.events.emit(PlayerEvent::Error {
            message: format!("{e:#}"),
        });
    }

    /// Stop playback and remove every annotation with notifications.
    pub fn empty(&mut self) {
        if !self.engine.is_paused() {
            self.stop();
        }
        if self.timeline.selection().is_some() {
            self.clear_selection();
        }
        self.timeline.clear();
        self.pump();
    }

    /// Tear the player down. Emits [`PlayerEvent::Destroy`] and then the removal
    /// notifications; no events follow.
    pub fn destroy(&mut self) {
        self.pause();
        self.events.emit(PlayerEvent::Destroy);
        self.engine.destroy();
        self.timeline.set_duration(0.0);
        self.timeline.clear();
        self.pump();
        self.timeline.close();
        self.pending_load = None;
        self.events.clear();
        tracing::info!("player destroyed");
    }

    // Transport

    pub fn play(&mut self, start: Option<f64>, end: Option<f64>) {
        self.with_engine(|engine| engine.play(start, end));
    }

    pub fn pause(&mut self) {
        self.with_engine(|engine| engine.pause());
    }

    pub fn play_pause(&mut self) {
        if self.engine.is_paused() {
            self.play(None, None);
        } else {
            self.pause();
        }
    }

    /// Pause and rewind to the start.
    pub fn stop(&mut self) {
        self.pause();
        self.seek_to(0.0);
        self.events.emit(PlayerEvent::Progress { fraction: 0.0 });
    }

    /// Seek to `fraction` of the duration.
    ///
    /// From Paused the seek is silent (muted play then pause). A seek issued while
    /// another one is unwinding is ignored.
    pub fn seek_to(&mut self, fraction: f64) {
        if self.seek_in_progress {
            tracing::debug!(fraction, "seek ignored while another seek is in progress");
            return;
        }
        self.seek_in_progress = true;

        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        let paused = self.engine.is_paused();
        let mut saved_volume = None;
        if paused {
            saved_volume = Some(self.engine.volume());
            self.engine.set_volume(0.0);
        } else {
            self.pause();
        }

        let position = fraction * self.engine.duration();
        self.play(Some(position), None);

        if let Some(volume) = saved_volume {
            self.pause();
            self.engine.set_volume(volume);
        }
        self.events.emit(PlayerEvent::Seek { fraction });
        self.seek_in_progress = false;
    }

    /// `current_time + offset` clamped to the clip, with the duration (1 when
    /// nothing is loaded).
    pub fn timings(&self, offset: f64) -> (f64, f64) {
        let duration = match self.engine.duration() {
            d if d > 0.0 => d,
            _ => 1.0,
        };
        let position = (self.engine.current_time() + offset).clamp(0.0, duration);
        (position, duration)
    }

    pub fn skip(&mut self, offset: f64) {
        let (position, duration) = self.timings(offset);
        self.seek_to(position / duration);
    }

    pub fn skip_forward(&mut self, seconds: Option<f64>) {
        self.skip(seconds.unwrap_or(self.config.skip_length).abs());
    }

    pub fn skip_backward(&mut self, seconds: Option<f64>) {
        self.skip(-seconds.unwrap_or(self.config.skip_length).abs());
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        self.with_engine(|engine| engine.set_playback_rate(rate));
    }

    pub fn playback_rate(&self) -> f64 {
        self.engine.playback_rate()
    }

    // Volume

    pub fn set_volume(&mut self, gain: f32) {
        self.engine.set_volume(gain);
    }

    pub fn volume(&self) -> f32 {
        self.engine.volume()
    }

    /// Mute, saving the current gain, or restore the saved gain.
    pub fn toggle_mute(&mut self) {
        if self.muted {
            self.engine.set_volume(self.saved_volume);
            self.muted = false;
        } else {
            self.saved_volume = self.engine.volume();
            self.engine.set_volume(0.0);
            self.muted = true;
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    // Host ticks

    /// Audio-processing tick from the host's audio/timer subsystem.
    pub fn on_audio_process(&mut self) {
        self.with_engine(|engine| engine.on_audio_process());
    }

    /// Animation-frame tick from the host's frame scheduler.
    pub fn on_animation_frame(&mut self) {
        for fraction in self.progress.frame(&self.engine) {
            self.events.emit(PlayerEvent::Progress { fraction });
        }
    }

    // Queries

    pub fn state(&self) -> PlaybackState {
        self.engine.state()
    }

    pub fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    pub fn current_time(&self) -> f64 {
        self.engine.current_time()
    }

    pub fn duration(&self) -> f64 {
        self.engine.duration()
    }

    pub fn played_fraction(&self) -> f64 {
        self.engine.played_fraction()
    }

    pub fn loop_range(&self) -> Option<LoopRange> {
        self.engine.loop_range()
    }

    pub fn clip(&self) -> Option<&Arc<DecodedAudio>> {
        self.engine.buffer()
    }

    /// Peaks at `length` buckets, one array per channel when `split_channels`
    /// is set and a single merged array otherwise. Empty before load.
    pub fn peaks(&self, length: usize) -> Vec<Vec<f32>> {
        let mode = if self.config.split_channels {
            PeakMode::Split
        } else {
            PeakMode::Merged
        };
        self.engine
            .buffer()
            .map(|clip| peaks::extract_peaks(clip, length, mode))
            .unwrap_or_default()
    }

    /// Peak count for the configured density: `duration * min_px_per_sec * pixel_ratio`.
    pub fn default_peak_length(&self) -> usize {
        let length =
            self.engine.duration() * self.config.min_px_per_sec * self.config.pixel_ratio;
        length.round().max(0.0) as usize
    }

    // Markers and regions

    pub fn mark(&mut self, options: MarkOptions) -> MarkerInfo {
        let current = self.engine.current_time();
        let info = self.timeline.mark(options, current);
        self.pump();
        info
    }

    pub fn update_mark(&mut self, id: &str, options: MarkOptions) -> Option<MarkerInfo> {
        let info = self.timeline.update_mark(id, options);
        self.pump();
        info
    }

    pub fn move_mark(&mut self, id: &str, fraction: f64) -> Option<MarkerInfo> {
        let info = self.timeline.move_mark(id, fraction);
        self.pump();
        info
    }

    /// Remove marker `id`. Removing a selection boundary clears the selection.
    pub fn remove_mark(&mut self, id: &str) -> Option<MarkerInfo> {
        if self.timeline.is_selection_boundary(id) {
            let info = self.timeline.marker(id);
            self.clear_selection();
            return info;
        }
        let info = self.timeline.remove_mark(id);
        self.pump();
        info
    }

    pub fn clear_marks(&mut self) {
        if self.timeline.selection().is_some() {
            self.clear_selection();
        }
        self.timeline.clear_marks();
        self.pump();
    }

    pub fn markers(&self) -> Vec<MarkerInfo> {
        self.timeline.markers()
    }

    pub fn region(&mut self, options: RegionOptions) -> RegionInfo {
        let info = self.timeline.region(options);
        self.pump();
        info
    }

    pub fn update_region(&mut self, id: &str, options: RegionOptions) -> Option<RegionInfo> {
        let info = self.timeline.update_region(id, options);
        self.pump();
        info
    }

    pub fn remove_region(&mut self, id: &str) -> Option<RegionInfo> {
        let info = self.timeline.remove_region(id);
        self.pump();
        info
    }

    pub fn clear_regions(&mut self) {
        self.timeline.clear_regions();
        self.pump();
    }

    pub fn regions(&self) -> Vec<RegionInfo> {
        self.timeline.regions()
    }

    // Selection

    /// Select `[start, end]` (fractions, swapped when reversed). With loop
    /// selection enabled the selection becomes the loop range.
    pub fn update_selection(&mut self, start_fraction: f64, end_fraction: f64, channel: Option<usize>) {
        let (start, end) = self
            .timeline
            .update_selection(start_fraction, end_fraction, channel);
        if self.loop_selection {
            self.engine.set_loop_range(start, end);
        }
        self.pump();
    }

    /// Drag of a selection boundary marker.
    pub fn update_selection_by_mark(&mut self, id: &str, fraction: f64) {
        let resolved = self.timeline.update_selection_by_mark(id, fraction);
        if let Some((start, end)) = resolved.filter(|_| self.loop_selection) {
            self.engine.set_loop_range(start, end);
        }
        self.pump();
    }

    pub fn clear_selection(&mut self) {
        self.timeline.clear_selection();
        if self.loop_selection {
            self.engine.clear_loop_range();
        }
        self.pump();
    }

    /// Flip loop-on-selection and re-apply the current selection.
    pub fn toggle_loop_selection(&mut self) {
        self.loop_selection = !self.loop_selection;
        tracing::debug!(enabled = self.loop_selection, "loop selection toggled");
        if !self.loop_selection {
            self.engine.clear_loop_range();
        }
        if let Some(selection) = self.timeline.selection() {
            self.update_selection(
                selection.start_percentage,
                selection.end_percentage,
                selection.channel,
            );
        }
    }

    pub fn loop_selection(&self) -> bool {
        self.loop_selection
    }

    pub fn selection(&self) -> Option<SelectionInfo> {
        self.timeline.selection()
    }

    // Event routing

    fn with_engine<R>(&mut self, f: impl FnOnce(&mut PlaybackEngine) -> R) -> R {
        let out = f(&mut self.engine);
        self.pump();
        out
    }

    /// Forward queued component events, engine first.
    fn pump(&mut self) {
        for event in self.engine_events.drain() {
            match event {
                EngineEvent::Play => {
                    self.timeline.on_play();
                    self.events.emit(PlayerEvent::Play);
                    if let Some(fraction) = self.progress.restart(&self.engine) {
                        self.events.emit(PlayerEvent::Progress { fraction });
                    }
                }
                EngineEvent::Pause => self.events.emit(PlayerEvent::Pause),
                EngineEvent::Finish => self.events.emit(PlayerEvent::Finish),
                EngineEvent::AudioProcess(time) => {
                    self.events.emit(PlayerEvent::AudioProcess { time });
                    self.timeline.on_audio_process(time);
                    self.forward_timeline();
                }
                EngineEvent::Error(message) => self.events.emit(PlayerEvent::Error { message }),
            }
        }
        self.forward_timeline();
    }

    fn forward_timeline(&mut self) {
        for event in self.timeline_events.drain() {
            self.events.emit(timeline_to_player(event));
        }
    }
}

fn timeline_to_player(event: TimelineEvent) -> PlayerEvent {
    match event {
        TimelineEvent::Marked(marker) => PlayerEvent::Marked { marker },
        TimelineEvent::Reached(marker) => PlayerEvent::Mark { marker },
        TimelineEvent::MarkUpdated(marker) => PlayerEvent::MarkUpdated { marker },
        TimelineEvent::MarkRemoved(marker) => PlayerEvent::MarkRemoved { marker },
        TimelineEvent::RegionCreated(region) => PlayerEvent::RegionCreated { region },
        TimelineEvent::RegionUpdated(region) => PlayerEvent::RegionUpdated { region },
        TimelineEvent::RegionRemoved(region) => PlayerEvent::RegionRemoved { region },
        TimelineEvent::RegionIn(region) => PlayerEvent::RegionIn { region },
        TimelineEvent::RegionOut(region) => PlayerEvent::RegionOut { region },
        TimelineEvent::SelectionUpdate(selection) => PlayerEvent::SelectionUpdate { selection },
    }
}
