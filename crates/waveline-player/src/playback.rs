//! Playback stage (CPAL output stream).
//!
//! Opens one persistent CPAL output stream per [`CpalOutput`]. The stream always runs
//! (silence when idle), which gives the player a hardware clock: frames rendered
//! divided by the device rate. Playback sessions are "voices" reading straight from
//! the shared decoded clip.
//!
//! The callback:
//! - renders the active voice, if any, at `rate * clip_rate / device_rate`
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::clock::ClockSource;
use crate::decode::DecodedAudio;
use crate::driver::{AudioDriver, PlaybackHandle, StartRequest};

/// State shared between the output callback and the control side.
struct OutputShared {
    voice: Mutex<Option<Voice>>,
    next_voice: AtomicU64,
    rendered_frames: AtomicU64,
    gain_bits: AtomicU32,
    device_rate: u32,
}

impl OutputShared {
    fn now(&self) -> f64 {
        self.rendered_frames.load(Ordering::Relaxed) as f64 / self.device_rate as f64
    }

    fn frame_at(&self, when: f64) -> u64 {
        (when.max(0.0) * self.device_rate as f64) as u64
    }
}

/// One playback session reading from a clip.
struct Voice {
    id: u64,
    buffer: Arc<DecodedAudio>,
    /// Read position in clip frames.
    pos: f64,
    /// Clip frame at which the voice ends.
    end: f64,
    /// Clip frames advanced per output frame.
    step: f64,
    /// Hardware frame before which the voice stays silent.
    start_frame: u64,
    /// Hardware frame at which the voice is cut.
    stop_frame: Option<u64>,
}

/// CPAL-backed [`AudioDriver`] and hardware [`ClockSource`].
pub struct CpalOutput {
    /// Kept alive for the lifetime of the output.
    _stream: cpal::Stream,
    shared: Arc<OutputShared>,
    channels: u16,
}

impl CpalOutput {
    /// Open and start a stream on `device` with `config`.
    pub fn open(device: &cpal::Device, config: &cpal::SupportedStreamConfig) -> Result<Self> {
        let stream_config: cpal::StreamConfig = config.config();
        let shared = Arc::new(OutputShared {
            voice: Mutex::new(None),
            next_voice: AtomicU64::new(0),
            rendered_frames: AtomicU64::new(0),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            device_rate: stream_config.sample_rate,
        });

        let stream = build_output_stream(device, &stream_config, config.sample_format(), &shared)?;
        stream.play()?;
        tracing::info!(
            rate_hz = stream_config.sample_rate,
            channels = stream_config.channels,
            "output stream started"
        );

        Ok(Self {
            _stream: stream,
            shared,
            channels: stream_config.channels,
        })
    }

    /// Device sample rate; decoders should target it.
    pub fn sample_rate(&self) -> u32 {
        self.shared.device_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Hardware clock view of this output, for the player's clock source.
    pub fn clock(&self) -> Arc<dyn ClockSource> {
        Arc::new(CpalClock {
            shared: self.shared.clone(),
        })
    }
}

struct CpalClock {
    shared: Arc<OutputShared>,
}

impl ClockSource for CpalClock {
    fn now(&self) -> f64 {
        self.shared.now()
    }
}

struct CpalHandle {
    id: u64,
    shared: Arc<OutputShared>,
}

impl PlaybackHandle for CpalHandle {
    fn stop(&mut self, when: f64) {
        let stop_frame = self.shared.frame_at(when);
        let now_frame = self.shared.rendered_frames.load(Ordering::Relaxed);
        let Ok(mut voice) = self.shared.voice.lock() else {
            return;
        };
        if voice.as_ref().map(|v| v.id) != Some(self.id) {
            return;
        }
        if stop_frame <= now_frame {
            *voice = None;
        } else if let Some(v) = voice.as_mut() {
            v.stop_frame = Some(stop_frame);
        }
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        self.stop(0.0);
    }
}

impl AudioDriver for CpalOutput {
    fn start(&mut self, request: StartRequest) -> Result<Box<dyn PlaybackHandle>> {
        if !(request.rate.is_finite() && request.rate > 0.0) {
            return Err(anyhow!("invalid playback rate: {}", request.rate));
        }
        let id = self.shared.next_voice.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        let voice = new_voice(id, &request, self.shared.device_rate, self.shared.frame_at(request.when));
        let mut slot = self
            .shared
            .voice
            .lock()
            .map_err(|_| anyhow!("output voice lock poisoned"))?;
        *slot = Some(voice);
        Ok(Box::new(CpalHandle {
            id,
            shared: self.shared.clone(),
        }))
    }

    fn set_volume(&mut self, gain: f32) {
        self.shared
            .gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

fn new_voice(id: u64, request: &StartRequest, device_rate: u32, start_frame: u64) -> Voice {
    let clip_rate = request.buffer.sample_rate() as f64;
    let frames = request.buffer.frames() as f64;
    let pos = (request.offset.max(0.0) * clip_rate).min(frames);
    let end = ((request.offset + request.duration.max(0.0)) * clip_rate).min(frames);
    Voice {
        id,
        buffer: request.buffer.clone(),
        pos,
        end,
        step: request.rate * clip_rate / device_rate as f64,
        start_frame,
        stop_frame: None,
    }
}

/// Build a CPAL output stream that renders the shared voice.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: &Arc<OutputShared>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<OutputShared>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let shared_cb = shared.clone();
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            let base = shared_cb.rendered_frames.load(Ordering::Relaxed);
            let gain = f32::from_bits(shared_cb.gain_bits.load(Ordering::Relaxed));

            scratch.clear();
            scratch.resize(data.len(), 0.0);
            if let Ok(mut voice) = shared_cb.voice.lock() {
                render_voice(&mut voice, &mut scratch, channels_out, base, gain);
            }
            for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
            }

            shared_cb
                .rendered_frames
                .fetch_add(frames as u64, Ordering::Relaxed);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Render the active voice into interleaved `out`, clearing it once it ends.
///
/// `base_frame` is the hardware frame index of `out[0]`.
fn render_voice(
    slot: &mut Option<Voice>,
    out: &mut [f32],
    channels_out: usize,
    base_frame: u64,
    gain: f32,
) {
    let Some(voice) = slot.as_mut() else {
        return;
    };
    let frames = out.len() / channels_out;
    let mut finished = false;

    for frame in 0..frames {
        let hw_frame = base_frame + frame as u64;
        if hw_frame < voice.start_frame {
            continue;
        }
        if voice.stop_frame.is_some_and(|stop| hw_frame >= stop) || voice.pos >= voice.end {
            finished = true;
            break;
        }
        let src_frame = voice.pos as usize;
        for ch in 0..channels_out {
            out[frame * channels_out + ch] =
                mapped_sample(&voice.buffer, src_frame, channels_out, ch) * gain;
        }
        voice.pos += voice.step;
    }

    if finished {
        *slot = None;
    }
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - stereo → stereo: pass-through
/// - other layouts: best-effort “clamp to available channels”
fn mapped_sample(buffer: &DecodedAudio, frame: usize, dst_channels: usize, dst_ch: usize) -> f32 {
    let src_channels = buffer.channel_count();
    let get_src = |ch: usize| buffer.channel(ch).get(frame).copied().unwrap_or(0.0);

    match (src_channels, dst_channels) {
        (1, 1) => get_src(0),
        (2, 2) => get_src(dst_ch.min(1)),
        (2, 1) => 0.5 * (get_src(0) + get_src(1)),
        (1, 2) => get_src(0),
        _ => get_src(dst_ch.min(src_channels.saturating_sub(1))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_clip() -> Arc<DecodedAudio> {
        Arc::new(
            DecodedAudio::new(4, vec![vec![0.1, 0.2, 0.3, 0.4], vec![-0.1, -0.2, -0.3, -0.4]])
                .unwrap(),
        )
    }

    fn voice_for(buffer: Arc<DecodedAudio>, offset: f64, duration: f64, rate: f64) -> Voice {
        let request = StartRequest {
            buffer,
            when: 0.0,
            offset,
            duration,
            rate,
        };
        new_voice(1, &request, 4, 0)
    }

    #[test]
    fn mapped_sample_downmixes_stereo_to_mono() {
        let clip = stereo_clip();
        assert!((mapped_sample(&clip, 1, 1, 0) - 0.0).abs() < 1e-6);
        assert_eq!(mapped_sample(&clip, 1, 2, 1), -0.2);
        assert_eq!(mapped_sample(&clip, 9, 2, 0), 0.0);
    }

    #[test]
    fn render_voice_plays_range_then_clears() {
        let mut slot = Some(voice_for(stereo_clip(), 0.5, 0.5, 1.0));
        let mut out = vec![0.0f32; 8];
        render_voice(&mut slot, &mut out, 2, 0, 1.0);
        assert_eq!(&out[..4], &[0.3, -0.3, 0.4, -0.4]);
        assert_eq!(&out[4..], &[0.0; 4]);
        assert!(slot.is_none());
    }

    #[test]
    fn render_voice_steps_by_rate_and_applies_gain() {
        let mut slot = Some(voice_for(stereo_clip(), 0.0, 1.0, 2.0));
        let mut out = vec![0.0f32; 2];
        render_voice(&mut slot, &mut out, 1, 0, 0.5);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!(slot.as_ref().is_some_and(|v| (v.pos - 4.0).abs() < 1e-9));
    }

    #[test]
    fn render_voice_waits_for_start_frame_and_honours_stop() {
        let mut voice = voice_for(stereo_clip(), 0.0, 1.0, 1.0);
        voice.start_frame = 2;
        voice.stop_frame = Some(3);
        let mut slot = Some(voice);
        let mut out = vec![0.0f32; 4];
        render_voice(&mut slot, &mut out, 1, 0, 1.0);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 0.0).abs() < 1e-6);
        assert!(slot.is_none());
    }
}
