//! Whole-clip audio decode stage.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode every packet into per-channel `f32` sample arrays
//! - optionally resample the result to the output device rate
//!
//! The player only ever sees the resulting [`DecodedAudio`]; decoders are injected
//! through the [`AudioDecoder`] trait so hosts can bring their own.

use std::io::Cursor;
use std::sync::Arc;
use std::thread;

use anyhow::{Result, anyhow};
use crossbeam_channel::Receiver;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::CodecParameters;
use symphonia::core::{
    codecs::DecoderOptions, formats::FormatOptions, io::MediaSourceStream,
    meta::MetadataOptions, probe::Hint,
};

use crate::resample;

/// Immutable decoded clip: one `f32` sample array per channel, all the same length.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudio {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Build a clip from planar channel data.
    ///
    /// Fails when the sample rate is zero, no channels are given, or the channels
    /// disagree on length.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(anyhow!("sample rate must be non-zero"));
        }
        let Some(first) = channels.first() else {
            return Err(anyhow!("clip has no channels"));
        };
        let frames = first.len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(anyhow!("channel lengths differ"));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Build a clip from interleaved samples.
    pub fn from_interleaved(sample_rate: u32, channels: usize, samples: &[f32]) -> Result<Self> {
        if channels == 0 {
            return Err(anyhow!("clip has no channels"));
        }
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (ch, sample) in frame.iter().enumerate() {
                planar[ch].push(*sample);
            }
        }
        Self::new(sample_rate, planar)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Samples of channel `index`, empty when out of range.
    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Clip length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Decoder capability injected into the player.
pub trait AudioDecoder: Send + Sync {
    /// Decode a complete encoded file held in memory.
    ///
    /// `hint` is an optional file extension (`"flac"`, `"wav"`, ...).
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<DecodedAudio>;
}

/// Symphonia-backed decoder.
#[derive(Clone, Debug)]
pub struct SymphoniaDecoder {
    /// When set, decoded clips are resampled to this rate.
    pub target_rate: Option<u32>,
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
}

impl Default for SymphoniaDecoder {
    fn default() -> Self {
        Self {
            target_rate: None,
            chunk_frames: 1024,
        }
    }
}

impl SymphoniaDecoder {
    /// Decoder that resamples to `rate` (typically the output device rate).
    pub fn with_target_rate(rate: u32) -> Self {
        Self {
            target_rate: Some(rate),
            chunk_frames: 1024,
        }
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<DecodedAudio> {
        let decoded = decode_all(bytes, hint)?;
        match self.target_rate {
            Some(rate) if rate != decoded.sample_rate() => {
                tracing::debug!(from_hz = decoded.sample_rate(), to_hz = rate, "resampling clip");
                resample::resample_clip(&decoded, rate, self.chunk_frames)
            }
            _ => Ok(decoded),
        }
    }
}

/// Probe and decode every packet of an in-memory file.
pub fn decode_all(bytes: Vec<u8>, ext_hint: Option<&str>) -> Result<DecodedAudio> {
    let mut hint = Hint::new();
    if let Some(ext) = ext_hint.filter(|s| !s.is_empty()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;
    let track_id = track.id;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();
    let rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;

    let codec_params: CodecParameters = track.codec_params.clone();
    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break, // EOF
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue,
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    if interleaved.len() < channels {
        return Err(anyhow!("no decodable audio"));
    }

    tracing::debug!(
        rate_hz = rate,
        channels,
        frames = interleaved.len() / channels,
        "clip decoded"
    );
    DecodedAudio::from_interleaved(rate, channels, &interleaved)
}

/// Decode on a background thread; the result arrives on the returned channel.
pub fn spawn_decode(
    decoder: Arc<dyn AudioDecoder>,
    bytes: Vec<u8>,
    hint: Option<String>,
) -> Receiver<Result<DecodedAudio>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let result = decoder.decode(bytes, hint.as_deref());
        if let Err(e) = &result {
            tracing::warn!("decoder thread error: {e:#}");
        }
        let _ = tx.send(result);
    });
    rx
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn wav_bytes(rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                for ch in 0..channels {
                    let v = if ch == 0 { (i % 100) as i16 * 100 } else { -1000 };
                    writer.write_sample(v).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decoded_audio_rejects_mismatched_channels() {
        assert!(DecodedAudio::new(48_000, vec![vec![0.0; 4], vec![0.0; 3]]).is_err());
        assert!(DecodedAudio::new(0, vec![vec![0.0; 4]]).is_err());
        assert!(DecodedAudio::new(48_000, Vec::new()).is_err());
    }

    #[test]
    fn from_interleaved_splits_channels() {
        let audio = DecodedAudio::from_interleaved(4, 2, &[1.0, -1.0, 2.0, -2.0]).unwrap();
        assert_eq!(audio.channel(0), &[1.0, 2.0]);
        assert_eq!(audio.channel(1), &[-1.0, -2.0]);
        assert_eq!(audio.frames(), 2);
        assert!((audio.duration() - 0.5).abs() < 1e-9);
        assert!(audio.channel(5).is_empty());
    }

    #[test]
    fn decode_all_reads_wav() {
        let bytes = wav_bytes(8_000, 2, 8_000);
        let audio = decode_all(bytes, Some("wav")).unwrap();
        assert_eq!(audio.sample_rate(), 8_000);
        assert_eq!(audio.channel_count(), 2);
        assert_eq!(audio.frames(), 8_000);
        assert!((audio.duration() - 1.0).abs() < 1e-6);
        assert!(audio.channel(1).iter().all(|s| *s < 0.0));
    }

    #[test]
    fn decode_all_rejects_garbage() {
        assert!(decode_all(vec![0u8; 64], None).is_err());
    }

    #[test]
    fn spawn_decode_delivers_result() {
        let decoder: Arc<dyn AudioDecoder> = Arc::new(SymphoniaDecoder::default());
        let rx = spawn_decode(decoder, wav_bytes(8_000, 1, 800), Some("wav".to_string()));
        let audio = rx.recv().unwrap().unwrap();
        assert_eq!(audio.frames(), 800);
    }
}
