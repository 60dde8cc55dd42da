//! Whole-clip resample stage.
//!
//! Uses Rubato to convert a decoded clip from its source rate to the output device
//! rate once, at load time, so playback only has to deal with the playback rate.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::decode::DecodedAudio;

/// Resample `clip` to `dst_rate`, feeding the resampler `chunk_frames` at a time.
///
/// The final partial chunk is flushed with `partial_len` so the tail is not lost.
pub fn resample_clip(clip: &DecodedAudio, dst_rate: u32, chunk_frames: usize) -> Result<DecodedAudio> {
    if dst_rate == 0 {
        return Err(anyhow!("target sample rate must be non-zero"));
    }
    let src_rate = clip.sample_rate();
    if src_rate == dst_rate || clip.frames() == 0 {
        return DecodedAudio::new(dst_rate, clip.channels().to_vec());
    }

    let channels = clip.channel_count();
    let f_ratio = dst_rate as f64 / src_rate as f64;

    let sinc_len = 128;
    let oversampling_factor = 256;
    let interpolation = SincInterpolationType::Cubic;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);

    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation,
        oversampling_factor,
        window,
    };

    let chunk_in_frames = chunk_frames.max(1);
    let mut resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        chunk_in_frames,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| anyhow!("resampler init error: {e}"))?;

    let out_chunk_frames = (chunk_in_frames as f64 * f_ratio * 1.2).ceil() as usize + 16;
    let mut out_interleaved = vec![0.0f32; channels * out_chunk_frames];
    let mut produced: Vec<f32> =
        Vec::with_capacity((clip.frames() as f64 * f_ratio) as usize * channels + channels);

    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let total_frames = clip.frames();
    let mut in_interleaved = vec![0.0f32; channels * chunk_in_frames];
    let mut frame = 0usize;
    while frame < total_frames {
        let take = (total_frames - frame).min(chunk_in_frames);
        in_interleaved.fill(0.0);
        for i in 0..take {
            for ch in 0..channels {
                in_interleaved[i * channels + ch] = clip.channel(ch)[frame + i];
            }
        }

        let input_adapter = InterleavedSlice::new(&in_interleaved, channels, chunk_in_frames)
            .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut out_interleaved, channels, out_chunk_frames)
                .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

        indexing.input_offset = 0;
        indexing.output_offset = 0;
        indexing.partial_len = if take < chunk_in_frames { Some(take) } else { None };

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process error: {e}"))?;

        produced.extend_from_slice(&out_interleaved[..nbr_out * channels]);
        frame += take;
    }

    let expected_frames = (total_frames as f64 * f_ratio).round() as usize;
    produced.truncate(expected_frames * channels);
    DecodedAudio::from_interleaved(dst_rate, channels, &produced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_same_rate_is_identity() {
        let clip = DecodedAudio::new(48_000, vec![vec![0.25; 480]]).unwrap();
        let out = resample_clip(&clip, 48_000, 256).unwrap();
        assert_eq!(out, clip);
    }

    #[test]
    fn resample_doubles_frame_count() {
        let clip = DecodedAudio::new(22_050, vec![vec![0.1; 22_050], vec![-0.1; 22_050]]).unwrap();
        let out = resample_clip(&clip, 44_100, 1024).unwrap();
        assert_eq!(out.sample_rate(), 44_100);
        assert_eq!(out.channel_count(), 2);
        assert!(out.frames() <= 44_100);
        assert!(out.frames() > 40_000);
    }

    #[test]
    fn resample_rejects_zero_rate() {
        let clip = DecodedAudio::new(8_000, vec![vec![0.0; 8]]).unwrap();
        assert!(resample_clip(&clip, 0, 64).is_err());
    }
}
