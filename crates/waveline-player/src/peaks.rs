//! Waveform peak extraction.
//!
//! Compresses a clip into a fixed number of buckets per channel, keeping the largest
//! absolute sample seen in each bucket. Buckets are sub-sampled with a stride of a
//! tenth of their width, so a true peak can be missed on long clips; renderers rely
//! on the output being identical for identical `(clip, length)` pairs.

use crate::decode::DecodedAudio;

/// How channels are laid out in the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PeakMode {
    /// One peak array per channel.
    #[default]
    Split,
    /// A single array holding the running max across channels.
    Merged,
}

/// Extract `length` peaks per channel from `clip`.
///
/// Returns one array per channel for [`PeakMode::Split`] and a single array for
/// [`PeakMode::Merged`]. Every array has exactly `length` non-negative entries.
pub fn extract_peaks(clip: &DecodedAudio, length: usize, mode: PeakMode) -> Vec<Vec<f32>> {
    extract_channel_peaks(clip.channels(), length, mode)
}

/// Same as [`extract_peaks`] over raw planar channel data.
pub fn extract_channel_peaks(channels: &[Vec<f32>], length: usize, mode: PeakMode) -> Vec<Vec<f32>> {
    match mode {
        PeakMode::Split => channels
            .iter()
            .map(|chan| channel_peaks(chan, length))
            .collect(),
        PeakMode::Merged => {
            let mut merged = vec![0.0f32; length];
            for chan in channels {
                for (slot, peak) in merged.iter_mut().zip(channel_peaks(chan, length)) {
                    if peak > *slot {
                        *slot = peak;
                    }
                }
            }
            vec![merged]
        }
    }
}

fn channel_peaks(chan: &[f32], length: usize) -> Vec<f32> {
    let mut peaks = vec![0.0f32; length];
    if length == 0 || chan.is_empty() {
        return peaks;
    }

    let sample_size = chan.len() as f64 / length as f64;
    let sample_step = ((sample_size / 10.0) as usize).max(1);

    for (i, slot) in peaks.iter_mut().enumerate() {
        let start = (i as f64 * sample_size) as usize;
        let end = ((start as f64 + sample_size) as usize)
            .max(start + 1)
            .min(chan.len());

        let mut max = 0.0f32;
        for value in chan[start.min(end)..end].iter().step_by(sample_step) {
            let magnitude = value.abs();
            if magnitude > max {
                max = magnitude;
            }
        }
        *slot = max;
    }
    peaks
}
