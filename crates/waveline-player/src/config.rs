use serde::Deserialize;

/// Player tuning parameters shared by the engine, timeline and host tick loop.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Initial playback rate.
    pub audio_rate: f64,
    /// Default step for `skip_forward`/`skip_backward`, in seconds.
    pub skip_length: f64,
    /// Whether a selection drives the loop range.
    pub loop_selection: bool,
    /// Selection boundary markers are visible, draggable borders.
    pub selection_border: bool,
    /// Peaks are produced per channel instead of a single merged trace.
    pub split_channels: bool,
    /// Waveform density used by `default_peak_length`.
    pub min_px_per_sec: f64,
    /// Device pixel ratio used by `default_peak_length`.
    pub pixel_ratio: f64,
    /// Default marker width hint for renderers.
    pub marker_width: u32,
    /// Frames between audio-process ticks at the clip rate.
    pub audio_process_frames: u32,
    /// Animation frame period in milliseconds.
    pub frame_interval_ms: u64,
}

impl Default for PlayerConfig {
    /// Defaults matching a typical waveform view.
    fn default() -> Self {
        Self {
            audio_rate: 1.0,
            skip_length: 2.0,
            loop_selection: true,
            selection_border: false,
            split_channels: false,
            min_px_per_sec: 50.0,
            pixel_ratio: 1.0,
            marker_width: 1,
            audio_process_frames: 256,
            frame_interval_ms: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let cfg: PlayerConfig = serde_json::from_str(r#"{"skip_length": 5.0}"#).unwrap();
        assert_eq!(cfg.skip_length, 5.0);
        assert_eq!(cfg.audio_rate, 1.0);
        assert!(cfg.loop_selection);
        assert_eq!(cfg.audio_process_frames, 256);
    }
}
