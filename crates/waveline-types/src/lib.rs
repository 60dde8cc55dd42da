use serde::{Deserialize, Serialize};

/// Transport state of a player.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    /// Initial state, and the state after `pause` or a scheduled stop.
    #[default]
    Paused,
    /// Playback reached the end of the clip. Cleared by the next play or seek.
    Finished,
}

/// Snapshot of a marker as seen by hosts and renderers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarkerInfo {
    /// Stable marker id.
    pub id: String,
    /// Position in seconds from the start of the clip.
    pub position: f64,
    /// `position / duration` (0 when nothing is loaded).
    pub percentage: f64,
    /// Whether the marker may be dragged by the user.
    pub draggable: bool,
    /// Renderer hint: marker width in pixels.
    pub width: u32,
    /// Renderer hint: CSS-style colour string.
    pub color: Option<String>,
    /// Position formatted as `m:ss`.
    pub title: String,
}

/// Snapshot of a region.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegionInfo {
    pub id: String,
    /// Start in seconds.
    pub start_position: f64,
    /// End in seconds (`>= start_position`).
    pub end_position: f64,
    pub start_percentage: f64,
    pub end_percentage: f64,
    /// Renderer hint: CSS-style colour string.
    pub color: Option<String>,
}

/// Snapshot of the current drag selection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SelectionInfo {
    pub start_percentage: f64,
    pub start_position: f64,
    pub end_percentage: f64,
    pub end_position: f64,
    /// Start position formatted as `m:ss`.
    pub start_time: String,
    /// End position formatted as `m:ss`.
    pub end_time: String,
    /// Channel the selection was made on, when made on a single channel.
    pub channel: Option<usize>,
}

/// Loop range in seconds, `0 <= start < end <= duration`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoopRange {
    pub start: f64,
    pub end: f64,
}

/// Events published by a player to its host.
///
/// Serialized with a `kind` tag so hosts can consume them as JSON lines.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// A clip finished loading and is ready to play.
    Ready { duration: f64, channels: usize },
    Play,
    Pause,
    /// Playback reached the end of the clip.
    Finish,
    /// Audio-processing tick while playing.
    AudioProcess { time: f64 },
    /// Played fraction in `[0, 1]`, published at display-refresh cadence.
    Progress { fraction: f64 },
    /// A seek completed at the given fraction.
    Seek { fraction: f64 },
    /// A marker was created.
    Marked { marker: MarkerInfo },
    /// Playback crossed a marker.
    Mark { marker: MarkerInfo },
    MarkUpdated { marker: MarkerInfo },
    MarkRemoved { marker: MarkerInfo },
    RegionIn { region: RegionInfo },
    RegionOut { region: RegionInfo },
    RegionCreated { region: RegionInfo },
    RegionUpdated { region: RegionInfo },
    RegionRemoved { region: RegionInfo },
    SelectionUpdate { selection: Option<SelectionInfo> },
    /// Recoverable failure (load, decode, output).
    Error { message: String },
    /// The player is being torn down; no further events follow.
    Destroy,
}

/// Point-in-time status of a player.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    /// Current position in seconds.
    pub current_time: f64,
    /// Clip duration in seconds (0 when nothing is loaded).
    pub duration: f64,
    pub playback_rate: f64,
    /// Output gain in `[0, 1]`.
    pub volume: f32,
    pub muted: bool,
    /// Active loop range, if any.
    pub loop_range: Option<LoopRange>,
    pub markers: usize,
    pub regions: usize,
    /// Channel count of the loaded clip.
    pub channels: Option<usize>,
    /// Sample rate of the loaded clip.
    pub sample_rate: Option<u32>,
}
