//! Timeline annotations: markers, regions and the drag selection.
//!
//! Crossing detection is tick-granular. Each audio-process tick tests markers
//! against `[prev_time, time]` and regions against `time`; the transient
//! `played`/`entered`/`exited` flags make every crossing fire once per playback.

use waveline_types::{MarkerInfo, RegionInfo, SelectionInfo};

use crate::events::{EventBus, Subscription};

const SELECTION_COLOR: &str = "#0fc";
const SELECTION_BORDER_COLOR: &str = "#000";
const SELECTION_BORDER_WIDTH: u32 = 2;
const REGION_COLOR: &str = "rgba(0, 0, 255, 0.2)";
const MARKER_COLOR: &str = "#333";

/// Notifications published by [`AnnotationIndex`].
#[derive(Clone, Debug, PartialEq)]
pub enum TimelineEvent {
    Marked(MarkerInfo),
    Reached(MarkerInfo),
    MarkUpdated(MarkerInfo),
    MarkRemoved(MarkerInfo),
    RegionCreated(RegionInfo),
    RegionUpdated(RegionInfo),
    RegionRemoved(RegionInfo),
    RegionIn(RegionInfo),
    RegionOut(RegionInfo),
    SelectionUpdate(Option<SelectionInfo>),
}

/// Marker creation/update request. Unset fields keep their current value on
/// update and take defaults on creation.
#[derive(Clone, Debug, Default)]
pub struct MarkOptions {
    pub id: Option<String>,
    /// Position in seconds. Takes precedence over `percentage`.
    pub position: Option<f64>,
    /// Position as a fraction of the duration.
    pub percentage: Option<f64>,
    pub draggable: Option<bool>,
    pub width: Option<u32>,
    pub color: Option<String>,
}

impl MarkOptions {
    pub fn at(position: f64) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }
}

/// Region creation/update request.
#[derive(Clone, Debug, Default)]
pub struct RegionOptions {
    pub id: Option<String>,
    pub start_position: f64,
    pub end_position: f64,
    pub color: Option<String>,
}

impl RegionOptions {
    pub fn span(start_position: f64, end_position: f64) -> Self {
        Self {
            start_position,
            end_position,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Marker {
    id: String,
    position: f64,
    draggable: bool,
    width: u32,
    color: Option<String>,
    played: bool,
}

#[derive(Debug)]
struct Region {
    id: String,
    start: f64,
    end: f64,
    color: Option<String>,
    entered: bool,
    exited: bool,
}

#[derive(Debug)]
struct Selection {
    start_id: String,
    end_id: String,
    channel: Option<usize>,
}

/// Markers, regions and the selection of one loaded clip.
pub struct AnnotationIndex {
    markers: Vec<Marker>,
    regions: Vec<Region>,
    selection: Option<Selection>,
    duration: f64,
    prev_time: f64,
    marker_width: u32,
    selection_border: bool,
    events: EventBus<TimelineEvent>,
}

impl AnnotationIndex {
    pub fn new(marker_width: u32, selection_border: bool) -> Self {
        Self {
            markers: Vec::new(),
            regions: Vec::new(),
            selection: None,
            duration: 0.0,
            prev_time: 0.0,
            marker_width,
            selection_border,
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription<TimelineEvent> {
        self.events.subscribe()
    }

    /// Duration used for clamping and percentages. Resets the crossing cursor.
    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        self.prev_time = 0.0;
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Re-arm every marker and region for a new playback.
    pub fn on_play(&mut self) {
        for marker in &mut self.markers {
            marker.played = false;
        }
        for region in &mut self.regions {
            region.entered = false;
            region.exited = false;
        }
    }

    /// Crossing detection for one audio-process tick at `time`.
    pub fn on_audio_process(&mut self, time: f64) {
        let prev = self.prev_time;
        let mut fired = Vec::new();

        for marker in &mut self.markers {
            if !marker.played && prev <= marker.position && marker.position <= time {
                marker.played = true;
                fired.push(TimelineEvent::Reached(marker_info(marker, self.duration)));
            }
        }
        for region in &mut self.regions {
            if !region.entered && region.start <= time && time <= region.end {
                region.entered = true;
                fired.push(TimelineEvent::RegionIn(region_info(region, self.duration)));
            }
            if !region.exited && time > region.end {
                region.exited = true;
                fired.push(TimelineEvent::RegionOut(region_info(region, self.duration)));
            }
        }

        self.prev_time = time;
        for event in fired {
            self.events.emit(event);
        }
    }

    /// Create a marker, or update it when `options.id` already exists.
    ///
    /// Without a position or percentage a new marker is placed at `current_time`.
    pub fn mark(&mut self, options: MarkOptions, current_time: f64) -> MarkerInfo {
        if let Some(idx) = options.id.as_deref().and_then(|id| self.marker_index(id)) {
            return self.apply_mark_update(idx, options);
        }

        let position = self
            .resolve_position(&options)
            .unwrap_or_else(|| self.clamp(current_time));
        let marker = Marker {
            id: options.id.unwrap_or_else(new_id),
            position,
            draggable: options.draggable.unwrap_or(false),
            width: options.width.unwrap_or(self.marker_width),
            color: options.color.or_else(|| Some(MARKER_COLOR.to_string())),
            played: false,
        };
        let info = marker_info(&marker, self.duration);
        tracing::debug!(id = %info.id, position = info.position, "marker created");
        self.markers.push(marker);
        self.events.emit(TimelineEvent::Marked(info.clone()));
        info
    }

    /// Apply the set fields of `options` to marker `id`.
    pub fn update_mark(&mut self, id: &str, options: MarkOptions) -> Option<MarkerInfo> {
        let idx = self.marker_index(id)?;
        Some(self.apply_mark_update(idx, options))
    }

    fn apply_mark_update(&mut self, idx: usize, options: MarkOptions) -> MarkerInfo {
        let position = self.resolve_position(&options);
        let marker = &mut self.markers[idx];
        if let Some(position) = position {
            marker.position = position;
        }
        if let Some(draggable) = options.draggable {
            marker.draggable = draggable;
        }
        if let Some(width) = options.width {
            marker.width = width;
        }
        if options.color.is_some() {
            marker.color = options.color;
        }
        let info = marker_info(marker, self.duration);
        self.events.emit(TimelineEvent::MarkUpdated(info.clone()));
        info
    }

    /// Drag of a free marker to `fraction` of the duration.
    pub fn move_mark(&mut self, id: &str, fraction: f64) -> Option<MarkerInfo> {
        self.update_mark(
            id,
            MarkOptions {
                percentage: Some(fraction),
                ..MarkOptions::default()
            },
        )
    }

    /// Remove marker `id`, emitting [`TimelineEvent::MarkRemoved`].
    ///
    /// Removing a selection boundary drops the selection with it.
    pub fn remove_mark(&mut self, id: &str) -> Option<MarkerInfo> {
        let idx = self.marker_index(id)?;
        let marker = self.markers.remove(idx);
        if self.is_selection_boundary(id) {
            self.selection = None;
        }
        let info = marker_info(&marker, self.duration);
        self.events.emit(TimelineEvent::MarkRemoved(info.clone()));
        Some(info)
    }

    /// Remove every marker in insertion order.
    pub fn clear_marks(&mut self) {
        self.selection = None;
        for marker in std::mem::take(&mut self.markers) {
            self.events
                .emit(TimelineEvent::MarkRemoved(marker_info(&marker, self.duration)));
        }
    }

    pub fn marker(&self, id: &str) -> Option<MarkerInfo> {
        self.marker_index(id)
            .map(|idx| marker_info(&self.markers[idx], self.duration))
    }

    /// Snapshot of every marker in insertion order.
    pub fn markers(&self) -> Vec<MarkerInfo> {
        self.markers
            .iter()
            .map(|m| marker_info(m, self.duration))
            .collect()
    }

    /// Create a region, or update it when `options.id` already exists.
    /// Bounds are clamped and swapped when reversed.
    pub fn region(&mut self, options: RegionOptions) -> RegionInfo {
        if let Some(idx) = options.id.as_deref().and_then(|id| self.region_index(id)) {
            return self.apply_region_update(idx, options);
        }

        let (start, end) = self.resolve_span(options.start_position, options.end_position);
        let region = Region {
            id: options.id.unwrap_or_else(new_id),
            start,
            end,
            color: options.color.or_else(|| Some(REGION_COLOR.to_string())),
            entered: false,
            exited: false,
        };
        let info = region_info(&region, self.duration);
        tracing::debug!(id = %info.id, start, end, "region created");
        self.regions.push(region);
        self.events.emit(TimelineEvent::RegionCreated(info.clone()));
        info
    }

    pub fn update_region(&mut self, id: &str, options: RegionOptions) -> Option<RegionInfo> {
        let idx = self.region_index(id)?;
        Some(self.apply_region_update(idx, options))
    }

    fn apply_region_update(&mut self, idx: usize, options: RegionOptions) -> RegionInfo {
        let (start, end) = self.resolve_span(options.start_position, options.end_position);
        let region = &mut self.regions[idx];
        region.start = start;
        region.end = end;
        if options.color.is_some() {
            region.color = options.color;
        }
        let info = region_info(region, self.duration);
        self.events.emit(TimelineEvent::RegionUpdated(info.clone()));
        info
    }

    pub fn remove_region(&mut self, id: &str) -> Option<RegionInfo> {
        let idx = self.region_index(id)?;
        let info = region_info(&self.regions.remove(idx), self.duration);
        self.events.emit(TimelineEvent::RegionRemoved(info.clone()));
        Some(info)
    }

    pub fn clear_regions(&mut self) {
        for region in std::mem::take(&mut self.regions) {
            self.events
                .emit(TimelineEvent::RegionRemoved(region_info(&region, self.duration)));
        }
    }

    pub fn regions(&self) -> Vec<RegionInfo> {
        self.regions
            .iter()
            .map(|r| region_info(r, self.duration))
            .collect()
    }

    /// Set the selection to `[start, end]` (fractions, swapped when reversed),
    /// creating or moving its boundary markers. Returns the resolved fractions.
    pub fn update_selection(
        &mut self,
        start_fraction: f64,
        end_fraction: f64,
        channel: Option<usize>,
    ) -> (f64, f64) {
        let mut p0 = clamp_unit(start_fraction);
        let mut p1 = clamp_unit(end_fraction);
        if p0 > p1 {
            std::mem::swap(&mut p0, &mut p1);
        }

        let existing = self
            .selection
            .as_ref()
            .map(|s| (s.start_id.clone(), s.end_id.clone()))
            .filter(|(a, b)| self.marker_index(a).is_some() && self.marker_index(b).is_some());

        let (start_id, end_id) = match existing {
            Some((a, b)) => {
                self.update_mark(&a, fraction_options(p0));
                self.update_mark(&b, fraction_options(p1));
                (a, b)
            }
            None => {
                let a = self.selection_mark(p0).id;
                let b = self.selection_mark(p1).id;
                (a, b)
            }
        };
        self.selection = Some(Selection {
            start_id,
            end_id,
            channel,
        });

        self.events
            .emit(TimelineEvent::SelectionUpdate(self.selection()));
        (p0, p1)
    }

    fn selection_mark(&mut self, fraction: f64) -> MarkerInfo {
        let (color, width) = if self.selection_border {
            (SELECTION_BORDER_COLOR, SELECTION_BORDER_WIDTH)
        } else {
            (SELECTION_COLOR, 0)
        };
        let options = MarkOptions {
            width: Some(width),
            color: Some(color.to_string()),
            draggable: Some(self.selection_border),
            ..fraction_options(fraction)
        };
        self.mark(options, 0.0)
    }

    /// Drag of a selection boundary marker to `fraction`. Returns the resolved
    /// fractions, or `None` when `id` is not a boundary.
    pub fn update_selection_by_mark(&mut self, id: &str, fraction: f64) -> Option<(f64, f64)> {
        let selection = self.selection.as_ref()?;
        let start = self.marker(&selection.start_id)?.percentage;
        let end = self.marker(&selection.end_id)?.percentage;
        let (p0, p1) = if id == selection.start_id {
            (fraction, end)
        } else if id == selection.end_id {
            (start, fraction)
        } else {
            return None;
        };
        Some(self.update_selection(p0, p1, None))
    }

    /// Remove both boundary markers. Always publishes a selection update.
    pub fn clear_selection(&mut self) -> bool {
        let had_selection = match self.selection.take() {
            Some(selection) => {
                self.remove_mark(&selection.start_id);
                self.remove_mark(&selection.end_id);
                true
            }
            None => false,
        };
        self.events.emit(TimelineEvent::SelectionUpdate(None));
        had_selection
    }

    pub fn is_selection_boundary(&self, id: &str) -> bool {
        self.selection
            .as_ref()
            .is_some_and(|s| s.start_id == id || s.end_id == id)
    }

    pub fn selection(&self) -> Option<SelectionInfo> {
        let selection = self.selection.as_ref()?;
        let start = self.marker(&selection.start_id)?;
        let end = self.marker(&selection.end_id)?;
        Some(SelectionInfo {
            start_percentage: start.percentage,
            start_position: start.position,
            end_percentage: end.percentage,
            end_position: end.position,
            start_time: start.title,
            end_time: end.title,
            channel: selection.channel,
        })
    }

    /// Remove every annotation with notifications and reset the crossing cursor.
    pub fn clear(&mut self) {
        self.clear_marks();
        self.clear_regions();
        self.prev_time = 0.0;
    }

    /// Drop every subscriber.
    pub fn close(&mut self) {
        self.events.clear();
    }

    fn marker_index(&self, id: &str) -> Option<usize> {
        self.markers.iter().position(|m| m.id == id)
    }

    fn region_index(&self, id: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.id == id)
    }

    fn clamp(&self, position: f64) -> f64 {
        if position.is_finite() {
            position.clamp(0.0, self.duration)
        } else {
            0.0
        }
    }

    fn resolve_position(&self, options: &MarkOptions) -> Option<f64> {
        options
            .position
            .or_else(|| options.percentage.map(|p| p * self.duration))
            .map(|p| self.clamp(p))
    }

    fn resolve_span(&self, start: f64, end: f64) -> (f64, f64) {
        let (start, end) = (self.clamp(start), self.clamp(end));
        if start > end { (end, start) } else { (start, end) }
    }
}

fn fraction_options(fraction: f64) -> MarkOptions {
    MarkOptions {
        percentage: Some(fraction),
        ..MarkOptions::default()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

fn fraction_of(position: f64, duration: f64) -> f64 {
    if duration > 0.0 { position / duration } else { 0.0 }
}

/// Format seconds as `m:ss`.
pub fn format_title(position: f64) -> String {
    let secs = position.max(0.0) as u64;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn marker_info(marker: &Marker, duration: f64) -> MarkerInfo {
    MarkerInfo {
        id: marker.id.clone(),
        position: marker.position,
        percentage: fraction_of(marker.position, duration),
        draggable: marker.draggable,
        width: marker.width,
        color: marker.color.clone(),
        title: format_title(marker.position),
    }
}

fn region_info(region: &Region, duration: f64) -> RegionInfo {
    RegionInfo {
        id: region.id.clone(),
        start_position: region.start,
        end_position: region.end,
        start_percentage: fraction_of(region.start, duration),
        end_percentage: fraction_of(region.end, duration),
        color: region.color.clone(),
    }
}
