use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use cpal::traits::DeviceTrait;
use crossbeam_channel::Receiver;
use serde::Serialize;
use waveline_player::WavePlayer;
use waveline_player::clock::{ClockSource, MonotonicClock};
use waveline_player::decode::SymphoniaDecoder;
use waveline_player::device;
use waveline_player::driver::{AudioDriver, NullDriver};
use waveline_player::events::Subscription;
use waveline_player::playback::CpalOutput;
use waveline_player::timeline::{MarkOptions, RegionOptions};
use waveline_types::{PlaybackState, PlayerEvent};

use crate::config::{PeaksConfig, PlayConfig};

/// Print every output device of the default host.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for (i, info) in device::list_devices(&host)?.iter().enumerate() {
        let default = if info.is_default { " (default)" } else { "" };
        println!(
            "#{i}: {}{default} [{}-{} Hz]",
            info.name, info.min_rate, info.max_rate
        );
    }
    Ok(())
}

/// Play one file, writing player events to `out` as JSON lines until playback
/// stops or a message arrives on `stop`.
pub fn run_play(config: PlayConfig, stop: &Receiver<()>, out: &mut impl Write) -> Result<()> {
    let output = open_output(config.device.clone(), config.dry_run)?;
    let decoder = match output.target_rate {
        Some(rate) => SymphoniaDecoder::with_target_rate(rate),
        None => SymphoniaDecoder::default(),
    };
    let mut player = WavePlayer::new(
        config.player.clone(),
        Arc::new(decoder),
        output.driver,
        output.clock,
    );
    let events = player.subscribe();

    player.load_file(&config.path);
    if let Some(message) = write_events(&events, out)? {
        bail!("load {:?}: {message}", config.path);
    }

    if let Some(volume) = config.volume {
        player.set_volume(volume);
    }
    for position in &config.marks {
        player.mark(MarkOptions::at(*position));
    }
    for (start, end) in &config.regions {
        player.region(RegionOptions::span(*start, *end));
    }
    if let Some((start, end)) = config.selection {
        player.update_selection(start, end, None);
    }
    player.play(config.start, config.end);
    write_events(&events, out)?;

    let clip_rate = player.clip().map(|c| c.sample_rate()).unwrap_or(44_100);
    let audio_period = Duration::from_secs_f64(
        f64::from(config.player.audio_process_frames.max(1)) / f64::from(clip_rate),
    );
    let frame_period = Duration::from_millis(config.player.frame_interval_ms.max(1));
    tracing::debug!(?audio_period, ?frame_period, "tick loop");

    let mut next_audio = Instant::now();
    let mut next_frame = next_audio;
    loop {
        if stop.try_recv().is_ok() {
            tracing::info!("interrupted");
            player.pause();
            write_events(&events, out)?;
            break;
        }

        let now = Instant::now();
        if now >= next_audio {
            player.on_audio_process();
            next_audio = next_deadline(next_audio, audio_period, now);
        }
        if now >= next_frame {
            player.on_animation_frame();
            next_frame = next_deadline(next_frame, frame_period, now);
        }
        write_events(&events, out)?;

        if player.state() != PlaybackState::Playing {
            break;
        }
        if let Some(wait) = next_audio.min(next_frame).checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    tracing::info!(
        state = ?player.state(),
        position_s = player.current_time(),
        duration_s = player.duration(),
        "playback stopped"
    );
    player.destroy();
    write_events(&events, out)?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct PeaksOutput {
    duration: f64,
    sample_rate: u32,
    width: usize,
    peaks: Vec<Vec<f32>>,
}

/// Decode one file and write its waveform peaks to `out` as JSON.
pub fn run_peaks(config: PeaksConfig, out: &mut impl Write) -> Result<()> {
    let mut player = WavePlayer::new(
        config.player,
        Arc::new(SymphoniaDecoder::default()),
        Box::new(NullDriver::new()),
        Arc::new(MonotonicClock::new()),
    );
    let events = player.subscribe();
    player.load_file(&config.path);
    let failure = events.drain().into_iter().find_map(|event| match event {
        PlayerEvent::Error { message } => Some(message),
        _ => None,
    });
    if let Some(message) = failure {
        bail!("load {:?}: {message}", config.path);
    }

    let width = config.width.unwrap_or_else(|| player.default_peak_length());
    let output = PeaksOutput {
        duration: player.duration(),
        sample_rate: player.clip().map(|c| c.sample_rate()).unwrap_or(0),
        width,
        peaks: player.peaks(width),
    };
    serde_json::to_writer(&mut *out, &output)?;
    writeln!(out)?;
    Ok(())
}

struct Output {
    driver: Box<dyn AudioDriver>,
    clock: Arc<dyn ClockSource>,
    target_rate: Option<u32>,
}

fn open_output(device_name: Option<String>, dry_run: bool) -> Result<Output> {
    if dry_run {
        tracing::info!("dry run: no output device");
        return Ok(Output {
            driver: Box::new(NullDriver::new()),
            clock: Arc::new(MonotonicClock::new()),
            target_rate: None,
        });
    }

    let host = cpal::default_host();
    let device_name = normalize_device_name(device_name);
    let device = device::pick_device(&host, device_name.as_deref())?;
    tracing::info!(device = %device.description()?, "output device");
    let default_rate = device
        .default_output_config()
        .ok()
        .map(|config| config.sample_rate());
    let config = device::pick_output_config(&device, default_rate)?;
    let output = CpalOutput::open(&device, &config)?;
    tracing::info!(
        rate_hz = output.sample_rate(),
        channels = output.channels(),
        "device output config"
    );
    Ok(Output {
        clock: output.clock(),
        target_rate: Some(output.sample_rate()),
        driver: Box::new(output),
    })
}

/// Write pending events as JSON lines, returning the first error message seen.
fn write_events(
    events: &Subscription<PlayerEvent>,
    out: &mut impl Write,
) -> Result<Option<String>> {
    let mut failure = None;
    for event in events.try_iter() {
        serde_json::to_writer(&mut *out, &event)?;
        writeln!(out)?;
        if let PlayerEvent::Error { message } = event {
            failure.get_or_insert(message);
        }
    }
    out.flush()?;
    Ok(failure)
}

/// Advance a periodic deadline, skipping missed periods instead of bursting.
fn next_deadline(deadline: Instant, period: Duration, now: Instant) -> Instant {
    let next = deadline + period;
    if next < now { now + period } else { next }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use waveline_player::PlayerConfig;

    fn write_wav(dir: &std::path::Path, rate: u32, frames: usize) -> std::path::PathBuf {
        let path = dir.join("clip.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(i16::MAX / 2).unwrap();
            writer.write_sample(i16::MIN / 4).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn kinds(out: &[u8]) -> Vec<String> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["kind"].as_str().unwrap().to_string()
            })
            .collect()
    }

    fn play_config(path: std::path::PathBuf) -> PlayConfig {
        PlayConfig {
            path,
            device: None,
            dry_run: true,
            player: PlayerConfig::default(),
            volume: None,
            marks: Vec::new(),
            regions: Vec::new(),
            selection: None,
            start: None,
            end: None,
        }
    }

    #[test]
    fn dry_run_plays_to_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), 8_000, 1_600);
        let mut config = play_config(path);
        config.marks = vec![0.05];
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let mut out = Vec::new();

        run_play(config, &rx, &mut out).unwrap();

        let kinds = kinds(&out);
        assert_eq!(kinds.first().map(String::as_str), Some("ready"));
        assert!(kinds.contains(&"marked".to_string()));
        assert!(kinds.contains(&"play".to_string()));
        assert!(kinds.contains(&"mark".to_string()));
        assert!(kinds.contains(&"finish".to_string()));
        let destroy = kinds.iter().position(|k| k == "destroy").unwrap();
        assert_eq!(&kinds[destroy + 1..], ["mark_removed"]);
    }

    #[test]
    fn stop_signal_pauses_playback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), 8_000, 80_000);
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(()).unwrap();
        let mut out = Vec::new();

        run_play(play_config(path), &rx, &mut out).unwrap();

        let kinds = kinds(&out);
        assert!(kinds.contains(&"pause".to_string()));
        assert!(!kinds.contains(&"finish".to_string()));
    }

    #[test]
    fn undecodable_file_fails_play() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"not audio at all").unwrap();
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let mut out = Vec::new();

        let err = run_play(play_config(path), &rx, &mut out).unwrap_err();
        assert!(err.to_string().contains("noise.wav"));
        assert!(kinds(&out).contains(&"error".to_string()));
    }

    #[test]
    fn peaks_are_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), 8_000, 8_000);
        let mut out = Vec::new();

        run_peaks(
            PeaksConfig {
                path,
                width: Some(20),
                player: PlayerConfig::default(),
            },
            &mut out,
        )
        .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["width"], 20);
        assert_eq!(value["sample_rate"], 8_000);
        let peaks = value["peaks"].as_array().unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].as_array().unwrap().len(), 20);
    }

    #[test]
    fn next_deadline_skips_missed_periods() {
        let start = Instant::now();
        let period = Duration::from_millis(10);
        assert_eq!(next_deadline(start, period, start), start + period);

        let late = start + Duration::from_millis(35);
        assert_eq!(next_deadline(start, period, late), late + period);
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("   ".into())), None);
        assert_eq!(
            normalize_device_name(Some("  USB DAC ".into())),
            Some("USB DAC".to_string())
        );
    }
}
