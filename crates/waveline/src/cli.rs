use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "waveline", version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// TOML file with player settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Drive the player with a silent driver and wall clock instead of an output device
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file, printing player events as JSON lines
    Play {
        /// Path to audio file
        path: PathBuf,

        /// Playback rate (1.0 = normal speed)
        #[arg(long)]
        rate: Option<f64>,

        /// Output gain in [0, 1]
        #[arg(long)]
        volume: Option<f32>,

        /// Add a marker at the given position in seconds (repeatable)
        #[arg(long = "mark")]
        marks: Vec<f64>,

        /// Add a region `start:end` in seconds (repeatable)
        #[arg(long = "region", value_parser = parse_span)]
        regions: Vec<(f64, f64)>,

        /// Select `start:end` as fractions of the clip
        #[arg(long, value_parser = parse_span)]
        select: Option<(f64, f64)>,

        /// Do not loop over the selection
        #[arg(long)]
        no_loop: bool,

        /// Start position in seconds
        #[arg(long)]
        start: Option<f64>,

        /// Stop position in seconds
        #[arg(long)]
        end: Option<f64>,
    },

    /// Print waveform peaks of a local file as JSON
    Peaks {
        /// Path to audio file
        path: PathBuf,

        /// Number of peak buckets (defaults to the configured waveform density)
        #[arg(long)]
        width: Option<usize>,
    },
}

/// Parse `start:end` into a pair of numbers.
pub fn parse_span(raw: &str) -> Result<(f64, f64), String> {
    let (start, end) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected start:end, got {raw:?}"))?;
    let start = start
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad start {start:?}: {e}"))?;
    let end = end
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad end {end:?}: {e}"))?;
    Ok((start, end))
}
