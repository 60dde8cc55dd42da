//! Waveline: play an audio file through the waveform player core and stream its
//! events (progress, markers, regions, selection) to stdout as JSON lines.
//!
//! - `play`: decode, resample to the device rate, and play with optional markers,
//!   regions and a looping selection.
//! - `peaks`: print waveform peaks of a file as JSON.
//!
//! Logs go to stderr so stdout stays machine-readable.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use waveline::cli::{Args, Command};
use waveline::config::{FileConfig, PeaksConfig, PlayConfig};
use waveline::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,waveline=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let device = args.device.clone().or(file.device.clone());
    let mut player = file.player;

    match args.cmd {
        Some(Command::Play {
            path,
            rate,
            volume,
            marks,
            regions,
            select,
            no_loop,
            start,
            end,
        }) => {
            if let Some(rate) = rate {
                player.audio_rate = rate;
            }
            if no_loop {
                player.loop_selection = false;
            }

            let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
            let _ = ctrlc::set_handler(move || {
                let _ = stop_tx.try_send(());
            });

            let config = PlayConfig {
                path,
                device,
                dry_run: args.dry_run,
                player,
                volume,
                marks,
                regions,
                selection: select,
                start,
                end,
            };
            let stdout = std::io::stdout();
            runtime::run_play(config, &stop_rx, &mut stdout.lock())
        }
        Some(Command::Peaks { path, width }) => {
            let stdout = std::io::stdout();
            runtime::run_peaks(PeaksConfig { path, width, player }, &mut stdout.lock())
        }
        None => {
            tracing::warn!("nothing to do; pass a subcommand or --list-devices");
            Ok(())
        }
    }
}
