use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub use waveline_player::PlayerConfig;

/// Settings read from `--config`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Output device substring, overridden by `--device`.
    pub device: Option<String>,
    pub player: PlayerConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {:?}", path))?;
        toml::from_str::<FileConfig>(&raw).with_context(|| format!("parse config {:?}", path))
    }
}

/// Everything `run_play` needs, after flags have been merged over the config file.
#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub dry_run: bool,
    pub player: PlayerConfig,
    pub volume: Option<f32>,
    pub marks: Vec<f64>,
    pub regions: Vec<(f64, f64)>,
    pub selection: Option<(f64, f64)>,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct PeaksConfig {
    pub path: PathBuf,
    pub width: Option<usize>,
    pub player: PlayerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_reads_player_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "device = \"USB DAC\"\n\n[player]\nskip_length = 5.0\nsplit_channels = true"
        )
        .unwrap();

        let cfg = FileConfig::load(file.path()).unwrap();
        assert_eq!(cfg.device.as_deref(), Some("USB DAC"));
        assert_eq!(cfg.player.skip_length, 5.0);
        assert!(cfg.player.split_channels);
        assert_eq!(cfg.player.audio_rate, 1.0);
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[player\nskip_length = ").unwrap();

        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parse config"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("read config"));
    }
}
