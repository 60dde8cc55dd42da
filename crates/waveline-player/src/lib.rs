pub mod clock;
pub mod config;
pub mod decode;
pub mod device;
pub mod driver;
pub mod engine;
pub mod events;
pub mod peaks;
pub mod playback;
pub mod player;
pub mod progress;
pub mod resample;
pub mod status;
pub mod timeline;

pub use config::PlayerConfig;
pub use player::WavePlayer;
