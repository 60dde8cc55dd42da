//! Hardware playback seam.
//!
//! The engine opens one [`PlaybackHandle`] per play session through an injected
//! [`AudioDriver`] and is the only component that starts or stops it.

use std::sync::Arc;

use anyhow::Result;

use crate::decode::DecodedAudio;

/// Parameters for one hardware playback session.
#[derive(Clone, Debug)]
pub struct StartRequest {
    /// Clip to read from.
    pub buffer: Arc<DecodedAudio>,
    /// Hardware time at which to start (`<= now` means immediately).
    pub when: f64,
    /// Offset into the clip in seconds.
    pub offset: f64,
    /// Seconds of clip to play before the handle stops itself.
    pub duration: f64,
    /// Playback rate (clip seconds per hardware second).
    pub rate: f64,
}

/// An active hardware playback session.
pub trait PlaybackHandle {
    /// Stop output at hardware time `when` (`<= now` means immediately).
    ///
    /// Must be idempotent; dropping a handle stops it as well.
    fn stop(&mut self, when: f64);
}

/// Audio output capable of starting playback sessions.
pub trait AudioDriver {
    fn start(&mut self, request: StartRequest) -> Result<Box<dyn PlaybackHandle>>;

    /// Output gain in `[0, 1]` applied to every session.
    fn set_volume(&mut self, gain: f32);
}

/// Driver that produces no sound. Sessions are accepted and immediately discarded.
#[derive(Debug)]
pub struct NullDriver {
    gain: f32,
}

impl NullDriver {
    pub fn new() -> Self {
        Self { gain: 1.0 }
    }

    pub fn volume(&self) -> f32 {
        self.gain
    }
}

impl Default for NullDriver {
    fn default() -> Self {
        Self::new()
    }
}

struct NullHandle;

impl PlaybackHandle for NullHandle {
    fn stop(&mut self, _when: f64) {}
}

impl AudioDriver for NullDriver {
    fn start(&mut self, request: StartRequest) -> Result<Box<dyn PlaybackHandle>> {
        tracing::debug!(
            offset = request.offset,
            duration = request.duration,
            rate = request.rate,
            "null output session"
        );
        Ok(Box::new(NullHandle))
    }

    fn set_volume(&mut self, gain: f32) {
        self.gain = gain;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_driver_tracks_volume_and_accepts_sessions() {
        let mut driver = NullDriver::new();
        assert_eq!(driver.volume(), 1.0);
        driver.set_volume(0.25);
        assert_eq!(driver.volume(), 0.25);

        let buffer = Arc::new(DecodedAudio::new(10, vec![vec![0.0; 10]]).unwrap());
        let mut handle = driver
            .start(StartRequest {
                buffer,
                when: 0.0,
                offset: 0.0,
                duration: 1.0,
                rate: 1.0,
            })
            .unwrap();
        handle.stop(0.0);
        handle.stop(0.0);
    }

    #[test]
    fn default_null_driver_is_unmuted() {
        assert_eq!(NullDriver::default().volume(), 1.0);
    }
}
