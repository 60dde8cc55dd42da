use waveline_types::PlayerStatus;

use crate::player::WavePlayer;

impl WavePlayer {
    /// Point-in-time snapshot for hosts and the CLI.
    pub fn status(&self) -> PlayerStatus {
        let clip = self.clip();
        PlayerStatus {
            state: self.state(),
            current_time: self.current_time(),
            duration: self.duration(),
            playback_rate: self.playback_rate(),
            volume: self.volume(),
            muted: self.is_muted(),
            loop_range: self.loop_range(),
            markers: self.markers().len(),
            regions: self.regions().len(),
            channels: clip.map(|c| c.channel_count()),
            sample_rate: clip.map(|c| c.sample_rate()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use waveline_types::{LoopRange, PlaybackState};

    use crate::clock::ManualClock;
    use crate::config::PlayerConfig;
    use crate::decode::{DecodedAudio, SymphoniaDecoder};
    use crate::driver::NullDriver;
    use crate::player::WavePlayer;
    use crate::timeline::MarkOptions;

    #[test]
    fn status_reflects_player() {
        let clock = Arc::new(ManualClock::new());
        let mut player = WavePlayer::new(
            PlayerConfig::default(),
            Arc::new(SymphoniaDecoder::default()),
            Box::new(NullDriver::new()),
            clock.clone(),
        );
        assert_eq!(player.status().duration, 0.0);
        assert_eq!(player.status().channels, None);

        player.load_decoded(DecodedAudio::new(48_000, vec![vec![0.0; 96_000]]).unwrap());
        player.mark(MarkOptions::at(1.0));
        player.update_selection(0.25, 0.75, None);
        player.play(None, None);
        clock.advance(0.5);

        let status = player.status();
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.current_time, 0.5);
        assert_eq!(status.duration, 2.0);
        assert_eq!(status.markers, 3);
        assert_eq!(status.loop_range, Some(LoopRange { start: 0.5, end: 1.5 }));
        assert_eq!(status.sample_rate, Some(48_000));
        assert!(!status.muted);
    }
}
