mod basic;
mod elevenlabs;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use self::basic::BasicVoiceSynthesizer;
pub use self::elevenlabs::ElevenLabsVoiceSynthesizer;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceId(pub String);

/// A playable narration clip: interleaved i16 PCM.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VoiceClip {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub pcm_i16: Vec<i16>,
}

impl VoiceClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate_hz == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.pcm_i16.len() as u64 / u64::from(self.channels);
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate_hz))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum VoiceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("voice service error {0}: {1}")]
    Api(u16, String),

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("voice synthesis timed out")]
    Timeout,
}

/// Turns final narration text into a playable clip.
pub trait VoiceSynthesizer: Send + Sync {
    fn synthesize(&self, text: String) -> BoxFuture<'_, Result<VoiceClip, VoiceError>>;
}

impl<T: VoiceSynthesizer + ?Sized> VoiceSynthesizer for Box<T> {
    fn synthesize(&self, text: String) -> BoxFuture<'_, Result<VoiceClip, VoiceError>> {
        (**self).synthesize(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_duration_from_frames() {
        let clip = VoiceClip {
            sample_rate_hz: 1_000,
            channels: 2,
            pcm_i16: vec![0; 4_000],
        };
        assert_eq!(clip.duration(), Duration::from_secs(2));
    }

    #[test]
    fn degenerate_clip_has_zero_duration() {
        let clip = VoiceClip {
            sample_rate_hz: 0,
            channels: 1,
            pcm_i16: vec![0; 100],
        };
        assert_eq!(clip.duration(), Duration::ZERO);
    }
}
