use crate::voice::{VoiceClip, VoiceError, VoiceSynthesizer};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::f32::consts::PI;

const SAMPLE_RATE_HZ: u32 = 22_050;
const TONE_HZ: f32 = 220.0;
const AMPLITUDE: f32 = 0.4;
const MIN_DURATION_MS: usize = 1_500;
const MAX_DURATION_MS: usize = 8_000;

/// Offline synthesizer: a soft enveloped tone whose length tracks the text.
/// Used when no voice-service credential is configured.
#[derive(Clone, Debug, Default)]
pub struct BasicVoiceSynthesizer;

impl BasicVoiceSynthesizer {
    pub fn new() -> Self {
        Self
    }
}

impl VoiceSynthesizer for BasicVoiceSynthesizer {
    fn synthesize(&self, text: String) -> BoxFuture<'_, Result<VoiceClip, VoiceError>> {
        async move {
            let duration_ms = (text.len() * 60).clamp(MIN_DURATION_MS, MAX_DURATION_MS);
            let total = (duration_ms * SAMPLE_RATE_HZ as usize) / 1_000;
            // Ramp in and out so the tone reads as a breathing cue rather
            // than a beep.
            let ramp = (SAMPLE_RATE_HZ as usize * 3 / 10).min(total / 2).max(1);

            let mut pcm_i16 = Vec::with_capacity(total);
            for i in 0..total {
                let t = i as f32 / SAMPLE_RATE_HZ as f32;
                let envelope = if i < ramp {
                    i as f32 / ramp as f32
                } else if i >= total - ramp {
                    (total - i) as f32 / ramp as f32
                } else {
                    1.0
                };
                let sample = AMPLITUDE * envelope * (2.0 * PI * TONE_HZ * t).sin();
                pcm_i16.push((sample * f32::from(i16::MAX)) as i16);
            }

            Ok(VoiceClip {
                sample_rate_hz: SAMPLE_RATE_HZ,
                channels: 1,
                pcm_i16,
            })
        }
        .boxed()
    }
}
