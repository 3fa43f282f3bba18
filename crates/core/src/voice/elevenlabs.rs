use crate::voice::{VoiceClip, VoiceError, VoiceId, VoiceSynthesizer};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";
const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

#[derive(Clone)]
pub struct ElevenLabsVoiceSynthesizer {
    client: Client,
    api_key: String,
    voice: VoiceId,
    base_url: String,
}

impl ElevenLabsVoiceSynthesizer {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            voice: VoiceId(DEFAULT_VOICE_ID.to_owned()),
            base_url: ELEVENLABS_BASE_URL.to_owned(),
        }
    }

    pub fn with_voice(mut self, voice: VoiceId) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[derive(Serialize)]
struct SynthesisRequest {
    text: String,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

impl VoiceSettings {
    // High stability, no styling: the narration should sound steady.
    fn calm() -> Self {
        Self {
            stability: 0.8,
            similarity_boost: 0.75,
            style: 0.0,
            use_speaker_boost: true,
        }
    }
}

impl VoiceSynthesizer for ElevenLabsVoiceSynthesizer {
    fn synthesize(&self, text: String) -> BoxFuture<'_, Result<VoiceClip, VoiceError>> {
        let this = self.clone();
        async move {
            let url = format!(
                "{}/text-to-speech/{}/stream",
                this.base_url, this.voice.0
            );

            let request = SynthesisRequest {
                text,
                voice_settings: VoiceSettings::calm(),
            };

            let response = this
                .client
                .post(&url)
                .header("xi-api-key", &this.api_key)
                .header("Content-Type", "application/json")
                .header("Accept", "audio/mpeg")
                .json(&request)
                .send()
                .await
                .map_err(VoiceError::Http)?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(VoiceError::Api(status, body));
            }

            let audio = response.bytes().await.map_err(VoiceError::Http)?;
            decode_mp3(&audio)
        }
        .boxed()
    }
}

/// Decodes an MP3 body into interleaved i16 PCM.
fn decode_mp3(data: &[u8]) -> Result<VoiceClip, VoiceError> {
    let cursor = std::io::Cursor::new(data.to_vec());
    let stream = MediaSourceStream::new(Box::new(cursor), Default::default());
    let mut hint = Hint::new();
    hint.mime_type("audio/mpeg");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| VoiceError::Decode(format!("unrecognized audio container: {e}")))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| VoiceError::Decode("no audio track in response".to_owned()))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| VoiceError::Decode(format!("decoder init failed: {e}")))?;

    let mut sample_rate_hz = 0u32;
    let mut channels = 0u16;
    let mut pcm_i16 = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(VoiceError::Decode(format!("demux failed: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(error = %e, "skipping undecodable mp3 packet");
                continue;
            }
            Err(e) => return Err(VoiceError::Decode(format!("decode failed: {e}"))),
        };

        let spec = *decoded.spec();
        sample_rate_hz = spec.rate;
        channels = spec.channels.count() as u16;
        let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        pcm_i16.extend_from_slice(buffer.samples());
    }

    if pcm_i16.is_empty() || sample_rate_hz == 0 || channels == 0 {
        return Err(VoiceError::Decode("mp3 body contained no audio".to_owned()));
    }

    Ok(VoiceClip {
        sample_rate_hz,
        channels,
        pcm_i16,
    })
}
