use crate::playback::{NarrationSink, PlaybackError};
use crate::voice::VoiceClip;
use futures::future::BoxFuture;
use futures::FutureExt;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use std::sync::{Arc, Mutex};

/// A minimal, poison-tolerant, lazy initializer for a single value.
///
/// Rationale: [`rodio::OutputStream`] must be kept alive for the duration of
/// playback. Opening a new stream per clip drops the previous stream and can
/// truncate or silence the audio mid-narration.
struct LazyInit<T> {
    value: Mutex<Option<T>>,
}

impl<T> LazyInit<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    fn get_or_try_init_with<R, E>(
        &self,
        init: impl FnOnce() -> Result<T, E>,
        f: impl FnOnce(&T) -> R,
        invariant_err: impl FnOnce() -> E,
    ) -> Result<R, E> {
        let mut guard = match self.value.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("output stream cache lock was poisoned; recovering");
                poisoned.into_inner()
            }
        };

        // NOTE: `init` is used at most once (only when the cache is empty).
        if guard.is_none() {
            *guard = Some(init()?);
        }

        match guard.as_ref() {
            Some(v) => Ok(f(v)),
            None => Err(invariant_err()),
        }
    }
}

/// Plays narration clips through the default output device. The one
/// currently-playing [`Sink`] is retained so `stop` can cut it off
/// mid-clip; starting a new clip replaces (and thereby stops) the
/// previous one.
#[derive(Clone)]
pub struct RodioNarrationSink {
    output_stream: Arc<LazyInit<OutputStream>>,
    current: Arc<Mutex<Option<Sink>>>,
}

impl RodioNarrationSink {
    pub fn new() -> Self {
        Self {
            output_stream: Arc::new(LazyInit::new()),
            current: Arc::new(Mutex::new(None)),
        }
    }

    fn connect_sink(&self) -> Result<Sink, PlaybackError> {
        self.output_stream.get_or_try_init_with(
            || {
                OutputStreamBuilder::open_default_stream().map_err(|e| {
                    PlaybackError::AudioOutputUnavailable {
                        details: format!("open default output stream: {e}"),
                    }
                })
            },
            |stream| {
                let mixer = stream.mixer();
                Sink::connect_new(&mixer)
            },
            || PlaybackError::AudioOutputUnavailable {
                details: "internal error: output stream cache invariant violated".to_owned(),
            },
        )
    }

    fn current_guard(&self) -> std::sync::MutexGuard<'_, Option<Sink>> {
        match self.current.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for RodioNarrationSink {
    fn default() -> Self {
        Self::new()
    }
}

impl NarrationSink for RodioNarrationSink {
    fn play(&self, clip: VoiceClip) -> BoxFuture<'_, Result<(), PlaybackError>> {
        async move {
            if clip.sample_rate_hz == 0
                || clip.channels == 0
                || clip.pcm_i16.is_empty()
                || clip.pcm_i16.len() % usize::from(clip.channels) != 0
            {
                tracing::warn!(
                    sample_rate_hz = clip.sample_rate_hz,
                    channels = clip.channels,
                    samples_i16 = clip.pcm_i16.len(),
                    "skipping playback of empty/invalid PCM"
                );
                return Ok(());
            }

            let sink = self.connect_sink()?;
            let source = PcmSource::new(clip.pcm_i16, clip.sample_rate_hz, clip.channels);
            sink.append(source);
            sink.play();

            // Replacing the previous sink drops it, which stops its audio.
            *self.current_guard() = Some(sink);
            Ok(())
        }
        .boxed()
    }

    fn stop(&self) {
        if let Some(sink) = self.current_guard().take() {
            sink.stop();
            tracing::debug!("narration playback stopped");
        }
    }
}

struct PcmSource {
    samples: std::vec::IntoIter<i16>,
    sample_rate: u32,
    channels: u16,
}

impl PcmSource {
    fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into_iter(),
            sample_rate,
            channels,
        }
    }
}

impl Iterator for PcmSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        self.samples.next().map(|s| s as f32 / i16::MAX as f32)
    }
}

impl rodio::source::Source for PcmSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<std::time::Duration> {
        None
    }
}
