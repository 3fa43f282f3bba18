use crate::playback::{NarrationSink, PlaybackError};
use crate::voice::VoiceClip;
use futures::future::BoxFuture;
use futures::FutureExt;

/// Discards clips. Useful for headless runs and as a test double.
#[derive(Clone, Debug, Default)]
pub struct DummyNarrationSink;

impl DummyNarrationSink {
    pub fn new() -> Self {
        Self
    }
}

impl NarrationSink for DummyNarrationSink {
    fn play(&self, _clip: VoiceClip) -> BoxFuture<'_, Result<(), PlaybackError>> {
        async { Ok(()) }.boxed()
    }

    fn stop(&self) {}
}
