mod audio;
mod dummy;

use crate::voice::VoiceClip;
use futures::future::BoxFuture;

pub use self::audio::RodioNarrationSink;
pub use self::dummy::DummyNarrationSink;

#[derive(thiserror::Error, Debug)]
pub enum PlaybackError {
    #[error("audio output unavailable: {details}")]
    AudioOutputUnavailable { details: String },
}

/// Plays one narration clip at a time. `play` replaces whatever was
/// playing; `stop` is synchronous, infallible and idempotent so every
/// reset/teardown path can call it unconditionally.
pub trait NarrationSink: Send + Sync {
    fn play(&self, clip: VoiceClip) -> BoxFuture<'_, Result<(), PlaybackError>>;

    fn stop(&self);
}

impl<T: NarrationSink + ?Sized> NarrationSink for Box<T> {
    fn play(&self, clip: VoiceClip) -> BoxFuture<'_, Result<(), PlaybackError>> {
        (**self).play(clip)
    }

    fn stop(&self) {
        (**self).stop()
    }
}
