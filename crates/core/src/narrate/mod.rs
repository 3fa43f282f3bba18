mod gemini;

use crate::emotion::Emotion;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

pub use self::gemini::GeminiNarrativeGenerator;

/// Final copy when no service credential is configured. No call is made.
pub const SERVICE_UNAVAILABLE_COPY: &str =
    "Service temporarily unavailable. Please try again later.";

/// Final copy when the service rejects the request on content-safety
/// grounds. Names a real support line; must stay byte-for-byte stable.
pub const CRISIS_SUPPORT_COPY: &str = "I've detected a sensitive request. For your safety, \
I recommend you contact a professional. You can call 3114 in France (SOS Suicide).";

/// Final copy for any other service failure, including timeouts.
pub const BREATHING_EXERCISE_COPY: &str = "I'm experiencing technical difficulties. \
Here is a calming exercise: Breathe in deeply (4s), hold (4s), breathe out slowly (6s). \
Repeat 3 times.";

#[derive(thiserror::Error, Debug)]
pub enum NarrateError {
    #[error("content policy rejected the request")]
    ContentPolicyRejected,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("narrative service error {0}: {1}")]
    Api(u16, String),

    #[error("invalid narrative response: {0}")]
    InvalidResponse(String),

    #[error("narrative call timed out")]
    Timeout,
}

/// Produces a short calming message for a dominant emotion at a 0–10
/// intensity.
pub trait NarrativeGenerator: Send + Sync {
    fn generate(&self, emotion: Emotion, intensity: u8)
        -> BoxFuture<'_, Result<String, NarrateError>>;
}

impl<T: NarrativeGenerator + ?Sized> NarrativeGenerator for Box<T> {
    fn generate(
        &self,
        emotion: Emotion,
        intensity: u8,
    ) -> BoxFuture<'_, Result<String, NarrateError>> {
        (**self).generate(emotion, intensity)
    }
}

/// Wraps a raw generator with the mandatory fallback policy: the result is
/// always final text. Without a credentialed inner generator the
/// unavailable copy is returned and no call is attempted; a content-policy
/// rejection yields the crisis copy; every other failure, including the
/// per-call timeout, yields the breathing exercise. Fallback copy is never
/// retried.
pub struct CalmFallbackGenerator<G> {
    inner: Option<G>,
    timeout: Duration,
}

impl<G> CalmFallbackGenerator<G> {
    pub fn new(inner: Option<G>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<G: NarrativeGenerator> NarrativeGenerator for CalmFallbackGenerator<G> {
    fn generate(
        &self,
        emotion: Emotion,
        intensity: u8,
    ) -> BoxFuture<'_, Result<String, NarrateError>> {
        async move {
            let Some(inner) = &self.inner else {
                tracing::warn!("narrative credential missing, using unavailable copy");
                return Ok(SERVICE_UNAVAILABLE_COPY.to_owned());
            };

            match tokio::time::timeout(self.timeout, inner.generate(emotion, intensity)).await {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(NarrateError::ContentPolicyRejected)) => {
                    tracing::warn!(%emotion, "narrative request rejected by content policy");
                    Ok(CRISIS_SUPPORT_COPY.to_owned())
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "narrative call failed, using breathing copy");
                    Ok(BREATHING_EXERCISE_COPY.to_owned())
                }
                Err(_) => {
                    tracing::warn!("narrative call timed out, using breathing copy");
                    Ok(BREATHING_EXERCISE_COPY.to_owned())
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum StubOutcome {
        Text(&'static str),
        PolicyRejected,
        ServiceError,
        NeverResolves,
    }

    struct StubGenerator {
        outcome: StubOutcome,
        calls: Arc<AtomicUsize>,
    }

    impl StubGenerator {
        fn new(outcome: StubOutcome) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    outcome,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl NarrativeGenerator for StubGenerator {
        fn generate(
            &self,
            _emotion: Emotion,
            _intensity: u8,
        ) -> BoxFuture<'_, Result<String, NarrateError>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.outcome {
                StubOutcome::Text(t) => async move { Ok(t.to_owned()) }.boxed(),
                StubOutcome::PolicyRejected => {
                    async { Err(NarrateError::ContentPolicyRejected) }.boxed()
                }
                StubOutcome::ServiceError => async {
                    Err(NarrateError::Api(500, "upstream unavailable".to_owned()))
                }
                .boxed(),
                StubOutcome::NeverResolves => futures::future::pending().boxed(),
            }
        }
    }

    fn timeout() -> Duration {
        Duration::from_millis(50)
    }

    #[tokio::test]
    async fn missing_credential_returns_unavailable_copy_without_calling() {
        let generator = CalmFallbackGenerator::<StubGenerator>::new(None, timeout());
        let text = generator
            .generate(Emotion::Sad, 6)
            .await
            .expect("always text");
        assert_eq!(text, SERVICE_UNAVAILABLE_COPY);
    }

    #[tokio::test]
    async fn policy_rejection_returns_crisis_copy_verbatim() {
        let (stub, calls) = StubGenerator::new(StubOutcome::PolicyRejected);
        let generator = CalmFallbackGenerator::new(Some(stub), timeout());
        let text = generator
            .generate(Emotion::Fearful, 9)
            .await
            .expect("always text");
        assert_eq!(text, CRISIS_SUPPORT_COPY);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn generic_failure_returns_breathing_copy() {
        let (stub, _) = StubGenerator::new(StubOutcome::ServiceError);
        let generator = CalmFallbackGenerator::new(Some(stub), timeout());
        let text = generator
            .generate(Emotion::Angry, 7)
            .await
            .expect("always text");
        assert_eq!(text, BREATHING_EXERCISE_COPY);
    }

    #[tokio::test]
    async fn timeout_returns_breathing_copy() {
        let (stub, calls) = StubGenerator::new(StubOutcome::NeverResolves);
        let generator = CalmFallbackGenerator::new(Some(stub), Duration::from_millis(10));
        let text = generator
            .generate(Emotion::Neutral, 1)
            .await
            .expect("always text");
        assert_eq!(text, BREATHING_EXERCISE_COPY);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn success_passes_generated_text_through() {
        let (stub, _) = StubGenerator::new(StubOutcome::Text("take a slow breath"));
        let generator = CalmFallbackGenerator::new(Some(stub), timeout());
        let text = generator
            .generate(Emotion::Happy, 8)
            .await
            .expect("always text");
        assert_eq!(text, "take a slow breath");
    }
}
