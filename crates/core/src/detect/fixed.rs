use crate::camera::CameraFrame;
use crate::detect::{DetectError, ExpressionDetector, Face, FaceLandmarks, LandmarkPoint};
use crate::emotion::ExpressionScores;
use futures::future::BoxFuture;
use futures::FutureExt;

/// Detector that always answers with a configured set of faces. Backs the
/// offline demo mode and tests.
#[derive(Clone, Debug, Default)]
pub struct FixedExpressionDetector {
    faces: Vec<Face>,
}

impl FixedExpressionDetector {
    pub fn with_faces(faces: Vec<Face>) -> Self {
        Self { faces }
    }

    pub fn no_faces() -> Self {
        Self::default()
    }

    /// A single gently-happy face, enough to drive the whole pipeline
    /// without an inference service.
    pub fn demo() -> Self {
        let expressions = ExpressionScores {
            neutral: 0.2,
            happy: 0.7,
            sad: 0.02,
            angry: 0.01,
            fearful: 0.02,
            disgusted: 0.01,
            surprised: 0.04,
        };
        let landmarks = FaceLandmarks {
            points: vec![
                LandmarkPoint { x: 220.0, y: 180.0 },
                LandmarkPoint { x: 420.0, y: 180.0 },
                LandmarkPoint { x: 320.0, y: 300.0 },
            ],
        };
        Self::with_faces(vec![Face {
            expressions,
            landmarks: Some(landmarks),
        }])
    }
}

impl ExpressionDetector for FixedExpressionDetector {
    fn warm_up(&self) -> BoxFuture<'_, Result<(), DetectError>> {
        async { Ok(()) }.boxed()
    }

    fn detect(&self, _frame: CameraFrame) -> BoxFuture<'_, Result<Vec<Face>, DetectError>> {
        let faces = self.faces.clone();
        async move { Ok(faces) }.boxed()
    }
}
