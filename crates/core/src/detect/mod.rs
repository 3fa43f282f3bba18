mod fixed;
mod http;

use crate::camera::CameraFrame;
use crate::emotion::ExpressionScores;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use self::fixed::FixedExpressionDetector;
pub use self::http::HttpExpressionDetector;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FaceLandmarks {
    pub points: Vec<LandmarkPoint>,
}

/// One detected face: the expression probability distribution plus the
/// optional landmark geometry the model reports alongside it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Face {
    pub expressions: ExpressionScores,
    pub landmarks: Option<FaceLandmarks>,
}

#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error("detector models are not loaded")]
    ModelsNotLoaded,

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("detector error {0}: {1}")]
    Api(u16, String),

    #[error("invalid detector response: {0}")]
    InvalidResponse(String),

    #[error("detection timed out")]
    Timeout,
}

/// The expression model. `warm_up` loads/checks the models; `detect` runs a
/// single attempt on one frame and may legitimately find no faces.
pub trait ExpressionDetector: Send + Sync {
    fn warm_up(&self) -> BoxFuture<'_, Result<(), DetectError>>;

    fn detect(&self, frame: CameraFrame) -> BoxFuture<'_, Result<Vec<Face>, DetectError>>;
}

impl<T: ExpressionDetector + ?Sized> ExpressionDetector for Box<T> {
    fn warm_up(&self) -> BoxFuture<'_, Result<(), DetectError>> {
        (**self).warm_up()
    }

    fn detect(&self, frame: CameraFrame) -> BoxFuture<'_, Result<Vec<Face>, DetectError>> {
        (**self).detect(frame)
    }
}
