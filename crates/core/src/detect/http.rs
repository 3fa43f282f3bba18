use crate::camera::CameraFrame;
use crate::detect::{DetectError, ExpressionDetector, Face, FaceLandmarks, LandmarkPoint};
use crate::emotion::ExpressionScores;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Client for a face-expression inference service. `warm_up` probes the
/// model endpoint once; until that has succeeded every `detect` answers
/// [`DetectError::ModelsNotLoaded`] without going to the network.
#[derive(Clone)]
pub struct HttpExpressionDetector {
    client: Client,
    base: Url,
    warmed: Arc<AtomicBool>,
}

#[derive(Deserialize)]
struct DetectResponse {
    faces: Vec<FaceWire>,
}

#[derive(Deserialize)]
struct FaceWire {
    expressions: ExpressionScores,
    landmarks: Option<Vec<LandmarkPoint>>,
}

impl HttpExpressionDetector {
    pub fn new(base: Url) -> Result<Self, DetectError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(DetectError::Http)?;

        Ok(Self {
            client,
            base,
            warmed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn from_url_str(base: &str) -> Result<Self, DetectError> {
        let base: Url = base.parse()?;
        Self::new(base)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
    }
}

fn faces_from_response(response: DetectResponse) -> Vec<Face> {
    response
        .faces
        .into_iter()
        .map(|wire| Face {
            expressions: wire.expressions,
            landmarks: wire.landmarks.map(|points| FaceLandmarks { points }),
        })
        .collect()
}

impl ExpressionDetector for HttpExpressionDetector {
    fn warm_up(&self) -> BoxFuture<'_, Result<(), DetectError>> {
        let this = self.clone();
        async move {
            let url = this.endpoint("v1/models");
            let response = this.client.get(&url).send().await.map_err(DetectError::Http)?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(DetectError::Api(status, body));
            }

            this.warmed.store(true, Ordering::Release);
            tracing::info!(url = %url, "expression models ready");
            Ok(())
        }
        .boxed()
    }

    fn detect(&self, frame: CameraFrame) -> BoxFuture<'_, Result<Vec<Face>, DetectError>> {
        let this = self.clone();
        async move {
            if !this.warmed.load(Ordering::Acquire) {
                return Err(DetectError::ModelsNotLoaded);
            }

            let response = this
                .client
                .post(this.endpoint("v1/detect"))
                .header("Content-Type", "application/octet-stream")
                .header("X-Frame-Width", frame.width)
                .header("X-Frame-Height", frame.height)
                .body(frame.rgb)
                .send()
                .await
                .map_err(DetectError::Http)?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(DetectError::Api(status, body));
            }

            let parsed: DetectResponse = response
                .json()
                .await
                .map_err(|e| DetectError::InvalidResponse(e.to_string()))?;

            Ok(faces_from_response(parsed))
        }
        .boxed()
    }
}
