use crate::camera::{CameraDevice, CameraError, CameraFrame, CameraStream};
use crate::config::CameraConfig;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use opencv::core::Mat;
use opencv::imgproc::{cvt_color_def, COLOR_BGR2RGB};
use opencv::prelude::*;
use opencv::videoio::{VideoCapture, CAP_ANY, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH};

/// USB webcam backend. Exclusive use of the device is held between `open`
/// and `close`.
#[derive(Clone, Debug)]
pub struct OpenCvCameraDevice {
    config: CameraConfig,
}

impl OpenCvCameraDevice {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

impl CameraDevice for OpenCvCameraDevice {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>, CameraError>> {
        let config = self.config;
        async move {
            let mut capture = VideoCapture::new(config.index as i32, CAP_ANY).map_err(|e| {
                CameraError::DeviceUnavailable {
                    details: format!("failed to open camera {}: {e}", config.index),
                }
            })?;

            let opened = capture
                .is_opened()
                .map_err(|e| CameraError::DeviceUnavailable {
                    details: format!("camera {} state query failed: {e}", config.index),
                })?;
            if !opened {
                return Err(CameraError::DeviceUnavailable {
                    details: format!("camera {} did not open", config.index),
                });
            }

            capture
                .set(CAP_PROP_FRAME_WIDTH, f64::from(config.width))
                .map_err(|e| CameraError::DeviceUnavailable {
                    details: format!("failed to set frame width: {e}"),
                })?;
            capture
                .set(CAP_PROP_FRAME_HEIGHT, f64::from(config.height))
                .map_err(|e| CameraError::DeviceUnavailable {
                    details: format!("failed to set frame height: {e}"),
                })?;

            tracing::info!(
                index = config.index,
                width = config.width,
                height = config.height,
                "camera opened"
            );

            let stream = OpenCvCameraStream {
                capture: Some(capture),
            };
            Ok(Box::new(stream) as Box<dyn CameraStream>)
        }
        .boxed()
    }
}

struct OpenCvCameraStream {
    capture: Option<VideoCapture>,
}

impl CameraStream for OpenCvCameraStream {
    fn grab_frame(&mut self) -> BoxFuture<'_, Result<CameraFrame, CameraError>> {
        async move {
            let capture = self.capture.as_mut().ok_or(CameraError::NotOpen)?;

            let mut bgr = Mat::default();
            let got = capture
                .read(&mut bgr)
                .map_err(|e| CameraError::Frame(format!("read failed: {e}")))?;
            if !got || bgr.empty() {
                return Err(CameraError::Frame("camera returned an empty frame".to_owned()));
            }

            let mut rgb = Mat::default();
            cvt_color_def(&bgr, &mut rgb, COLOR_BGR2RGB, 0)
                .map_err(|e| CameraError::Frame(format!("colour conversion failed: {e}")))?;

            let width = rgb.cols() as u32;
            let height = rgb.rows() as u32;
            let data = rgb
                .data_bytes()
                .map_err(|e| CameraError::Frame(format!("frame buffer access failed: {e}")))?
                .to_vec();

            Ok(CameraFrame {
                width,
                height,
                rgb: Bytes::from(data),
            })
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), CameraError>> {
        async move {
            if let Some(mut capture) = self.capture.take() {
                if let Err(e) = capture.release() {
                    tracing::warn!(error = %e, "camera release reported an error");
                }
                tracing::info!("camera released");
            }
            Ok(())
        }
        .boxed()
    }
}
