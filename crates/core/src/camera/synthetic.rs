use crate::camera::{CameraDevice, CameraError, CameraFrame, CameraStream};
use crate::config::CameraConfig;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;

/// An in-process device producing gradient frames with a little sensor
/// noise. Stands in for real hardware in tests and in builds without the
/// opencv backend.
#[derive(Clone, Debug)]
pub struct SyntheticCameraDevice {
    config: CameraConfig,
}

impl SyntheticCameraDevice {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

impl CameraDevice for SyntheticCameraDevice {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>, CameraError>> {
        let config = self.config;
        async move {
            let stream = SyntheticCameraStream {
                config,
                frame_counter: 0,
                closed: false,
            };
            Ok(Box::new(stream) as Box<dyn CameraStream>)
        }
        .boxed()
    }
}

struct SyntheticCameraStream {
    config: CameraConfig,
    frame_counter: u64,
    closed: bool,
}

impl CameraStream for SyntheticCameraStream {
    fn grab_frame(&mut self) -> BoxFuture<'_, Result<CameraFrame, CameraError>> {
        async move {
            if self.closed {
                return Err(CameraError::NotOpen);
            }
            self.frame_counter += 1;

            let width = self.config.width;
            let height = self.config.height;
            let phase = (self.frame_counter % 256) as u8;
            let mut rng = rand::rng();
            let mut rgb = Vec::with_capacity((width * height * 3) as usize);
            for y in 0..height {
                for x in 0..width {
                    let r = ((x * 255) / width.max(1)) as u8;
                    let g = ((y * 255) / height.max(1)) as u8;
                    let noise: u8 = rng.random_range(0..8);
                    rgb.push(r.saturating_add(noise));
                    rgb.push(g.saturating_add(noise));
                    rgb.push(phase.saturating_add(noise));
                }
            }

            Ok(CameraFrame {
                width,
                height,
                rgb: Bytes::from(rgb),
            })
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), CameraError>> {
        async move {
            self.closed = true;
            Ok(())
        }
        .boxed()
    }
}
