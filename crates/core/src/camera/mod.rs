mod synthetic;

#[cfg(feature = "opencv-camera")]
mod opencv;

use bytes::Bytes;
use futures::future::BoxFuture;

pub use self::synthetic::SyntheticCameraDevice;

#[cfg(feature = "opencv-camera")]
pub use self::opencv::OpenCvCameraDevice;

/// One interleaved RGB frame as read from the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Bytes,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("camera device unavailable: {details}")]
    DeviceUnavailable { details: String },

    #[error("camera is not open")]
    NotOpen,

    #[error("frame capture failed: {0}")]
    Frame(String),
}

/// An open, exclusive handle onto a capture device.
///
/// `close` must be idempotent; a closed stream answers `grab_frame` with
/// [`CameraError::NotOpen`]. Dropping the stream releases the underlying
/// device as well, so no exit path can leak the hardware handle.
pub trait CameraStream: Send {
    fn grab_frame(&mut self) -> BoxFuture<'_, Result<CameraFrame, CameraError>>;

    fn close(&mut self) -> BoxFuture<'_, Result<(), CameraError>>;
}

/// A capture device that can be opened. Each `open` yields a fresh stream
/// handle; handles are never reused across open/close cycles.
pub trait CameraDevice: Send + Sync {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>, CameraError>>;
}

impl<T: CameraDevice + ?Sized> CameraDevice for Box<T> {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>, CameraError>> {
        (**self).open()
    }
}
