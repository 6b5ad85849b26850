//! Generic `Camera` trait and supporting types for depth-capable cameras.
//!
//! Only point clouds are produced by the adapters in this crate.  Image
//! streams and pixel projection are part of the trait so a host can ask for
//! them, but fail with [`BridgeError::Unimplemented`] unless a driver
//! overrides them.

use rosmod_types::{BridgeError, Point3, PointCloud};
use serde::Serialize;

use crate::resource::Resource;

/// A raw image frame returned by a camera stream.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw pixel data (e.g. RGB24 or greyscale).
    pub data: Vec<u8>,
}

/// What a camera can produce.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Properties {
    /// `true` when [`Camera::next_point_cloud`] is supported.
    pub supports_pcd: bool,
    /// Expected frame rate, if the driver knows it.
    pub frame_rate_hz: Option<f32>,
}

/// Maps points in the camera frame onto image pixels.
pub trait Projector: Send + Sync {
    /// Pixel coordinates of `point`, or `None` when it is outside the image.
    fn pixel(&self, point: Point3) -> Option<(f32, f32)>;
}

/// A pull-based sequence of image frames.
pub trait FrameStream: Send {
    /// # Errors
    ///
    /// Returns an error when the next frame cannot be produced.
    fn next_frame(&mut self) -> Result<CameraFrame, BridgeError>;

    fn close(&mut self) -> Result<(), BridgeError>;
}

/// A camera or depth sensor.
pub trait Camera: Resource {
    /// Build a point cloud from the latest data.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotReady`] before the first frame and
    /// [`BridgeError::Closed`] after close.
    fn next_point_cloud(&self) -> Result<PointCloud, BridgeError>;

    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] after close.
    fn properties(&self) -> Result<Properties, BridgeError>;

    /// # Errors
    ///
    /// Returns [`BridgeError::Unimplemented`] unless overridden.
    fn projector(&self) -> Result<Box<dyn Projector>, BridgeError> {
        Err(BridgeError::Unimplemented("projector".into()))
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::Unimplemented`] unless overridden.
    fn stream(&self) -> Result<Box<dyn FrameStream>, BridgeError> {
        Err(BridgeError::Unimplemented("stream".into()))
    }
}
