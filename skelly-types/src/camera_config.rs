use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::CameraId;

/// Image rotation applied between decode and the shared-memory copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Rotate180,
    CounterClockwise90,
}

impl Rotation {
    /// Quarter turns swap width and height.
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Clockwise90 | Rotation::CounterClockwise90)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}x{}", self.width, self.height)
    }
}

/// Per-camera capture parameters.
///
/// `image_shape()` is fixed for the lifetime of a camera group; any change to
/// it (or to the camera set) requires tearing the group down, which is what
/// [`crate::UpdateInstructions`] computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_id: CameraId,
    pub use_this_camera: bool,
    pub resolution: Resolution,
    pub color_channels: u32,
    pub exposure: i32,
    pub framerate: f64,
    pub rotation: Rotation,
    pub capture_fourcc: String,
    pub writer_fourcc: String,
}

impl CameraConfig {
    pub fn new(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            use_this_camera: true,
            resolution: Resolution::new(1280, 720),
            color_channels: 3,
            exposure: -7,
            framerate: 30.0,
            rotation: Rotation::None,
            capture_fourcc: "MJPG".to_string(),
            writer_fourcc: "mp4v".to_string(),
        }
    }

    /// `(height, width, channels)` of the image buffer as captured.
    pub fn image_shape(&self) -> (u32, u32, u32) {
        (
            self.resolution.height,
            self.resolution.width,
            self.color_channels,
        )
    }

    /// Resolution after rotation is applied; this is what consumers of the
    /// shared-memory image see.
    pub fn effective_resolution(&self) -> Resolution {
        if self.rotation.swaps_axes() {
            Resolution::new(self.resolution.height, self.resolution.width)
        } else {
            self.resolution
        }
    }

    pub fn image_size_bytes(&self) -> usize {
        let (h, w, c) = self.image_shape();
        h as usize * w as usize * c as usize
    }
}

/// Mapping of camera id to configuration.
///
/// A `BTreeMap` keyed on [`CameraId`] gives every process the same iteration
/// order; detection emits ascending device indices, so this is also insertion
/// order.
pub type CameraConfigs = BTreeMap<CameraId, CameraConfig>;
