use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CameraId, FrameMetadata};

/// One decoded frame with its metadata record, owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePayload {
    pub metadata: FrameMetadata,
    pub image: Vec<u8>,
}

/// A snapshot of one frame from every enabled camera, produced by one full
/// cycle of the capture barrier.
#[derive(Debug, Clone)]
pub struct MultiFramePayload {
    pub multi_frame_number: u64,
    pub frames: BTreeMap<CameraId, FramePayload>,
    /// Diagnostic markers recording where this payload has been, as
    /// `(label, monotonic_ns)` pairs.
    pub lifespan_timestamps_ns: Vec<(String, u64)>,
}

impl MultiFramePayload {
    pub fn new(multi_frame_number: u64) -> Self {
        Self {
            multi_frame_number,
            frames: BTreeMap::new(),
            lifespan_timestamps_ns: Vec::new(),
        }
    }

    pub fn add_lifespan_marker(&mut self, label: &str, timestamp_ns: u64) {
        self.lifespan_timestamps_ns
            .push((label.to_string(), timestamp_ns));
    }

    pub fn camera_ids(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.frames.keys().copied()
    }

    /// Largest spread between per-camera `post_grab_ns` stamps; the
    /// observable synchronization skew of this payload.
    pub fn grab_skew_ns(&self) -> Option<u64> {
        let max = self
            .frames
            .values()
            .map(|f| f.metadata.post_grab_ns)
            .max()?;
        let min = self
            .frames
            .values()
            .map(|f| f.metadata.post_grab_ns)
            .min()?;
        Some(max - min)
    }
}

/// Downsampled JPEG snapshot of one multi-frame, published on the preview
/// channel for the GUI. Drop-tolerant; images are base64-encoded JPEG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewPayload {
    pub multi_frame_number: u64,
    pub lifespan_timestamps_ns: Vec<(String, u64)>,
    pub jpeg_images: BTreeMap<CameraId, String>,
    pub sizes: BTreeMap<CameraId, [u32; 2]>,
}
