use serde::{Deserialize, Serialize};

use crate::CameraId;

/// Field names in declared order; this is the timestamp sidecar CSV header.
pub const FRAME_METADATA_FIELDS: [&str; 7] = [
    "camera_id",
    "frame_number",
    "pre_grab_ns",
    "post_grab_ns",
    "pre_retrieve_ns",
    "post_retrieve_ns",
    "copy_into_buffer_ns",
];

/// Wire size of one metadata record in the shared-memory slot.
pub const FRAME_METADATA_SIZE_BYTES: usize = 56;

/// Fixed-width record written alongside every frame into shared memory.
///
/// All timestamps are nanoseconds on the monotonic clock, which has a common
/// origin across every process in the session.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub camera_id: u64,
    pub frame_number: u64,
    pub pre_grab_ns: u64,
    pub post_grab_ns: u64,
    pub pre_retrieve_ns: u64,
    pub post_retrieve_ns: u64,
    pub copy_into_buffer_ns: u64,
}

impl FrameMetadata {
    pub fn new(camera_id: CameraId, frame_number: u64) -> Self {
        Self {
            camera_id: camera_id.as_u64(),
            frame_number,
            pre_grab_ns: 0,
            post_grab_ns: 0,
            pre_retrieve_ns: 0,
            post_retrieve_ns: 0,
            copy_into_buffer_ns: 0,
        }
    }

    pub fn camera_id(&self) -> CameraId {
        CameraId(self.camera_id as u8)
    }

    /// Little-endian wire encoding, field order as declared.
    pub fn to_bytes(&self) -> [u8; FRAME_METADATA_SIZE_BYTES] {
        let mut buf = [0u8; FRAME_METADATA_SIZE_BYTES];
        for (chunk, val) in buf.chunks_exact_mut(8).zip(self.field_values()) {
            chunk.copy_from_slice(&val.to_le_bytes());
        }
        buf
    }

    /// Decode from the wire layout written by [`FrameMetadata::to_bytes`].
    ///
    /// Panics if `buf` is shorter than [`FRAME_METADATA_SIZE_BYTES`]; callers
    /// hold fixed-size shared-memory views.
    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut vals = [0u64; 7];
        for (val, chunk) in vals
            .iter_mut()
            .zip(buf[..FRAME_METADATA_SIZE_BYTES].chunks_exact(8))
        {
            *val = u64::from_le_bytes(chunk.try_into().unwrap());
        }
        Self {
            camera_id: vals[0],
            frame_number: vals[1],
            pre_grab_ns: vals[2],
            post_grab_ns: vals[3],
            pre_retrieve_ns: vals[4],
            post_retrieve_ns: vals[5],
            copy_into_buffer_ns: vals[6],
        }
    }

    fn field_values(&self) -> [u64; 7] {
        [
            self.camera_id,
            self.frame_number,
            self.pre_grab_ns,
            self.post_grab_ns,
            self.pre_retrieve_ns,
            self.post_retrieve_ns,
            self.copy_into_buffer_ns,
        ]
    }

    /// The capture protocol stamps timestamps in a fixed order; a record that
    /// violates it indicates a broken clock or a protocol bug.
    pub fn timestamps_ordered(&self) -> bool {
        self.post_grab_ns >= self.pre_grab_ns
            && self.pre_retrieve_ns >= self.post_grab_ns
            && self.post_retrieve_ns >= self.pre_retrieve_ns
            && self.copy_into_buffer_ns >= self.post_retrieve_ns
    }
}
