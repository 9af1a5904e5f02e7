use serde::{Deserialize, Serialize};

/// Identifies one camera within a session.
///
/// The value is the OS device index reported by detection, so it doubles as
/// the open index for `/dev/video<N>`-style backends and as the `<id>` in
/// recording artifact names (`..._camera_<id>.mp4`). It is serialized as the
/// bare integer everywhere: JSON maps, metadata records, sidecar rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CameraId(pub u8);

impl CameraId {
    /// The device index detection assigned this camera.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Widened form stored in the fixed-width frame-metadata record, whose
    /// fields are all u64.
    pub fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl From<u8> for CameraId {
    fn from(val: u8) -> CameraId {
        CameraId(val)
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(fmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_a_bare_integer() {
        let buf = serde_json::to_string(&CameraId(7)).unwrap();
        assert_eq!(buf, "7");
        let parsed: CameraId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, CameraId(7));
    }

    #[test]
    fn widening_round_trips_through_metadata_width() {
        let camera_id = CameraId(200);
        assert_eq!(camera_id.as_u64(), 200);
        assert_eq!(CameraId(camera_id.as_u64() as u8), camera_id);
        assert_eq!(camera_id.index(), 200);
    }
}
