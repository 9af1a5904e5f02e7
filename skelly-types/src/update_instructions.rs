use serde::{Deserialize, Serialize};

use crate::{CameraConfig, CameraConfigs, CameraId};

/// Plan for moving a running camera group from one configuration to another.
///
/// A change to the camera set, an image shape (`resolution`,
/// `color_channels`), `use_this_camera` or the capture codec cannot be
/// applied to live devices: shared-memory slots are sized from the image
/// shape and fixed for the group's lifetime. Everything else is routed to
/// the capture workers between frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateInstructions {
    /// Tear the group down and re-create it with the new configs.
    ResetAll { new_configs: CameraConfigs },
    /// Apply without interrupting the frame loop.
    InPlace {
        new_configs: CameraConfigs,
        changed_cameras: Vec<CameraId>,
    },
}

impl UpdateInstructions {
    /// Compare old and new configs; `None` when nothing changed.
    pub fn from_configs(old: &CameraConfigs, new: &CameraConfigs) -> Option<Self> {
        if old == new {
            return None;
        }
        let same_camera_set =
            old.len() == new.len() && old.keys().all(|id| new.contains_key(id));
        if !same_camera_set {
            return Some(UpdateInstructions::ResetAll {
                new_configs: new.clone(),
            });
        }
        let mut changed_cameras = Vec::new();
        for (camera_id, new_config) in new {
            let old_config = &old[camera_id];
            if requires_reset(old_config, new_config) {
                return Some(UpdateInstructions::ResetAll {
                    new_configs: new.clone(),
                });
            }
            if old_config != new_config {
                changed_cameras.push(*camera_id);
            }
        }
        Some(UpdateInstructions::InPlace {
            new_configs: new.clone(),
            changed_cameras,
        })
    }

    pub fn requires_reset(&self) -> bool {
        matches!(self, UpdateInstructions::ResetAll { .. })
    }

    pub fn new_configs(&self) -> &CameraConfigs {
        match self {
            UpdateInstructions::ResetAll { new_configs } => new_configs,
            UpdateInstructions::InPlace { new_configs, .. } => new_configs,
        }
    }
}

fn requires_reset(old: &CameraConfig, new: &CameraConfig) -> bool {
    old.resolution != new.resolution
        || old.color_channels != new.color_channels
        || old.use_this_camera != new.use_this_camera
        || old.capture_fourcc != new.capture_fourcc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resolution;

    fn two_camera_configs() -> CameraConfigs {
        [CameraId(0), CameraId(1)]
            .into_iter()
            .map(|id| (id, CameraConfig::new(id)))
            .collect()
    }

    #[test]
    fn identical_configs_yield_no_plan() {
        let configs = two_camera_configs();
        assert_eq!(UpdateInstructions::from_configs(&configs, &configs), None);
    }

    #[test]
    fn exposure_change_is_in_place() {
        let old = two_camera_configs();
        let mut new = old.clone();
        new.get_mut(&CameraId(0)).unwrap().exposure = -4;
        match UpdateInstructions::from_configs(&old, &new).unwrap() {
            UpdateInstructions::InPlace {
                changed_cameras, ..
            } => assert_eq!(changed_cameras, vec![CameraId(0)]),
            other => panic!("expected in-place plan, got {other:?}"),
        }
    }

    #[test]
    fn resolution_change_requires_reset() {
        let old = two_camera_configs();
        let mut new = old.clone();
        new.get_mut(&CameraId(1)).unwrap().resolution = Resolution::new(1280, 720);
        assert!(UpdateInstructions::from_configs(&old, &new)
            .unwrap()
            .requires_reset());
    }

    #[test]
    fn camera_set_change_requires_reset() {
        let old = two_camera_configs();
        let mut new = old.clone();
        new.remove(&CameraId(1));
        assert!(UpdateInstructions::from_configs(&old, &new)
            .unwrap()
            .requires_reset());
    }

    #[test]
    fn capture_fourcc_change_requires_reset() {
        let old = two_camera_configs();
        let mut new = old.clone();
        new.get_mut(&CameraId(0)).unwrap().capture_fourcc = "YUYV".to_string();
        assert!(UpdateInstructions::from_configs(&old, &new)
            .unwrap()
            .requires_reset());
    }

    #[test]
    fn rotation_and_writer_fourcc_are_in_place() {
        let old = two_camera_configs();
        let mut new = old.clone();
        new.get_mut(&CameraId(0)).unwrap().rotation = crate::Rotation::Rotate180;
        new.get_mut(&CameraId(1)).unwrap().writer_fourcc = "avc1".to_string();
        match UpdateInstructions::from_configs(&old, &new).unwrap() {
            UpdateInstructions::InPlace {
                changed_cameras, ..
            } => assert_eq!(changed_cameras, vec![CameraId(0), CameraId(1)]),
            other => panic!("expected in-place plan, got {other:?}"),
        }
    }
}
