use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CameraConfig, CameraConfigs, CameraId};

/// One locally-attached camera as reported by device enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDeviceInfo {
    pub camera_id: CameraId,
    pub name: String,
    /// OS device path where the platform has one (e.g. `/dev/video0`).
    pub device_path: Option<String>,
}

pub type AvailableDevices = BTreeMap<CameraId, CameraDeviceInfo>;

/// Default per-camera configs for every detected device.
pub fn default_camera_configs(devices: &AvailableDevices) -> CameraConfigs {
    devices
        .keys()
        .map(|camera_id| (*camera_id, CameraConfig::new(*camera_id)))
        .collect()
}
