use serde::{Deserialize, Serialize};

use crate::{AvailableDevices, CameraConfigs, CameraId};

/// Snapshot of the controller state, published on every state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStateDTO {
    /// ISO-8601 wall-clock stamp of when this snapshot was taken.
    pub state_timestamp: String,
    pub camera_configs: Option<CameraConfigs>,
    pub available_devices: Option<AvailableDevices>,
    pub current_framerate: Option<CurrentFrameRate>,
    pub record_frames_flag_status: bool,
}

/// Where a finished (or started) recording landed on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub recording_name: String,
    pub recording_folder: String,
    pub camera_ids: Vec<CameraId>,
}

/// Rolling framerate over the last `window_size` multi-frame intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentFrameRate {
    pub mean_fps: f64,
    pub median_fps: f64,
    pub window_size: usize,
    /// Unix seconds when this measurement was published.
    pub timestamp: f64,
}

/// Tagged event carried on the IPC event channel. Consumers dispatch on the
/// `type` tag; unknown tags are logged and dropped, never inferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcEvent {
    AppStateDTO(AppStateDTO),
    RecordingInfo(RecordingInfo),
    CurrentFrameRate(CurrentFrameRate),
    /// A session-terminating failure observed by a capture or recording role.
    SessionError { message: String },
}
