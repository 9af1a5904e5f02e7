//! Shared data model for the skellycam capture engine.
//!
//! Everything here is plain data: ids, camera configurations, per-frame
//! metadata, multi-frame payloads and the tagged events carried on the IPC
//! event channel. The crates that own shared memory, devices and files all
//! speak these types.

mod camera_config;
mod camera_id;
mod device_info;
mod events;
mod frame_metadata;
mod payloads;
mod update_instructions;

pub use camera_config::{CameraConfig, CameraConfigs, Resolution, Rotation};
pub use camera_id::CameraId;
pub use device_info::{default_camera_configs, AvailableDevices, CameraDeviceInfo};
pub use events::{AppStateDTO, CurrentFrameRate, IpcEvent, RecordingInfo};
pub use frame_metadata::{FrameMetadata, FRAME_METADATA_FIELDS, FRAME_METADATA_SIZE_BYTES};
pub use payloads::{FramePayload, MultiFramePayload, PreviewPayload};
pub use update_instructions::UpdateInstructions;
