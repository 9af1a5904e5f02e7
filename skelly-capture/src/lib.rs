//! Capture workers and the camera-group driver.
//!
//! One worker per camera owns the device handle and runs the worker half of
//! the barrier protocol; the driver loop fires the triggers. Device access
//! goes through the [`CameraDevice`] trait so the synchronized loop is
//! backend-agnostic: a deterministic synthetic camera is always available,
//! and Linux UVC devices are behind the `backend_v4l` feature.

mod detect;
mod device;
mod error;
mod group;
mod rotation;
mod synth;
#[cfg(all(target_os = "linux", feature = "backend_v4l"))]
mod v4l_backend;
mod worker;

pub use detect::detect_available_devices;
pub use device::{open_device, CameraDevice, DeviceBackendConfig};
pub use error::{Error, Result};
pub use group::{run_camera_group, CameraGroupDTO, CameraGroupThread};
pub use rotation::rotate_bgr;
pub use synth::{SynthCamera, SynthOptions};
