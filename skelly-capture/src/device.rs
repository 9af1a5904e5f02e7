use serde::{Deserialize, Serialize};

use skelly_types::CameraConfig;

use crate::synth::{SynthCamera, SynthOptions};
use crate::Result;

/// A camera device driven by the two-phase capture protocol.
///
/// `grab` acquires the next raw frame buffer without decoding; `retrieve`
/// decodes the last grabbed frame into packed BGR8 bytes. The split exists so
/// the orchestrator can issue `grab` on every camera simultaneously while the
/// slow, variable decode happens afterwards.
pub trait CameraDevice: Send {
    fn grab(&mut self) -> Result<()>;

    /// Decode the last grabbed frame into `dest` (`h*w*3` bytes, BGR8).
    fn retrieve(&mut self, dest: &mut [u8]) -> Result<()>;

    /// Apply the settings a running device can change between frames
    /// (exposure, framerate). Shape-affecting fields are ignored here; those
    /// require a group reset.
    fn apply_settings(&mut self, config: &CameraConfig) -> Result<()>;

    fn close(&mut self);
}

/// Which backend a camera group opens its devices with. Part of the group
/// DTO so child processes open the same way the controller planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceBackendConfig {
    /// Deterministic test-pattern cameras; no hardware required.
    Synthetic(SynthOptions),
    /// Linux UVC cameras via Video4Linux2.
    #[cfg(all(target_os = "linux", feature = "backend_v4l"))]
    V4l,
}

impl Default for DeviceBackendConfig {
    fn default() -> Self {
        DeviceBackendConfig::Synthetic(SynthOptions::default())
    }
}

/// Open one device at the requested configuration.
pub fn open_device(
    config: &CameraConfig,
    backend: &DeviceBackendConfig,
) -> Result<Box<dyn CameraDevice>> {
    match backend {
        DeviceBackendConfig::Synthetic(options) => {
            if options.fail_open_camera == Some(config.camera_id.0) {
                return Err(crate::Error::DeviceOpen {
                    camera_id: config.camera_id,
                    message: "synthetic open failure".to_string(),
                });
            }
            Ok(Box::new(SynthCamera::open(config, options.clone())))
        }
        #[cfg(all(target_os = "linux", feature = "backend_v4l"))]
        DeviceBackendConfig::V4l => Ok(Box::new(crate::v4l_backend::V4lCamera::open(config)?)),
    }
}
