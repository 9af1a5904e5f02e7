use tracing::info;

use skelly_types::{AvailableDevices, CameraDeviceInfo, CameraId};

/// Enumerate locally-attached cameras.
///
/// With the `backend_v4l` feature on Linux this scans the V4L2 device list
/// for capture-capable nodes. When nothing is found (or no hardware backend
/// is compiled in) and `synthetic_fallback` is set, two synthetic cameras
/// are reported so the rest of the stack can run without hardware.
pub fn detect_available_devices(synthetic_fallback: bool) -> AvailableDevices {
    let mut devices = AvailableDevices::new();

    #[cfg(all(target_os = "linux", feature = "backend_v4l"))]
    {
        for node in v4l::context::enum_devices() {
            let index = node.index();
            if index > u8::MAX as usize {
                continue;
            }
            let capture_capable = v4l::Device::with_path(node.path())
                .and_then(|d| d.query_caps())
                .map(|caps| {
                    caps.capabilities
                        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                })
                .unwrap_or(false);
            if !capture_capable {
                continue;
            }
            let camera_id = CameraId(index as u8);
            devices.insert(
                camera_id,
                CameraDeviceInfo {
                    camera_id,
                    name: node.name().unwrap_or_else(|| format!("camera {index}")),
                    device_path: Some(node.path().display().to_string()),
                },
            );
        }
    }

    if devices.is_empty() && synthetic_fallback {
        for index in 0u8..2 {
            let camera_id = CameraId(index);
            devices.insert(
                camera_id,
                CameraDeviceInfo {
                    camera_id,
                    name: format!("synthetic camera {index}"),
                    device_path: None,
                },
            );
        }
    }

    info!("detected {} camera device(s)", devices.len());
    devices
}
