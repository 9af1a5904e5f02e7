use std::time::Duration;

use serde::{Deserialize, Serialize};

use skelly_types::{CameraConfig, CameraId};

use crate::device::CameraDevice;
use crate::{Error, Result};

/// Behavior knobs for the synthetic backend. The failure-injection fields
/// exist so the fatal paths of the capture loop can be exercised without
/// hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SynthOptions {
    /// Sleep in `grab` to approximate the configured framerate. Off by
    /// default so tests run at full speed.
    pub pace_to_framerate: bool,
    /// Every n-th `grab` fails once (the worker retries in place).
    pub fail_grab_every: Option<u64>,
    /// `retrieve` fails fatally at this frame number.
    pub fail_retrieve_at_frame: Option<u64>,
    /// Restrict the retrieve failure to one camera; `None` hits all of them.
    pub fail_retrieve_camera: Option<u8>,
    /// Refuse to open this camera, for exercising the atomic-open policy.
    pub fail_open_camera: Option<u8>,
}

/// A deterministic test-pattern camera. The pixel pattern is a pure function
/// of `(camera_id, frame_number, pixel index)`, so readers can verify frames
/// byte-for-byte.
pub struct SynthCamera {
    camera_id: CameraId,
    image_size_bytes: usize,
    framerate: f64,
    options: SynthOptions,
    frame_number: u64,
    grab_attempts: u64,
    grabbed: bool,
}

impl SynthCamera {
    pub fn open(config: &CameraConfig, options: SynthOptions) -> Self {
        Self {
            camera_id: config.camera_id,
            image_size_bytes: config.image_size_bytes(),
            framerate: config.framerate,
            options,
            frame_number: 0,
            grab_attempts: 0,
            grabbed: false,
        }
    }

    /// The expected byte at `index` of frame `frame_number`, for tests.
    pub fn pattern_byte(camera_id: CameraId, frame_number: u64, index: usize) -> u8 {
        let mixed = (index as u64)
            .wrapping_mul(31)
            .wrapping_add(frame_number.wrapping_mul(17))
            .wrapping_add(camera_id.as_u64() * 101);
        (mixed % 251) as u8
    }
}

impl CameraDevice for SynthCamera {
    fn grab(&mut self) -> Result<()> {
        self.grab_attempts += 1;
        if let Some(every) = self.options.fail_grab_every {
            if every > 0 && self.grab_attempts % every == 0 {
                return Err(Error::DeviceOpen {
                    camera_id: self.camera_id,
                    message: "synthetic grab failure".to_string(),
                });
            }
        }
        if self.options.pace_to_framerate && self.framerate > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(1.0 / self.framerate));
        }
        self.grabbed = true;
        Ok(())
    }

    fn retrieve(&mut self, dest: &mut [u8]) -> Result<()> {
        if !self.grabbed {
            return Err(Error::FrameRetrieve {
                camera_id: self.camera_id,
                message: "retrieve without a preceding grab".to_string(),
            });
        }
        self.grabbed = false;
        let targeted = self
            .options
            .fail_retrieve_camera
            .map_or(true, |id| id == self.camera_id.0);
        if targeted && Some(self.frame_number) == self.options.fail_retrieve_at_frame {
            return Err(Error::FrameRetrieve {
                camera_id: self.camera_id,
                message: format!("injected retrieve failure at frame {}", self.frame_number),
            });
        }
        debug_assert_eq!(dest.len(), self.image_size_bytes);
        for (index, byte) in dest.iter_mut().enumerate() {
            *byte = Self::pattern_byte(self.camera_id, self.frame_number, index);
        }
        self.frame_number += 1;
        Ok(())
    }

    fn apply_settings(&mut self, config: &CameraConfig) -> Result<()> {
        self.framerate = config.framerate;
        Ok(())
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use skelly_types::Resolution;

    fn config() -> CameraConfig {
        let mut config = CameraConfig::new(CameraId(2));
        config.resolution = Resolution::new(4, 2);
        config
    }

    #[test]
    fn frames_are_deterministic_and_advance() {
        let config = config();
        let mut camera = SynthCamera::open(&config, SynthOptions::default());
        let mut first = vec![0u8; config.image_size_bytes()];
        let mut second = vec![0u8; config.image_size_bytes()];
        camera.grab().unwrap();
        camera.retrieve(&mut first).unwrap();
        camera.grab().unwrap();
        camera.retrieve(&mut second).unwrap();
        assert_ne!(first, second);
        for (index, byte) in first.iter().enumerate() {
            assert_eq!(*byte, SynthCamera::pattern_byte(CameraId(2), 0, index));
        }
    }

    #[test]
    fn retrieve_requires_grab() {
        let config = config();
        let mut camera = SynthCamera::open(&config, SynthOptions::default());
        let mut buf = vec![0u8; config.image_size_bytes()];
        assert!(camera.retrieve(&mut buf).is_err());
    }

    #[test]
    fn injected_retrieve_failure_fires_at_the_right_frame() {
        let config = config();
        let options = SynthOptions {
            fail_retrieve_at_frame: Some(1),
            ..Default::default()
        };
        let mut camera = SynthCamera::open(&config, options);
        let mut buf = vec![0u8; config.image_size_bytes()];
        camera.grab().unwrap();
        camera.retrieve(&mut buf).unwrap();
        camera.grab().unwrap();
        assert!(matches!(
            camera.retrieve(&mut buf),
            Err(Error::FrameRetrieve { .. })
        ));
    }
}
