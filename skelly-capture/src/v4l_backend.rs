//! Linux UVC capture via Video4Linux2.
//!
//! `grab` dequeues the next raw buffer from the mmap stream without decoding;
//! `retrieve` decodes it (MJPG via the jpeg decoder, YUYV via a direct
//! conversion) into packed BGR8.

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use skelly_types::{CameraConfig, CameraId};

use crate::device::CameraDevice;
use crate::{Error, Result};

// V4L2 control ids (videodev2.h).
const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a0901;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a0902;
const V4L2_EXPOSURE_MANUAL: i64 = 1;

const BUFFER_COUNT: u32 = 4;

enum RawFormat {
    Mjpg,
    Yuyv,
}

pub struct V4lCamera {
    camera_id: CameraId,
    // Dropped before `device`; declared first so the borrow it erases stays
    // valid for its whole life.
    stream: Option<v4l::io::mmap::Stream<'static>>,
    device: Box<Device>,
    raw_format: RawFormat,
    raw: Vec<u8>,
    grabbed: bool,
    width: u32,
    height: u32,
}

impl V4lCamera {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let camera_id = config.camera_id;
        let open_err = |message: String| Error::DeviceOpen { camera_id, message };

        let device = Box::new(
            Device::new(camera_id.index())
                .map_err(|e| open_err(format!("open /dev/video{camera_id}: {e}")))?,
        );

        let raw_format = match config.capture_fourcc.as_str() {
            "MJPG" => RawFormat::Mjpg,
            "YUYV" => RawFormat::Yuyv,
            other => {
                return Err(open_err(format!("unsupported capture fourcc '{other}'")));
            }
        };
        let fourcc = FourCC::new(
            config
                .capture_fourcc
                .as_bytes()
                .try_into()
                .map_err(|_| open_err("capture fourcc must be 4 bytes".to_string()))?,
        );

        let mut format = device
            .format()
            .map_err(|e| open_err(format!("query format: {e}")))?;
        format.width = config.resolution.width;
        format.height = config.resolution.height;
        format.fourcc = fourcc;
        let actual = device
            .set_format(&format)
            .map_err(|e| open_err(format!("set format: {e}")))?;
        if actual.width != config.resolution.width || actual.height != config.resolution.height {
            return Err(open_err(format!(
                "driver negotiated {}x{}, requested {}",
                actual.width, actual.height, config.resolution
            )));
        }

        let mut camera = Self {
            camera_id,
            stream: None,
            device,
            raw_format,
            raw: Vec::new(),
            grabbed: false,
            width: config.resolution.width,
            height: config.resolution.height,
        };
        camera.apply_settings(config)?;

        let stream =
            v4l::io::mmap::Stream::with_buffers(&camera.device, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|e| open_err(format!("start stream: {e}")))?;
        // SAFETY: the stream borrows `device`, which is boxed and lives in
        // the same struct; `stream` is declared before `device` and set to
        // `None` in close(), so it never outlives the borrow.
        let stream: v4l::io::mmap::Stream<'static> = unsafe { std::mem::transmute(stream) };
        camera.stream = Some(stream);
        debug!("opened v4l camera {camera_id} at {}", config.resolution);
        Ok(camera)
    }
}

impl CameraDevice for V4lCamera {
    fn grab(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::DeviceOpen {
            camera_id: self.camera_id,
            message: "stream not running".to_string(),
        })?;
        let (buf, _meta) = stream.next().map_err(|e| Error::DeviceOpen {
            camera_id: self.camera_id,
            message: format!("dequeue buffer: {e}"),
        })?;
        self.raw.clear();
        self.raw.extend_from_slice(buf);
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
        match self.raw_format {
            RawFormat::Mjpg => decode_mjpg(self.camera_id, &self.raw, self.width, self.height, dest),
            RawFormat::Yuyv => yuyv_to_bgr(self.camera_id, &self.raw, self.width, self.height, dest),
        }
    }

    fn apply_settings(&mut self, config: &CameraConfig) -> Result<()> {
        // Exposure follows the OpenCV convention on Linux: negative values
        // are log2 seconds, converted to the 100µs units UVC drivers expect.
        let exposure_100us = (2f64.powi(config.exposure) * 10_000.0).max(1.0) as i64;
        let controls = [
            Control {
                id: V4L2_CID_EXPOSURE_AUTO,
                value: Value::Integer(V4L2_EXPOSURE_MANUAL),
            },
            Control {
                id: V4L2_CID_EXPOSURE_ABSOLUTE,
                value: Value::Integer(exposure_100us),
            },
        ];
        for control in controls {
            if let Err(e) = self.device.set_control(control) {
                // Plenty of UVC devices reject manual exposure; capture
                // still works, so don't fail the group for it.
                warn!("camera {}: exposure control rejected: {e}", self.camera_id);
            }
        }

        let fps = config.framerate.round().max(1.0) as u32;
        if let Err(e) = self
            .device
            .set_params(&v4l::video::capture::Parameters::with_fps(fps))
        {
            warn!("camera {}: framerate {fps} rejected: {e}", self.camera_id);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

fn decode_mjpg(
    camera_id: CameraId,
    raw: &[u8],
    width: u32,
    height: u32,
    dest: &mut [u8],
) -> Result<()> {
    let retrieve_err = |message: String| Error::FrameRetrieve { camera_id, message };
    let decoded = image::load_from_memory_with_format(raw, image::ImageFormat::Jpeg)
        .map_err(|e| retrieve_err(format!("jpeg decode: {e}")))?;
    let rgb = decoded.to_rgb8();
    if rgb.width() != width || rgb.height() != height {
        return Err(retrieve_err(format!(
            "decoded {}x{}, expected {width}x{height}",
            rgb.width(),
            rgb.height()
        )));
    }
    for (src, dst) in rgb.as_raw().chunks_exact(3).zip(dest.chunks_exact_mut(3)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }
    Ok(())
}

fn yuyv_to_bgr(
    camera_id: CameraId,
    raw: &[u8],
    width: u32,
    height: u32,
    dest: &mut [u8],
) -> Result<()> {
    let expected = width as usize * height as usize * 2;
    if raw.len() < expected {
        return Err(Error::FrameRetrieve {
            camera_id,
            message: format!("yuyv buffer of {} bytes, expected {expected}", raw.len()),
        });
    }
    for (src, dst) in raw[..expected]
        .chunks_exact(4)
        .zip(dest.chunks_exact_mut(6))
    {
        let (y0, u, y1, v) = (src[0], src[1], src[2], src[3]);
        write_bgr(y0, u, v, &mut dst[0..3]);
        write_bgr(y1, u, v, &mut dst[3..6]);
    }
    Ok(())
}

fn write_bgr(y: u8, u: u8, v: u8, dst: &mut [u8]) {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;
    dst[0] = b.clamp(0.0, 255.0) as u8;
    dst[1] = g.clamp(0.0, 255.0) as u8;
    dst[2] = r.clamp(0.0, 255.0) as u8;
}
