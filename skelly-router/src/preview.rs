use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use skelly_types::{CameraConfigs, MultiFramePayload, PreviewPayload};

use crate::{Error, Result};

const JPEG_QUALITY: u8 = 80;

/// How far previews are shrunk before JPEG encoding.
#[derive(Debug, Clone, Copy)]
pub struct PreviewSettings {
    /// Linear scale relative to the capture resolution.
    pub scale: f32,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self { scale: 0.25 }
    }
}

impl PreviewSettings {
    /// Derive the scale from a client-advertised long-edge hint.
    pub fn from_long_edge_hint(hint_px: u32, configs: &CameraConfigs) -> Self {
        let long_edge = configs
            .values()
            .map(|c| {
                let r = c.effective_resolution();
                r.width.max(r.height)
            })
            .max()
            .unwrap_or(1)
            .max(1);
        Self {
            scale: (hint_px as f32 / long_edge as f32).clamp(1.0 / 16.0, 1.0),
        }
    }

    fn clamped_scale(&self) -> f32 {
        self.scale.clamp(1.0 / 16.0, 1.0)
    }
}

/// Downsample and JPEG-encode every frame of a payload for the GUI stream.
pub fn encode_preview(
    payload: &MultiFramePayload,
    configs: &CameraConfigs,
    settings: &PreviewSettings,
) -> Result<PreviewPayload> {
    let scale = settings.clamped_scale();
    let mut preview = PreviewPayload {
        multi_frame_number: payload.multi_frame_number,
        lifespan_timestamps_ns: payload.lifespan_timestamps_ns.clone(),
        jpeg_images: Default::default(),
        sizes: Default::default(),
    };
    for (camera_id, frame) in &payload.frames {
        let config = configs
            .get(camera_id)
            .ok_or_else(|| Error::PreviewEncode(format!("no config for camera {camera_id}")))?;
        let resolution = config.effective_resolution();
        let rgb = bgr_to_rgb_image(&frame.image, resolution.width, resolution.height)?;
        let out_w = ((resolution.width as f32 * scale) as u32).max(1);
        let out_h = ((resolution.height as f32 * scale) as u32).max(1);
        let small =
            image::imageops::resize(&rgb, out_w, out_h, image::imageops::FilterType::Triangle);

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&small)
            .map_err(|e| Error::PreviewEncode(e.to_string()))?;
        preview.jpeg_images.insert(
            *camera_id,
            base64::engine::general_purpose::STANDARD.encode(&jpeg),
        );
        preview.sizes.insert(*camera_id, [out_w, out_h]);
    }
    Ok(preview)
}

fn bgr_to_rgb_image(bgr: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    let expected = width as usize * height as usize * 3;
    if bgr.len() != expected {
        return Err(Error::PreviewEncode(format!(
            "image of {} bytes does not match {width}x{height}x3",
            bgr.len()
        )));
    }
    let mut rgb = vec![0u8; expected];
    for (src, dst) in bgr.chunks_exact(3).zip(rgb.chunks_exact_mut(3)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| Error::PreviewEncode("image buffer construction failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use skelly_types::{CameraConfig, CameraId, FrameMetadata, FramePayload, Resolution};

    fn setup() -> (MultiFramePayload, CameraConfigs) {
        let mut configs = CameraConfigs::new();
        let mut config = CameraConfig::new(CameraId(0));
        config.resolution = Resolution::new(64, 32);
        configs.insert(CameraId(0), config.clone());

        let mut payload = MultiFramePayload::new(7);
        payload.add_lifespan_marker("read_from_shm", 123);
        payload.frames.insert(
            CameraId(0),
            FramePayload {
                metadata: FrameMetadata::new(CameraId(0), 3),
                image: vec![90u8; config.image_size_bytes()],
            },
        );
        (payload, configs)
    }

    #[test]
    fn preview_is_downscaled_and_base64_jpeg() {
        let (payload, configs) = setup();
        let preview =
            encode_preview(&payload, &configs, &PreviewSettings::default()).unwrap();
        assert_eq!(preview.multi_frame_number, 7);
        assert_eq!(preview.sizes[&CameraId(0)], [16, 8]);
        assert_eq!(preview.lifespan_timestamps_ns.len(), 1);
        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(&preview.jpeg_images[&CameraId(0)])
            .unwrap();
        // JPEG SOI marker.
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn scale_is_clamped() {
        let (payload, configs) = setup();
        let settings = PreviewSettings { scale: 0.0 };
        let preview = encode_preview(&payload, &configs, &settings).unwrap();
        assert_eq!(preview.sizes[&CameraId(0)], [4, 2]);
    }

    #[test]
    fn long_edge_hint_maps_to_scale() {
        let (_, configs) = setup();
        let settings = PreviewSettings::from_long_edge_hint(32, &configs);
        assert!((settings.scale - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn mismatched_image_length_errors() {
        let (mut payload, configs) = setup();
        payload.frames.get_mut(&CameraId(0)).unwrap().image.pop();
        assert!(encode_preview(&payload, &configs, &PreviewSettings::default()).is_err());
    }
}
