use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, trace};

use skelly_orchestrator::{wait, CameraGroupOrchestrator};
use skelly_shmem::{clock, CameraSharedMemory};
use skelly_types::{CameraConfig, CameraId, FrameMetadata};

use crate::device::CameraDevice;
use crate::rotation::rotate_bgr;
use crate::{Error, Result};

/// Warm-up attempts before device open is declared failed.
const MAX_WARMUP_ATTEMPTS: u32 = 60;

/// Run one camera through the worker half of the barrier protocol.
///
/// Returns the number of frames published. A kill-flag unwind is a clean
/// return; a retrieve failure raises the kill flag itself and comes back as
/// an error.
pub fn camera_frame_loop(
    mut config: CameraConfig,
    mut device: Box<dyn CameraDevice>,
    mut shm: CameraSharedMemory,
    orchestrator: Arc<CameraGroupOrchestrator>,
    config_update_rx: Receiver<CameraConfig>,
) -> Result<u64> {
    let camera_id = config.camera_id;
    let mut frames_published = 0u64;
    let result = frame_loop_inner(
        &mut config,
        &mut *device,
        &mut shm,
        &orchestrator,
        &config_update_rx,
        &mut frames_published,
    );
    device.close();
    match result {
        Err(e) if e.is_killed() => {
            info!("camera {camera_id} worker exiting after {frames_published} frame(s)");
            Ok(frames_published)
        }
        Err(e) => {
            error!("camera {camera_id} worker failed: {e}");
            orchestrator.set_kill();
            Err(e)
        }
        // The loop only ends through an error path.
        Ok(()) => Ok(frames_published),
    }
}

fn frame_loop_inner(
    config: &mut CameraConfig,
    device: &mut dyn CameraDevice,
    shm: &mut CameraSharedMemory,
    orchestrator: &CameraGroupOrchestrator,
    config_update_rx: &Receiver<CameraConfig>,
    frames_published: &mut u64,
) -> Result<()> {
    let camera_id = config.camera_id;
    let image_size = config.image_size_bytes();
    let mut decode_buf = vec![0u8; image_size];
    let mut rotate_buf = vec![0u8; image_size];

    warm_up(camera_id, device, &mut decode_buf)?;
    orchestrator.set_camera_ready(camera_id)?;
    orchestrator.await_and_clear_initial_trigger(camera_id)?;
    debug!("camera {camera_id} entering frame loop");

    loop {
        let frame_number = *frames_published;
        // In-place config updates land between frames.
        while let Ok(new_config) = config_update_rx.try_recv() {
            debug!("camera {camera_id} applying config update");
            device.apply_settings(&new_config)?;
            *config = new_config;
        }

        orchestrator.await_should_grab(camera_id)?;
        let mut metadata = FrameMetadata::new(camera_id, frame_number);

        metadata.pre_grab_ns = clock::monotonic_ns();
        loop {
            match device.grab() {
                Ok(()) => break,
                Err(e) => {
                    // Absorbed: retry in place until it works or the group
                    // dies. The driver stalls with us.
                    error!("camera {camera_id} failed to grab a frame: {e}");
                    if orchestrator.is_killed() {
                        return Err(skelly_orchestrator::Error::Killed.into());
                    }
                    wait::wait_fast();
                }
            }
        }
        metadata.post_grab_ns = clock::monotonic_ns();
        orchestrator.set_frame_grabbed(camera_id)?;

        orchestrator.await_should_retrieve(camera_id)?;
        metadata.pre_retrieve_ns = clock::monotonic_ns();
        device.retrieve(&mut decode_buf)?;
        metadata.post_retrieve_ns = clock::monotonic_ns();

        let (_, _, channels) = config.image_shape();
        let image: &[u8] = if matches!(config.rotation, skelly_types::Rotation::None) {
            &decode_buf
        } else {
            rotate_bgr(
                &decode_buf,
                &mut rotate_buf,
                config.resolution.width as usize,
                config.resolution.height as usize,
                channels as usize,
                config.rotation,
            );
            &rotate_buf
        };

        shm.put_new_frame(image, &mut metadata)?;
        orchestrator.set_new_frame_available(camera_id)?;
        *frames_published += 1;
        trace!("camera {camera_id} published frame {frame_number}");
    }
}

/// Issue discarded reads until the driver settles: warm-up ends at the first
/// grab+retrieve pair that succeeds with ordered timestamps. Warm-up frames
/// never reach shared memory, so they cannot appear in a sidecar.
fn warm_up(camera_id: CameraId, device: &mut dyn CameraDevice, buf: &mut [u8]) -> Result<()> {
    for attempt in 1..=MAX_WARMUP_ATTEMPTS {
        let pre = clock::monotonic_ns();
        if device.grab().is_err() {
            wait::wait_slow();
            continue;
        }
        if device.retrieve(buf).is_err() {
            wait::wait_slow();
            continue;
        }
        let post = clock::monotonic_ns();
        if post >= pre {
            debug!("camera {camera_id} warmed up after {attempt} read(s)");
            return Ok(());
        }
    }
    Err(Error::DeviceOpen {
        camera_id,
        message: format!("no valid frame after {MAX_WARMUP_ATTEMPTS} warm-up reads"),
    })
}
