use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, trace, warn};

use skelly_orchestrator::{CameraGroupOrchestrator, OrchestratorDTO};
use skelly_shmem::{clock, CameraGroupSharedMemory, CameraGroupSharedMemoryDTO};
use skelly_types::{CameraConfigs, IpcEvent, PreviewPayload};
use skelly_videos::{default_recording_name, VideoRecorderManager};

use crate::preview::{encode_preview, PreviewSettings};
use crate::{FramerateTracker, Result};

/// Fastest cadence for `CurrentFrameRate` events.
const FRAMERATE_PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

/// Control messages for a running router.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RouterControl {
    /// Name for the next recording session; consumed when the record flag
    /// next rises.
    SetRecordingName(Option<String>),
    /// Client-advertised preview scale.
    SetPreviewScale(f32),
}

/// Where the router publishes: state events on the IPC event channel and
/// preview payloads on a bounded, drop-tolerant channel.
pub struct RouterOutput {
    pub event_tx: Sender<IpcEvent>,
    pub preview_tx: Sender<PreviewPayload>,
}

/// Consume multi-frame payloads until the group dies.
///
/// Recording hand-off never drops a payload; if the recorder cannot keep up,
/// the slot stays occupied and the capture loop stalls (the synchronization
/// contract outranks throughput). The preview path drops freely instead.
pub fn frame_router_loop(
    camera_configs: &CameraConfigs,
    shm_dto: &CameraGroupSharedMemoryDTO,
    orchestrator_dto: &OrchestratorDTO,
    base_recording_folder: &Path,
    control_rx: Receiver<RouterControl>,
    output: RouterOutput,
) -> Result<()> {
    let orchestrator = CameraGroupOrchestrator::recreate(orchestrator_dto)?;
    let shm = CameraGroupSharedMemory::recreate(camera_configs, shm_dto, true)?;
    info!("frame router attached to {} camera(s)", shm.camera_ids().len());

    let mut recorder: Option<VideoRecorderManager> = None;
    let mut pending_recording_name: Option<String> = None;
    let mut preview_settings = PreviewSettings::default();
    let mut framerate = FramerateTracker::default();
    let mut last_rate_publish = Instant::now();
    let mut last_seen = 0u64;
    let mut dropped_previews = 0u64;

    let result = loop {
        while let Ok(control) = control_rx.try_recv() {
            match control {
                RouterControl::SetRecordingName(name) => pending_recording_name = name,
                RouterControl::SetPreviewScale(scale) => {
                    preview_settings = PreviewSettings { scale };
                }
            }
        }

        let multi_frame_number = match orchestrator.await_new_multi_frame(last_seen) {
            Ok(n) => n,
            Err(skelly_orchestrator::Error::Killed) => break Ok(()),
            Err(e) => break Err(e.into()),
        };
        last_seen = multi_frame_number;
        let mut payload = shm.read_multi_frame(multi_frame_number);
        // Copy done: release the slots for the next barrier cycle.
        orchestrator.clear_new_frames_available()?;
        payload.add_lifespan_marker("read_from_shm", clock::monotonic_ns());

        // Recording first; the GUI can lag, the disk must not.
        if orchestrator.is_recording() {
            if recorder.is_none() {
                // The name control is sent before the record flag flips, so
                // one more drain here is guaranteed to observe it.
                while let Ok(control) = control_rx.try_recv() {
                    match control {
                        RouterControl::SetRecordingName(name) => pending_recording_name = name,
                        RouterControl::SetPreviewScale(scale) => {
                            preview_settings = PreviewSettings { scale };
                        }
                    }
                }
                let name = default_recording_name(pending_recording_name.take().as_deref());
                match VideoRecorderManager::create(base_recording_folder, name, camera_configs)
                {
                    Ok(manager) => {
                        let _ = output
                            .event_tx
                            .send(IpcEvent::RecordingInfo(manager.recording_info()));
                        recorder = Some(manager);
                    }
                    Err(e) => break Err(fatal_recorder_error(&orchestrator, &output, e)),
                }
            }
            if let Some(manager) = recorder.as_mut() {
                if let Err(e) = manager.add_multi_frame(&payload) {
                    if let Some(manager) = recorder.take() {
                        manager.abort();
                    }
                    break Err(fatal_recorder_error(&orchestrator, &output, e));
                }
            }
        } else if let Some(manager) = recorder.take() {
            match manager.close() {
                Ok(info) => {
                    let _ = output.event_tx.send(IpcEvent::RecordingInfo(info));
                }
                Err(e) => break Err(fatal_recorder_error(&orchestrator, &output, e)),
            }
        }

        match encode_preview(&payload, camera_configs, &preview_settings) {
            Ok(preview) => match output.preview_tx.try_send(preview) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    // Preview payloads are expendable; the next one gets its turn.
                    dropped_previews += 1;
                    trace!("preview channel backed up ({dropped_previews} dropped so far)");
                }
            },
            Err(e) => warn!("preview encode failed for payload {multi_frame_number}: {e}"),
        }

        framerate.observe(clock::monotonic_ns());
        if last_rate_publish.elapsed() >= FRAMERATE_PUBLISH_INTERVAL {
            if let Some(rate) = framerate.current() {
                let _ = output.event_tx.send(IpcEvent::CurrentFrameRate(rate));
                last_rate_publish = Instant::now();
            }
        }
    };

    // Kill or fatal: flush whatever the recorder already holds.
    if let Some(manager) = recorder.take() {
        match manager.close() {
            Ok(info) => {
                let _ = output.event_tx.send(IpcEvent::RecordingInfo(info));
            }
            Err(e) => error!("closing recorder during shutdown failed: {e}"),
        }
    }
    debug!(
        "frame router exiting after {last_seen} payload(s), {dropped_previews} preview(s) dropped"
    );
    result
}

fn fatal_recorder_error(
    orchestrator: &CameraGroupOrchestrator,
    output: &RouterOutput,
    error: skelly_videos::Error,
) -> crate::Error {
    error!("fatal recorder error, killing the group: {error}");
    orchestrator.set_kill();
    let _ = output.event_tx.send(IpcEvent::SessionError {
        message: error.to_string(),
    });
    error.into()
}
