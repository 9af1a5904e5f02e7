use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use skelly_types::{CameraConfigs, CameraId, MultiFramePayload, RecordingInfo};

use crate::diagnostics::DiagnosticsAccumulator;
use crate::sidecar::TimestampSidecar;
use crate::writer::VideoWriter;
use crate::{Error, Result, TimestampDiagnostics};

/// ISO-8601-derived recording name, filesystem-safe, with an optional user
/// tag appended.
pub fn default_recording_name(tag: Option<&str>) -> String {
    let stamp = Utc::now().format("%Y-%m-%d_%H_%M_%S");
    match tag {
        Some(tag) if !tag.is_empty() => format!("recording_{stamp}_{tag}"),
        _ => format!("recording_{stamp}"),
    }
}

/// The `session_information.json` document written at session close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInformation {
    pub session_name: String,
    pub session_start_time_iso8601: String,
    pub session_start_time_unix_seconds: f64,
    pub video_save_folder_path: String,
    pub camera_configurations: CameraConfigs,
    pub timestamp_diagnostic_results: TimestampDiagnostics,
}

struct CameraRecorder {
    writer: VideoWriter,
    sidecar: TimestampSidecar,
    sidecar_path: PathBuf,
}

/// One recording session: per-camera video writer + timestamp sidecar pairs
/// sharing a recording name and a start time.
///
/// The session contract: the first multi-frame payload added is frame 0 of
/// the recording for every camera, and the N-th sidecar row of every camera
/// belongs to the same payload.
pub struct VideoRecorderManager {
    recording_name: String,
    recording_folder: PathBuf,
    camera_configs: CameraConfigs,
    start_time: chrono::DateTime<Utc>,
    recorders: BTreeMap<CameraId, CameraRecorder>,
    diagnostics: DiagnosticsAccumulator,
}

impl VideoRecorderManager {
    /// Create the recording folder and open a writer + sidecar per enabled
    /// camera.
    pub fn create(
        base_folder: &Path,
        recording_name: String,
        camera_configs: &CameraConfigs,
    ) -> Result<Self> {
        let recording_folder = base_folder.join(&recording_name);
        std::fs::create_dir_all(&recording_folder)?;

        let mut recorders = BTreeMap::new();
        for (camera_id, config) in camera_configs.iter().filter(|(_, c)| c.use_this_camera) {
            let video_path =
                recording_folder.join(format!("{recording_name}_camera_{camera_id}.mp4"));
            let sidecar_path = recording_folder
                .join(format!("{recording_name}_camera_{camera_id}_timestamps.csv"));
            let writer = VideoWriter::open(&video_path, config)?;
            let sidecar = TimestampSidecar::create(&sidecar_path, *camera_id)?;
            recorders.insert(
                *camera_id,
                CameraRecorder {
                    writer,
                    sidecar,
                    sidecar_path,
                },
            );
        }
        info!(
            "recording '{recording_name}' started with {} camera(s) in {}",
            recorders.len(),
            recording_folder.display()
        );
        Ok(Self {
            recording_name,
            recording_folder,
            camera_configs: camera_configs.clone(),
            start_time: Utc::now(),
            recorders,
            diagnostics: DiagnosticsAccumulator::default(),
        })
    }

    pub fn recording_name(&self) -> &str {
        &self.recording_name
    }

    pub fn recording_info(&self) -> RecordingInfo {
        RecordingInfo {
            recording_name: self.recording_name.clone(),
            recording_folder: self.recording_folder.display().to_string(),
            camera_ids: self.recorders.keys().copied().collect(),
        }
    }

    /// Persist one multi-frame payload: every camera's image to its video,
    /// every metadata record to its sidecar. This path never drops frames;
    /// an error here is fatal to the session.
    pub fn add_multi_frame(&mut self, payload: &MultiFramePayload) -> Result<()> {
        for (camera_id, frame) in &payload.frames {
            let recorder = self
                .recorders
                .get_mut(camera_id)
                .ok_or(Error::UnknownCamera(*camera_id))?;
            recorder.writer.write_frame(&frame.image)?;
            recorder.sidecar.add_row(&frame.metadata)?;
        }
        self.diagnostics.observe(payload);
        Ok(())
    }

    /// Flush and close every writer, then drop `session_information.json`
    /// next to the videos.
    pub fn close(self) -> Result<RecordingInfo> {
        let info = self.recording_info();
        let diagnostics = self.diagnostics.finalize();
        for (camera_id, recorder) in self.recorders {
            let mut sidecar = recorder.sidecar;
            sidecar.flush()?;
            let rows = sidecar.rows();
            let frames = recorder.writer.close()?;
            if frames != rows {
                // The add path writes both in lockstep, so this indicates a
                // writer that silently swallowed frames.
                error!(
                    "camera {camera_id}: {frames} video frame(s) but {rows} sidecar row(s) in {}",
                    recorder.sidecar_path.display()
                );
            }
            debug!("camera {camera_id}: closed with {frames} frame(s)");
        }

        let session_information = SessionInformation {
            session_name: self.recording_name.clone(),
            session_start_time_iso8601: self.start_time.to_rfc3339(),
            session_start_time_unix_seconds: self.start_time.timestamp_millis() as f64 / 1000.0,
            video_save_folder_path: self.recording_folder.display().to_string(),
            camera_configurations: self.camera_configs,
            timestamp_diagnostic_results: diagnostics,
        };
        let json_path = self.recording_folder.join("session_information.json");
        let file = std::fs::File::create(&json_path)?;
        serde_json::to_writer_pretty(file, &session_information)?;
        info!("recording '{}' closed", self.recording_name);
        Ok(info)
    }

    /// Best-effort flush after a fatal error: push buffered sidecar bytes to
    /// disk and let the video writers finalize what they already encoded.
    pub fn abort(mut self) {
        for recorder in self.recorders.values_mut() {
            let _ = recorder.sidecar.flush();
        }
        // Writers finalize on drop.
    }
}
