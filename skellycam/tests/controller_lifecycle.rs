//! Controller lifecycle against synthetic cameras with in-process roles.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use skelly_capture::{DeviceBackendConfig, SynthOptions};
use skelly_types::{CameraConfig, CameraConfigs, CameraId, IpcEvent, Resolution};
use skelly_videos::ffmpeg_available;
use skellycam::{Controller, ControllerOptions, RoleMode};

/// Group-creating tests share shared-memory namespace checks, so they run
/// one at a time.
static GROUP_TEST_LOCK: Mutex<()> = Mutex::new(());

fn small_configs(n: u8, framerate: f64) -> CameraConfigs {
    (0..n)
        .map(|id| {
            let mut config = CameraConfig::new(CameraId(id));
            config.resolution = Resolution::new(32, 16);
            config.framerate = framerate;
            (CameraId(id), config)
        })
        .collect()
}

fn test_controller(base: &std::path::Path, paced: bool) -> Controller {
    Controller::new(ControllerOptions {
        backend: DeviceBackendConfig::Synthetic(SynthOptions {
            pace_to_framerate: paced,
            ..Default::default()
        }),
        base_recording_folder: base.to_path_buf(),
        role_mode: RoleMode::Thread,
        preview_channel_capacity: 4,
    })
}

fn session_shm_files() -> BTreeSet<String> {
    let prefix = format!("skellycam_{}_", std::process::id());
    std::fs::read_dir(skelly_shmem::shared_memory_dir())
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.starts_with(&prefix))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn connect_then_close_unlinks_all_shared_memory() {
    let _guard = GROUP_TEST_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let controller = test_controller(dir.path(), false);

    let before = session_shm_files();
    controller.connect(Some(small_configs(2, 30.0))).unwrap();
    let during = session_shm_files();
    assert!(during.len() > before.len(), "no shm regions were created");

    controller.close();
    // close is idempotent.
    controller.close();
    let after = session_shm_files();
    for name in during.difference(&before) {
        assert!(!after.contains(name), "shm region '{name}' survived close");
    }
}

#[test]
fn record_cycle_produces_matching_artifacts() {
    if !ffmpeg_available() {
        return;
    }
    let _guard = GROUP_TEST_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let controller = test_controller(dir.path(), true);

    controller.connect(Some(small_configs(2, 60.0))).unwrap();
    controller.start_recording(Some("e2e".to_string())).unwrap();

    // First RecordingInfo marks the session opening.
    let started = await_recording_info(&controller, "session start");
    assert!(started.recording_name.ends_with("_e2e"));

    std::thread::sleep(Duration::from_millis(400));
    controller.stop_recording().unwrap();
    let finished = await_recording_info(&controller, "session close");
    assert_eq!(finished.recording_name, started.recording_name);
    controller.close();

    let folder = std::path::PathBuf::from(&finished.recording_folder);
    let name = &finished.recording_name;
    let mut row_counts = Vec::new();
    for camera_id in 0..2 {
        assert!(folder.join(format!("{name}_camera_{camera_id}.mp4")).exists());
        let rows = std::fs::read_to_string(
            folder.join(format!("{name}_camera_{camera_id}_timestamps.csv")),
        )
        .unwrap()
        .lines()
        .count()
            - 1;
        assert!(rows > 0);
        row_counts.push(rows);
    }
    assert_eq!(row_counts[0], row_counts[1]);
    assert!(folder.join("session_information.json").exists());
}

#[test]
fn resolution_update_resets_the_group() {
    let _guard = GROUP_TEST_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let controller = test_controller(dir.path(), false);

    controller.connect(Some(small_configs(2, 30.0))).unwrap();
    let mut new_configs = controller.camera_configs().unwrap();
    new_configs.get_mut(&CameraId(1)).unwrap().resolution = Resolution::new(64, 32);

    let plan = controller.update_configs(new_configs.clone()).unwrap().unwrap();
    assert!(plan.requires_reset());
    assert_eq!(
        controller.camera_configs().unwrap()[&CameraId(1)].resolution,
        Resolution::new(64, 32)
    );
    controller.close();
}

#[test]
fn exposure_update_applies_in_place() {
    let _guard = GROUP_TEST_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let controller = test_controller(dir.path(), false);

    controller.connect(Some(small_configs(2, 30.0))).unwrap();
    let mut new_configs = controller.camera_configs().unwrap();
    new_configs.get_mut(&CameraId(0)).unwrap().exposure = -4;
    let plan = controller.update_configs(new_configs).unwrap().unwrap();
    assert!(!plan.requires_reset());

    // Unchanged configs are a no-op.
    let again = controller.camera_configs().unwrap();
    assert!(controller.update_configs(again).unwrap().is_none());
    controller.close();
}

#[test]
fn operations_without_a_group_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let controller = test_controller(dir.path(), false);
    assert!(controller.start_recording(None).is_err());
    assert!(controller.stop_recording().is_err());
    assert!(controller.update_configs(small_configs(1, 30.0)).is_err());
    // close with no group is a no-op.
    controller.close();
}

fn await_recording_info(
    controller: &Controller,
    what: &str,
) -> skelly_types::RecordingInfo {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        assert!(Instant::now() < deadline, "no RecordingInfo for {what}");
        match controller
            .event_receiver()
            .recv_timeout(Duration::from_millis(200))
        {
            Ok(IpcEvent::RecordingInfo(info)) => return info,
            _ => {
                while controller.preview_receiver().try_recv().is_ok() {}
            }
        }
    }
}
