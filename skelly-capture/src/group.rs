use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use skelly_orchestrator::{CameraGroupOrchestrator, OrchestratorDTO};
use skelly_shmem::{CameraGroupSharedMemory, CameraGroupSharedMemoryDTO};
use skelly_types::{CameraConfigs, CameraId, UpdateInstructions};

use crate::device::{open_device, CameraDevice, DeviceBackendConfig};
use crate::worker::camera_frame_loop;
use crate::{Error, Result};

/// Everything a camera-group role needs to run, whether on a thread in the
/// controller process or in a child process of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraGroupDTO {
    pub camera_configs: CameraConfigs,
    pub shm: CameraGroupSharedMemoryDTO,
    pub orchestrator: OrchestratorDTO,
    pub backend: DeviceBackendConfig,
}

/// Host the capture workers and drive the barrier until the kill flag drops
/// the group.
///
/// Device open is atomic: if any camera fails to open, every already-open
/// device is closed and the whole call fails.
pub fn run_camera_group(
    dto: CameraGroupDTO,
    update_rx: Receiver<UpdateInstructions>,
) -> Result<()> {
    let orchestrator = Arc::new(CameraGroupOrchestrator::recreate(&dto.orchestrator)?);
    let mut group_shm = CameraGroupSharedMemory::recreate(&dto.camera_configs, &dto.shm, false)?;

    let enabled: Vec<CameraId> = dto
        .camera_configs
        .values()
        .filter(|c| c.use_this_camera)
        .map(|c| c.camera_id)
        .collect();

    let mut devices: BTreeMap<CameraId, Box<dyn CameraDevice>> = BTreeMap::new();
    for camera_id in &enabled {
        let config = &dto.camera_configs[camera_id];
        match open_device(config, &dto.backend) {
            Ok(device) => {
                devices.insert(*camera_id, device);
            }
            Err(e) => {
                error!("opening camera {camera_id} failed, tearing down the group: {e}");
                for (_, mut device) in devices {
                    device.close();
                }
                orchestrator.set_kill();
                return Err(e);
            }
        }
    }
    info!("opened {} camera device(s)", devices.len());

    let mut workers = Vec::new();
    let mut worker_config_txs: BTreeMap<CameraId, Sender<skelly_types::CameraConfig>> =
        BTreeMap::new();
    for (camera_id, device) in devices {
        let config = dto.camera_configs[&camera_id].clone();
        let shm = group_shm.take_camera(camera_id)?;
        let orchestrator = orchestrator.clone();
        let (config_tx, config_rx) = crossbeam_channel::unbounded();
        worker_config_txs.insert(camera_id, config_tx);
        let join = std::thread::Builder::new()
            .name(format!("camera-{camera_id}"))
            .spawn(move || camera_frame_loop(config, device, shm, orchestrator, config_rx))?;
        workers.push((camera_id, join));
    }

    let drive_result = drive_loop(&orchestrator, &update_rx, &worker_config_txs);

    // Whatever ended the loop, make sure the workers see it.
    orchestrator.set_kill();
    let mut first_error: Option<Error> = None;
    for (camera_id, join) in workers {
        match join.join() {
            Ok(Ok(frames)) => debug!("camera {camera_id} joined after {frames} frame(s)"),
            Ok(Err(e)) => {
                error!("camera {camera_id} worker error: {e}");
                first_error.get_or_insert(e);
            }
            Err(_) => error!("camera {camera_id} worker panicked"),
        }
    }
    drive_result?;
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn drive_loop(
    orchestrator: &CameraGroupOrchestrator,
    update_rx: &Receiver<UpdateInstructions>,
    worker_config_txs: &BTreeMap<CameraId, Sender<skelly_types::CameraConfig>>,
) -> Result<()> {
    match orchestrator.await_cameras_ready() {
        Ok(()) => {}
        Err(skelly_orchestrator::Error::Killed) => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    match orchestrator.fire_initial_triggers() {
        Ok(()) => {}
        Err(skelly_orchestrator::Error::Killed) => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    info!("camera group loop started");

    loop {
        while let Ok(instructions) = update_rx.try_recv() {
            match instructions {
                UpdateInstructions::InPlace {
                    new_configs,
                    changed_cameras,
                } => {
                    for camera_id in changed_cameras {
                        if let (Some(tx), Some(config)) = (
                            worker_config_txs.get(&camera_id),
                            new_configs.get(&camera_id),
                        ) {
                            let _ = tx.send(config.clone());
                        }
                    }
                }
                UpdateInstructions::ResetAll { .. } => {
                    // The controller tears the group down for these; one
                    // arriving here is a caller bug worth hearing about.
                    warn!("reset-all update reached a running group; ignoring");
                }
            }
        }
        match orchestrator.trigger_multi_frame_read() {
            Ok(_) => {}
            Err(skelly_orchestrator::Error::Killed) => return Ok(()),
            Err(e) => {
                error!("camera group loop failed: {e}");
                return Err(e.into());
            }
        }
    }
}

/// A camera group running on a thread inside this process.
pub struct CameraGroupThread {
    join_handle: std::thread::JoinHandle<Result<()>>,
    update_tx: Sender<UpdateInstructions>,
}

impl CameraGroupThread {
    pub fn spawn(dto: CameraGroupDTO) -> Result<Self> {
        let (update_tx, update_rx) = crossbeam_channel::unbounded();
        let join_handle = std::thread::Builder::new()
            .name("camera-group".to_string())
            .spawn(move || run_camera_group(dto, update_rx))?;
        Ok(Self {
            join_handle,
            update_tx,
        })
    }

    pub fn send_update(&self, instructions: UpdateInstructions) {
        let _ = self.update_tx.send(instructions);
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    pub fn join(self) -> Result<()> {
        match self.join_handle.join() {
            Ok(result) => result,
            Err(_) => Err(Error::GroupPanicked),
        }
    }
}
