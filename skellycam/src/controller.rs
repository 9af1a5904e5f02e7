//! The lifecycle controller: one explicitly-owned application state behind
//! one mutex, mutated only by the operations below. The HTTP layer (out of
//! scope) calls these and drains the IPC channels.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use eyre::{eyre, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use skelly_capture::{
    detect_available_devices, CameraGroupDTO, CameraGroupThread, DeviceBackendConfig,
};
use skelly_orchestrator::CameraGroupOrchestrator;
use skelly_router::{frame_router_loop, RouterControl, RouterOutput};
use skelly_shmem::CameraGroupSharedMemory;
use skelly_types::{
    default_camera_configs, AppStateDTO, AvailableDevices, CameraConfigs, CurrentFrameRate,
    IpcEvent, PreviewPayload, UpdateInstructions,
};

use crate::roles::{
    spawn_camera_group_process, spawn_frame_router_process, ChildRole, RouterRoleDTO,
};

/// How long `close` waits for roles before escalating to process kill.
const CLOSE_GRACE: Duration = Duration::from_secs(5);
/// How long `connect` waits for cameras to pass the ready barrier.
const CONNECT_DEADLINE: Duration = Duration::from_secs(30);

/// Whether the capture-group and router roles run as OS child processes
/// (production) or as threads in this process (tests, embedding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleMode {
    Thread,
    Process,
}

pub struct ControllerOptions {
    pub backend: DeviceBackendConfig,
    pub base_recording_folder: PathBuf,
    pub role_mode: RoleMode,
    pub preview_channel_capacity: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            backend: DeviceBackendConfig::default(),
            base_recording_folder: default_recording_base(),
            role_mode: RoleMode::Process,
            preview_channel_capacity: 8,
        }
    }
}

/// `~/skellycam_data/recordings`, or the temp dir without a home.
pub fn default_recording_base() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("skellycam_data")
        .join("recordings")
}

enum GroupRole {
    Thread(CameraGroupThread),
    Process(ChildRole),
}

enum RouterRole {
    Thread {
        join: std::thread::JoinHandle<skelly_router::Result<()>>,
        control_tx: Sender<RouterControl>,
    },
    Process(ChildRole),
}

impl RouterRole {
    fn send_control(&mut self, control: RouterControl) {
        match self {
            RouterRole::Thread { control_tx, .. } => {
                let _ = control_tx.send(control);
            }
            RouterRole::Process(role) => {
                if let Ok(line) = serde_json::to_string(&control) {
                    role.send_line(&line);
                }
            }
        }
    }
}

struct GroupRuntime {
    configs: CameraConfigs,
    shm: CameraGroupSharedMemory,
    orchestrator: Arc<CameraGroupOrchestrator>,
    group_role: GroupRole,
    router_role: RouterRole,
}

struct AppState {
    available_devices: Option<AvailableDevices>,
    group: Option<GroupRuntime>,
    record_frames: bool,
    current_framerate: Option<CurrentFrameRate>,
}

pub struct Controller {
    options: ControllerOptions,
    state: Mutex<AppState>,
    event_tx: Sender<IpcEvent>,
    event_rx: Receiver<IpcEvent>,
    preview_tx: Sender<PreviewPayload>,
    preview_rx: Receiver<PreviewPayload>,
}

impl Controller {
    pub fn new(options: ControllerOptions) -> Self {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (preview_tx, preview_rx) =
            crossbeam_channel::bounded(options.preview_channel_capacity.max(1));
        Self {
            options,
            state: Mutex::new(AppState {
                available_devices: None,
                group: None,
                record_frames: false,
                current_framerate: None,
            }),
            event_tx,
            event_rx,
            preview_tx,
            preview_rx,
        }
    }

    /// The IPC event stream (app state, recording info, framerate, errors).
    pub fn event_receiver(&self) -> &Receiver<IpcEvent> {
        &self.event_rx
    }

    /// The preview byte-stream boundary.
    pub fn preview_receiver(&self) -> &Receiver<PreviewPayload> {
        &self.preview_rx
    }

    pub fn camera_configs(&self) -> Option<CameraConfigs> {
        self.state.lock().group.as_ref().map(|g| g.configs.clone())
    }

    /// Record the latest framerate measurement relayed off the event stream.
    pub fn note_framerate(&self, rate: CurrentFrameRate) {
        self.state.lock().current_framerate = Some(rate);
    }

    // ------------------------------------------------------------------
    // lifecycle operations

    pub fn detect(&self) -> AvailableDevices {
        let synthetic_fallback =
            matches!(self.options.backend, DeviceBackendConfig::Synthetic(_));
        let devices = detect_available_devices(synthetic_fallback);
        let mut state = self.state.lock();
        state.available_devices = Some(devices.clone());
        self.publish_state(&state);
        devices
    }

    /// Create (or reconfigure) the camera group and block until every camera
    /// is past the ready barrier.
    pub fn connect(&self, configs: Option<CameraConfigs>) -> eyre::Result<()> {
        let mut state = self.state.lock();
        let desired = match configs {
            Some(configs) => configs,
            None => {
                if state.available_devices.is_none() {
                    drop(state);
                    self.detect();
                    state = self.state.lock();
                }
                let devices = state
                    .available_devices
                    .as_ref()
                    .ok_or_else(|| eyre!("no cameras detected"))?;
                default_camera_configs(devices)
            }
        };
        if desired.values().filter(|c| c.use_this_camera).count() == 0 {
            return Err(eyre!("no enabled cameras in the requested configuration"));
        }

        if let Some(group) = state.group.as_mut() {
            match UpdateInstructions::from_configs(&group.configs, &desired) {
                None => {
                    debug!("connect with unchanged configs is a no-op");
                    return Ok(());
                }
                Some(plan @ UpdateInstructions::InPlace { .. }) => {
                    self.apply_in_place(&mut state, plan)?;
                    self.publish_state(&state);
                    return Ok(());
                }
                Some(UpdateInstructions::ResetAll { .. }) => {
                    info!("configuration change requires a group reset");
                    self.close_group(&mut state);
                }
            }
        }

        self.create_group(&mut state, desired)?;
        self.publish_state(&state);
        Ok(())
    }

    /// Apply a new configuration to the running group; returns the plan that
    /// was applied (`None` when nothing changed).
    pub fn update_configs(
        &self,
        new_configs: CameraConfigs,
    ) -> eyre::Result<Option<UpdateInstructions>> {
        let mut state = self.state.lock();
        let group = state
            .group
            .as_ref()
            .ok_or_else(|| eyre!("no camera group to update"))?;
        let plan = match UpdateInstructions::from_configs(&group.configs, &new_configs) {
            None => return Ok(None),
            Some(plan) => plan,
        };
        match &plan {
            UpdateInstructions::InPlace { .. } => {
                self.apply_in_place(&mut state, plan.clone())?;
            }
            UpdateInstructions::ResetAll { new_configs } => {
                info!("update requires reset: tearing the group down");
                let new_configs = new_configs.clone();
                self.close_group(&mut state);
                self.create_group(&mut state, new_configs)?;
            }
        }
        self.publish_state(&state);
        Ok(Some(plan))
    }

    /// Flip the record flag on; the router opens the session on the next
    /// multi-frame payload. Never blocks the capture loop.
    pub fn start_recording(&self, name: Option<String>) -> eyre::Result<()> {
        let mut state = self.state.lock();
        let group = state
            .group
            .as_mut()
            .ok_or_else(|| eyre!("no camera group; connect first"))?;
        group
            .router_role
            .send_control(RouterControl::SetRecordingName(name));
        group.orchestrator.set_record(true);
        state.record_frames = true;
        self.publish_state(&state);
        Ok(())
    }

    pub fn stop_recording(&self) -> eyre::Result<()> {
        let mut state = self.state.lock();
        let group = state
            .group
            .as_mut()
            .ok_or_else(|| eyre!("no camera group; connect first"))?;
        group.orchestrator.set_record(false);
        state.record_frames = false;
        self.publish_state(&state);
        Ok(())
    }

    /// Tear the group down. Idempotent, and succeeds even when the capture
    /// loop has stalled: after a bounded grace period child processes are
    /// killed outright.
    pub fn close(&self) {
        let mut state = self.state.lock();
        self.close_group(&mut state);
        self.publish_state(&state);
    }

    pub fn shutdown(&self) {
        info!("shutting down");
        self.close();
    }

    // ------------------------------------------------------------------
    // internals (state lock held)

    fn apply_in_place(
        &self,
        state: &mut AppState,
        plan: UpdateInstructions,
    ) -> eyre::Result<()> {
        let group = state
            .group
            .as_mut()
            .ok_or_else(|| eyre!("no camera group"))?;
        let new_configs = plan.new_configs().clone();
        match &mut group.group_role {
            GroupRole::Thread(cgp) => cgp.send_update(plan),
            GroupRole::Process(role) => {
                let line = serde_json::to_string(&plan)?;
                role.send_line(&line);
            }
        }
        group.configs = new_configs;
        Ok(())
    }

    fn create_group(&self, state: &mut AppState, configs: CameraConfigs) -> eyre::Result<()> {
        let shm = CameraGroupSharedMemory::create(&configs)
            .wrap_err("creating shared-memory frame buffers")?;
        let orchestrator = Arc::new(
            CameraGroupOrchestrator::create(shm.camera_ids())
                .wrap_err("creating orchestrator flags")?,
        );
        let group_dto = CameraGroupDTO {
            camera_configs: configs.clone(),
            shm: shm.to_dto(),
            orchestrator: orchestrator.to_dto(),
            backend: self.options.backend.clone(),
        };
        let router_dto = RouterRoleDTO {
            camera_configs: configs.clone(),
            shm: shm.to_dto(),
            orchestrator: orchestrator.to_dto(),
            base_recording_folder: self.options.base_recording_folder.clone(),
        };

        let (group_role, router_role) = match self.options.role_mode {
            RoleMode::Thread => {
                let cgp = CameraGroupThread::spawn(group_dto)
                    .wrap_err("spawning camera group thread")?;
                let (control_tx, control_rx) = crossbeam_channel::unbounded();
                let event_tx = self.event_tx.clone();
                let preview_tx = self.preview_tx.clone();
                let join = std::thread::Builder::new()
                    .name("frame-router".to_string())
                    .spawn(move || {
                        frame_router_loop(
                            &router_dto.camera_configs,
                            &router_dto.shm,
                            &router_dto.orchestrator,
                            &router_dto.base_recording_folder,
                            control_rx,
                            RouterOutput {
                                event_tx,
                                preview_tx,
                            },
                        )
                    })
                    .wrap_err("spawning frame router thread")?;
                (
                    GroupRole::Thread(cgp),
                    RouterRole::Thread { join, control_tx },
                )
            }
            RoleMode::Process => {
                let cgp = spawn_camera_group_process(&group_dto)
                    .wrap_err("spawning camera group process")?;
                let router = spawn_frame_router_process(
                    &router_dto,
                    self.event_tx.clone(),
                    self.preview_tx.clone(),
                )
                .wrap_err("spawning frame router process")?;
                (GroupRole::Process(cgp), RouterRole::Process(router))
            }
        };

        let runtime = GroupRuntime {
            configs,
            shm,
            orchestrator: orchestrator.clone(),
            group_role,
            router_role,
        };

        // Block until the cameras pass the ready barrier; a failed atomic
        // open raises the kill flag instead.
        let deadline = Instant::now() + CONNECT_DEADLINE;
        loop {
            if orchestrator.cameras_ready() {
                break;
            }
            if orchestrator.is_killed() || Instant::now() >= deadline {
                orchestrator.set_kill();
                let mut stash = Some(runtime);
                Self::teardown_runtime(&mut stash);
                return Err(eyre!("camera group failed to open"));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        info!("camera group connected ({} cameras)", runtime.configs.len());
        state.group = Some(runtime);
        Ok(())
    }

    fn close_group(&self, state: &mut AppState) {
        if state.group.is_none() {
            debug!("close with no camera group is a no-op");
            return;
        }
        let mut group = state.group.take();
        if let Some(runtime) = group.as_ref() {
            runtime.orchestrator.set_kill();
        }
        Self::teardown_runtime(&mut group);
        state.record_frames = false;
        state.current_framerate = None;
        info!("camera group closed");
    }

    fn teardown_runtime(group: &mut Option<GroupRuntime>) {
        let Some(runtime) = group.take() else {
            return;
        };
        match runtime.group_role {
            GroupRole::Thread(cgp) => {
                if let Err(e) = cgp.join() {
                    if !e.is_killed() {
                        warn!("camera group ended with error: {e}");
                    }
                }
            }
            GroupRole::Process(role) => role.shutdown(CLOSE_GRACE),
        }
        match runtime.router_role {
            RouterRole::Thread { join, .. } => match join.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("frame router ended with error: {e}"),
                Err(_) => warn!("frame router thread panicked"),
            },
            RouterRole::Process(role) => role.shutdown(CLOSE_GRACE),
        }
        if let Err(e) = runtime.shm.close_and_unlink() {
            warn!("unlinking shared memory failed: {e}");
        }
        if let Err(e) = runtime.orchestrator.unlink() {
            warn!("unlinking orchestrator flags failed: {e}");
        }
    }

    fn publish_state(&self, state: &AppState) {
        let dto = AppStateDTO {
            state_timestamp: chrono::Utc::now().to_rfc3339(),
            camera_configs: state.group.as_ref().map(|g| g.configs.clone()),
            available_devices: state.available_devices.clone(),
            current_framerate: state.current_framerate.clone(),
            record_frames_flag_status: state.record_frames,
        };
        let _ = self.event_tx.send(IpcEvent::AppStateDTO(dto));
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        self.close_group(&mut state);
    }
}
