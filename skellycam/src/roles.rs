//! Child-process plumbing for the capture-group and frame-router roles.
//!
//! Frame data crosses process boundaries through shared memory; only DTOs,
//! control messages and events travel over the child's stdin/stdout as
//! json-lines. The parent spawns its own executable with a hidden role
//! subcommand, writes the role DTO as the first line of stdin, and (for the
//! router) drains events from stdout into the IPC channels.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use skelly_capture::{run_camera_group, CameraGroupDTO};
use skelly_orchestrator::OrchestratorDTO;
use skelly_router::{frame_router_loop, RouterControl, RouterOutput};
use skelly_shmem::CameraGroupSharedMemoryDTO;
use skelly_types::{CameraConfigs, IpcEvent, PreviewPayload, UpdateInstructions};

/// Everything the frame-router role needs to attach and run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterRoleDTO {
    pub camera_configs: CameraConfigs,
    pub shm: CameraGroupSharedMemoryDTO,
    pub orchestrator: OrchestratorDTO,
    pub base_recording_folder: PathBuf,
}

/// What the router role writes on stdout, one json document per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RouterWire {
    Event(IpcEvent),
    Preview(PreviewPayload),
}

// ---------------------------------------------------------------------------
// child-side mains

fn read_dto_line(what: &str) -> eyre::Result<String> {
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line)? == 0 {
        return Err(eyre::eyre!("no {what} DTO on stdin"));
    }
    Ok(line)
}

/// Entry point of the hidden `camera-group` subcommand.
pub fn camera_group_child_main() -> eyre::Result<()> {
    let dto: CameraGroupDTO = serde_json::from_str(&read_dto_line("camera-group")?)?;

    let (update_tx, update_rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines().flatten() {
            match serde_json::from_str::<UpdateInstructions>(&line) {
                Ok(instructions) => {
                    let _ = update_tx.send(instructions);
                }
                Err(e) => warn!("unparseable update on stdin: {e}"),
            }
        }
    });

    run_camera_group(dto, update_rx)?;
    Ok(())
}

/// Entry point of the hidden `frame-router` subcommand.
pub fn frame_router_child_main() -> eyre::Result<()> {
    let dto: RouterRoleDTO = serde_json::from_str(&read_dto_line("frame-router")?)?;

    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines().flatten() {
            match serde_json::from_str::<RouterControl>(&line) {
                Ok(control) => {
                    let _ = control_tx.send(control);
                }
                Err(e) => warn!("unparseable router control on stdin: {e}"),
            }
        }
    });

    let (event_tx, event_rx) = crossbeam_channel::unbounded::<IpcEvent>();
    let (preview_tx, preview_rx) = crossbeam_channel::bounded::<PreviewPayload>(4);
    let writer = std::thread::spawn(move || {
        let stdout = std::io::stdout();
        loop {
            let wire = crossbeam_channel::select! {
                recv(event_rx) -> msg => match msg {
                    Ok(event) => RouterWire::Event(event),
                    Err(_) => break,
                },
                recv(preview_rx) -> msg => match msg {
                    Ok(preview) => RouterWire::Preview(preview),
                    Err(_) => break,
                },
            };
            let mut lock = stdout.lock();
            if serde_json::to_writer(&mut lock, &wire)
                .map_err(std::io::Error::from)
                .and_then(|()| lock.write_all(b"\n"))
                .and_then(|()| lock.flush())
                .is_err()
            {
                // Parent went away; nothing left to publish to.
                break;
            }
        }
    });

    let result = frame_router_loop(
        &dto.camera_configs,
        &dto.shm,
        &dto.orchestrator,
        &dto.base_recording_folder,
        control_rx,
        RouterOutput {
            event_tx,
            preview_tx,
        },
    );
    let _ = writer.join();
    result?;
    Ok(())
}

// ---------------------------------------------------------------------------
// parent-side spawning

/// A role running as a child OS process, controlled over stdin json-lines.
pub struct ChildRole {
    name: &'static str,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ChildRole {
    fn spawn(subcommand: &'static str, first_line: &str, capture_stdout: bool) -> eyre::Result<Self> {
        let exe = std::env::current_exe()?;
        let mut command = Command::new(exe);
        command.arg(subcommand).stdin(Stdio::piped());
        if capture_stdout {
            command.stdout(Stdio::piped());
        }
        let mut child = command.spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| eyre::eyre!("child stdin unavailable"))?;
        writeln!(stdin, "{first_line}")?;
        debug!("spawned {subcommand} role (pid {})", child.id());
        Ok(Self {
            name: subcommand,
            child,
            stdin: Some(stdin),
        })
    }

    /// Send one control document to the child.
    pub fn send_line(&mut self, line: &str) {
        if let Some(stdin) = self.stdin.as_mut() {
            if writeln!(stdin, "{line}").is_err() {
                warn!("{} role stopped accepting control input", self.name);
                self.stdin = None;
            }
        }
    }

    /// Wait up to `grace` for a clean exit, then terminate the process.
    pub fn shutdown(mut self, grace: Duration) {
        self.stdin.take();
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("{} role exited with {status}", self.name);
                    return;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        error!(
                            "{} role did not exit within {grace:?}, killing it",
                            self.name
                        );
                        let _ = self.child.kill();
                        let _ = self.child.wait();
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    error!("waiting on {} role failed: {e}", self.name);
                    return;
                }
            }
        }
    }
}

/// Spawn the capture-group role as a child process.
pub fn spawn_camera_group_process(dto: &CameraGroupDTO) -> eyre::Result<ChildRole> {
    ChildRole::spawn("camera-group", &serde_json::to_string(dto)?, false)
}

/// Spawn the frame-router role as a child process and drain its stdout into
/// the IPC channels. Previews ride a bounded channel and keep the drop-on-
/// full policy across the process boundary.
pub fn spawn_frame_router_process(
    dto: &RouterRoleDTO,
    event_tx: Sender<IpcEvent>,
    preview_tx: Sender<PreviewPayload>,
) -> eyre::Result<ChildRole> {
    let mut role = ChildRole::spawn("frame-router", &serde_json::to_string(dto)?, true)?;
    let stdout = role
        .child
        .stdout
        .take()
        .ok_or_else(|| eyre::eyre!("router stdout unavailable"))?;
    std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines().flatten() {
            match serde_json::from_str::<RouterWire>(&line) {
                Ok(RouterWire::Event(event)) => {
                    let _ = event_tx.send(event);
                }
                Ok(RouterWire::Preview(preview)) => match preview_tx.try_send(preview) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                },
                Err(e) => warn!("unparseable router output dropped: {e}"),
            }
        }
    });
    Ok(role)
}
