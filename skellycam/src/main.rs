use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tracing::{info, warn};

use skelly_capture::{DeviceBackendConfig, SynthOptions};
use skelly_types::{default_camera_configs, CameraId, IpcEvent};
use skellycam::{logging, roles, Controller, ControllerOptions, RoleMode};

#[derive(Parser, Debug)]
#[command(name = "skellycam", version, about = "temporally-aligned multi-camera capture")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List locally-attached cameras as JSON.
    Detect {
        /// Report synthetic cameras when no hardware is found.
        #[arg(long)]
        synthetic: bool,
    },
    /// Connect the cameras and relay IPC events until interrupted.
    Serve {
        #[arg(long)]
        synthetic: bool,
        #[arg(long)]
        recording_folder: Option<PathBuf>,
        /// Run the capture and router roles as threads instead of processes.
        #[arg(long)]
        in_process: bool,
    },
    /// Record for a fixed duration, then exit.
    Record {
        #[arg(long, default_value_t = 5.0)]
        seconds: f64,
        /// Tag appended to the recording name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        synthetic: bool,
        #[arg(long)]
        recording_folder: Option<PathBuf>,
        #[arg(long)]
        in_process: bool,
        /// Restrict capture to these camera ids.
        #[arg(long, value_delimiter = ',')]
        cameras: Vec<u8>,
    },
    /// (internal) capture-group role, spawned by the controller.
    #[command(hide = true, name = "camera-group")]
    CameraGroup,
    /// (internal) frame-router role, spawned by the controller.
    #[command(hide = true, name = "frame-router")]
    FrameRouter,
}

fn backend(synthetic: bool) -> DeviceBackendConfig {
    if synthetic {
        return DeviceBackendConfig::Synthetic(SynthOptions {
            pace_to_framerate: true,
            ..Default::default()
        });
    }
    #[cfg(all(target_os = "linux", feature = "backend_v4l"))]
    {
        DeviceBackendConfig::V4l
    }
    #[cfg(not(all(target_os = "linux", feature = "backend_v4l")))]
    {
        warn!("no hardware camera backend compiled in; using synthetic cameras");
        DeviceBackendConfig::Synthetic(SynthOptions {
            pace_to_framerate: true,
            ..Default::default()
        })
    }
}

fn controller_options(
    synthetic: bool,
    recording_folder: Option<PathBuf>,
    in_process: bool,
) -> ControllerOptions {
    ControllerOptions {
        backend: backend(synthetic),
        base_recording_folder: recording_folder
            .unwrap_or_else(skellycam::controller::default_recording_base),
        role_mode: if in_process {
            RoleMode::Thread
        } else {
            RoleMode::Process
        },
        ..Default::default()
    }
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init();

    match cli.command {
        Commands::Detect { synthetic } => {
            let devices = skelly_capture::detect_available_devices(synthetic);
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }
        Commands::Serve {
            synthetic,
            recording_folder,
            in_process,
        } => serve(controller_options(synthetic, recording_folder, in_process)),
        Commands::Record {
            seconds,
            name,
            synthetic,
            recording_folder,
            in_process,
            cameras,
        } => record(
            controller_options(synthetic, recording_folder, in_process),
            seconds,
            name,
            cameras,
        ),
        Commands::CameraGroup => roles::camera_group_child_main(),
        Commands::FrameRouter => roles::frame_router_child_main(),
    }
}

fn serve(options: ControllerOptions) -> eyre::Result<()> {
    let controller = Controller::new(options);
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .wrap_err("installing interrupt handler")?;
    }

    controller.detect();
    controller.connect(None)?;
    info!("serving; interrupt to exit");

    while !interrupted.load(Ordering::SeqCst) {
        if let Ok(event) = controller
            .event_receiver()
            .recv_timeout(Duration::from_millis(100))
        {
            if let IpcEvent::CurrentFrameRate(rate) = &event {
                controller.note_framerate(rate.clone());
            }
            println!("{}", serde_json::to_string(&event)?);
        }
        // The websocket layer owns this stream in production; here we just
        // keep it draining.
        while controller.preview_receiver().try_recv().is_ok() {}
    }
    controller.shutdown();
    Ok(())
}

fn record(
    options: ControllerOptions,
    seconds: f64,
    name: Option<String>,
    cameras: Vec<u8>,
) -> eyre::Result<()> {
    let controller = Controller::new(options);
    let devices = controller.detect();
    let mut configs = default_camera_configs(&devices);
    if !cameras.is_empty() {
        let keep: Vec<CameraId> = cameras.into_iter().map(CameraId).collect();
        configs.retain(|camera_id, _| keep.contains(camera_id));
    }
    if configs.is_empty() {
        return Err(eyre::eyre!("no cameras to record from"));
    }

    controller.connect(Some(configs))?;
    controller.start_recording(name)?;
    info!("recording for {seconds} second(s)...");

    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    let mut recording_info = None;
    while Instant::now() < deadline {
        drain_events(&controller, &mut recording_info);
        std::thread::sleep(Duration::from_millis(50));
    }
    controller.stop_recording()?;

    // The closing RecordingInfo arrives once the router flushes the session.
    let wait_deadline = Instant::now() + Duration::from_secs(20);
    let mut closed_info = None;
    while closed_info.is_none() && Instant::now() < wait_deadline {
        if let Ok(event) = controller
            .event_receiver()
            .recv_timeout(Duration::from_millis(100))
        {
            if let IpcEvent::RecordingInfo(info) = event {
                closed_info = Some(info);
            }
        }
        while controller.preview_receiver().try_recv().is_ok() {}
    }
    controller.close();

    match closed_info.or(recording_info) {
        Some(info) => {
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        None => Err(eyre::eyre!("recording produced no RecordingInfo event")),
    }
}

fn drain_events(controller: &Controller, recording_info: &mut Option<skelly_types::RecordingInfo>) {
    while let Ok(event) = controller.event_receiver().try_recv() {
        match event {
            IpcEvent::RecordingInfo(info) => *recording_info = Some(info),
            IpcEvent::CurrentFrameRate(rate) => controller.note_framerate(rate),
            IpcEvent::SessionError { message } => warn!("session error: {message}"),
            IpcEvent::AppStateDTO(_) => {}
        }
    }
    while controller.preview_receiver().try_recv().is_ok() {}
}
