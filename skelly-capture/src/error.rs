use skelly_types::CameraId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A camera could not be opened at its requested configuration. Fatal
    /// for the whole `connect`: the group opens atomically or not at all.
    #[error("camera {camera_id} could not be opened: {message}")]
    DeviceOpen { camera_id: CameraId, message: String },
    /// A `retrieve` failed after a successful `grab`. Fatal for the session.
    #[error("camera {camera_id} failed to retrieve a grabbed frame: {message}")]
    FrameRetrieve { camera_id: CameraId, message: String },
    #[error("{source}")]
    Orchestrator {
        #[from]
        source: skelly_orchestrator::Error,
    },
    #[error("{source}")]
    Shmem {
        #[from]
        source: skelly_shmem::Error,
    },
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("camera group thread panicked")]
    GroupPanicked,
}

impl Error {
    /// Kill-flag unwinds are clean exits, not failures.
    pub fn is_killed(&self) -> bool {
        matches!(
            self,
            Error::Orchestrator {
                source: skelly_orchestrator::Error::Killed
            }
        )
    }
}
