use skelly_types::CameraId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The kill flag was observed at an await point. Not a failure: callers
    /// unwind without producing output.
    #[error("camera group killed")]
    Killed,
    #[error("barrier violation: {state_dump}")]
    BarrierViolation { state_dump: String },
    #[error("camera {0} is not part of this orchestrator")]
    UnknownCamera(CameraId),
    #[error("{source}")]
    Shmem {
        #[from]
        source: skelly_shmem::Error,
    },
}
