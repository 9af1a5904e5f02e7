use skelly_types::CameraId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("shared memory region '{name}' has size {actual}, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error(
        "buffer of {actual} bytes does not match the configured image shape ({expected} bytes)"
    )]
    ConfigMismatch { expected: usize, actual: usize },
    #[error("camera {0} is not part of this shared-memory group")]
    UnknownCamera(CameraId),
    #[error("write through a read-only shared-memory view")]
    ReadOnly,
}
