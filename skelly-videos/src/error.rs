use skelly_types::CameraId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
    #[error("{source}")]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },
    #[error("ffmpeg exited with {status}: {stderr}")]
    Ffmpeg {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("frame of {actual} bytes written to a {expected}-byte video frame")]
    FrameSize { expected: usize, actual: usize },
    #[error("camera {0} is not part of this recording")]
    UnknownCamera(CameraId),
    #[error(
        "camera {camera_id} sidecar got frame {actual}, expected {expected} (frames must be gapless)"
    )]
    FrameNumberGap {
        camera_id: CameraId,
        expected: u64,
        actual: u64,
    },
    #[error("writer already closed")]
    AlreadyClosed,
}
