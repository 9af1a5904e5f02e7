pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
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
    #[error("recorder failure: {source}")]
    Recorder {
        #[from]
        source: skelly_videos::Error,
    },
    #[error("preview encode failed: {0}")]
    PreviewEncode(String),
}
