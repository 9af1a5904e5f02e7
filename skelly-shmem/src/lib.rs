//! Single-slot shared-memory frame exchange.
//!
//! Each camera gets two named file-backed regions: an image buffer of exactly
//! `h*w*c` bytes and a fixed-width metadata record. The regions live under
//! `/dev/shm` on Linux (the temp dir elsewhere), so any process holding the
//! region names can map the same bytes. Publication discipline comes from the
//! barrier orchestrator, not from this crate: there is exactly one slot per
//! camera and no internal locking.

pub mod clock;
mod element;
mod error;
mod frame_buffers;

pub use element::SharedMemoryElement;
pub use error::{Error, Result};
pub use frame_buffers::{
    CameraGroupSharedMemory, CameraGroupSharedMemoryDTO, CameraSharedMemory, SharedMemoryNames,
};

use std::path::PathBuf;

/// Directory holding the region files.
pub fn shared_memory_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let dev_shm = PathBuf::from("/dev/shm");
        if dev_shm.is_dir() {
            return dev_shm;
        }
    }
    std::env::temp_dir()
}
