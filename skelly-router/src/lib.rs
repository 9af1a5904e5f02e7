//! The frame router: a separate role that consumes multi-frame payloads from
//! shared memory and forks each one into (a) the recorder when recording is
//! on (lossless; back-pressure here may stall the capture loop) and (b) a
//! drop-tolerant downsampled JPEG preview for the GUI, plus a rolling
//! framerate measurement.

mod error;
mod framerate;
mod preview;
mod router;

pub use error::{Error, Result};
pub use framerate::FramerateTracker;
pub use preview::{encode_preview, PreviewSettings};
pub use router::{frame_router_loop, RouterControl, RouterOutput};
