//! Barrier orchestrator: the cross-process flag set that coerces N capture
//! workers into a common grab/retrieve rhythm.
//!
//! All flags live in one small shared-memory region so that the driver, the
//! capture workers and the frame router can run in different OS processes.
//! Every flag is single-writer single-reader in normal operation; the only
//! synchronization primitive is the atomic byte.
//!
//! Cycle per multi-frame (driver side):
//!
//! 1. wait until the router has consumed the previous slot contents,
//! 2. fire `should_grab` on every camera simultaneously,
//! 3. wait until every `frame_grabbed` is set,
//! 4. fire `should_retrieve` on every camera,
//! 5. wait until every `new_frame_available` is set,
//! 6. audit the flags and publish the new `multi_frame_number`.
//!
//! The router waits on `multi_frame_number`, copies the slots, then clears
//! `new_frame_available`, which is what step 1 waits for. A slow recording
//! path therefore stalls the capture loop instead of tearing frames.

mod error;
mod flags;
pub mod wait;

pub use error::{Error, Result};
pub use flags::{CameraGroupOrchestrator, OrchestratorDTO};
