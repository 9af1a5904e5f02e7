//! Application layer: the lifecycle controller that owns the camera group,
//! the IPC event channel consumed by the external WebSocket boundary, and
//! the child-process plumbing for the capture and router roles.

pub mod controller;
pub mod logging;
pub mod roles;

pub use controller::{Controller, ControllerOptions, RoleMode};
