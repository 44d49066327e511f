//! # Process Execution
//!
//! - `runner` - Spawns one shell command and streams its output as events
//! - `registry` - Tracks live processes by command id for stop and shutdown

pub mod registry;
pub mod runner;

pub use registry::{ProcessHandle, ProcessRegistry};
pub use runner::{ProcessRunner, StepRunner};
