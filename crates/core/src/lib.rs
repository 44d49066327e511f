//! # Launchpad Core
//!
//! The streaming process-execution core behind Launchpad deployments.
//!
//! ## Architecture
//!
//! - `stream/` - Line reassembly and progress classification for raw output
//! - `process/` - Shell command runner and the registry of live processes
//! - `deploy/` - Step planning and the fail-fast command sequencer
//! - `events` - Event types and the broadcast channel subscribers attach to
//! - `config` - Repository root and build command configuration
//! - `error` - The `CommandError` type shared by every layer
//!
//! ## Usage
//!
//! ```rust,ignore
//! use launchpad_core::{CommandSequencer, DeployConfig, EventBroadcaster, ProcessRegistry};
//!
//! let broadcaster = Arc::new(EventBroadcaster::new(256));
//! let registry = Arc::new(ProcessRegistry::new());
//! let sequencer = CommandSequencer::with_process_runner(DeployConfig::load().await, registry, broadcaster);
//! let outcome = sequencer.deploy("https://github.com/acme/site.git", "main").await;
//! ```

pub mod config;
pub mod deploy;
pub mod error;
pub mod events;
pub mod process;
pub mod stream;

pub use config::DeployConfig;
pub use deploy::{CommandSequencer, DeploymentOutcome, StepDescriptor};
pub use error::CommandError;
pub use events::{CommandEvent, CommandId, DeployEvent, EventBroadcaster, EventSink, OutputType};
pub use process::{ProcessHandle, ProcessRegistry, ProcessRunner, StepRunner};
