//! # Deploy Events
//!
//! Event types streamed to observers while a deployment runs, and the
//! publish-only channel the core emits them through.
//!
//! The core never knows who is listening. Runners and the sequencer receive an
//! [`EventSink`] and push events into it; the server fans them out to SSE and
//! WebSocket subscribers through an [`EventBroadcaster`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::stream::classify;

/// Opaque token identifying one deployment session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// Generate a new id, unique within this process
    ///
    /// Millisecond timestamp plus a process-wide counter, so two sessions
    /// started in the same millisecond still differ.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{}", Utc::now().timestamp_millis(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CommandId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which channel a piece of output belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Stdout,
    Stderr,
    /// Lifecycle messages produced by Launchpad itself
    System,
    /// Terminal event of a command that exited with 0
    Success,
    /// Terminal event of a command that exited non-zero
    Error,
}

/// One line of output for a deployment session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEvent {
    pub command_id: CommandId,
    pub output: String,
    pub output_type: OutputType,
    /// Advisory hint for renderers, never affects control flow
    pub is_progress: bool,
    /// Overwrite the previously rendered line instead of appending
    pub replace_last: bool,
    pub timestamp: DateTime<Utc>,
}

impl CommandEvent {
    fn new(command_id: &CommandId, output: impl Into<String>, output_type: OutputType) -> Self {
        Self {
            command_id: command_id.clone(),
            output: output.into(),
            output_type,
            is_progress: false,
            replace_last: false,
            timestamp: Utc::now(),
        }
    }

    /// A complete line read from stdout or stderr, classified for progress
    pub fn line(command_id: &CommandId, output_type: OutputType, line: impl Into<String>) -> Self {
        let line = line.into();
        let is_progress = classify::is_progress(&line);
        Self {
            is_progress,
            ..Self::new(command_id, line, output_type)
        }
    }

    /// The unterminated tail of a stream, flushed when the process closes
    ///
    /// Always marked as a progress update that replaces the last line.
    pub fn partial(command_id: &CommandId, output_type: OutputType, text: impl Into<String>) -> Self {
        Self {
            is_progress: true,
            replace_last: true,
            ..Self::new(command_id, text, output_type)
        }
    }

    pub fn system(command_id: &CommandId, message: impl Into<String>) -> Self {
        Self::new(command_id, message, OutputType::System)
    }

    /// An error message surfaced on the stderr channel, never a progress line
    pub fn stderr(command_id: &CommandId, message: impl Into<String>) -> Self {
        Self::new(command_id, message, OutputType::Stderr)
    }

    /// The event a runner emits once its process has exited
    pub fn exit(command_id: &CommandId, exit_code: i32) -> Self {
        if exit_code == 0 {
            Self::new(
                command_id,
                "Command completed successfully (exit code 0)",
                OutputType::Success,
            )
        } else {
            Self::new(
                command_id,
                format!("Command failed with exit code {}", exit_code),
                OutputType::Error,
            )
        }
    }
}

/// Everything published on the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum DeployEvent {
    /// A line of output or a lifecycle message
    CommandOutput(CommandEvent),
    /// A deployment session finished
    #[serde(rename_all = "camelCase")]
    CommandComplete { command_id: CommandId, exit_code: i32 },
}

impl DeployEvent {
    pub fn command_id(&self) -> &CommandId {
        match self {
            DeployEvent::CommandOutput(event) => &event.command_id,
            DeployEvent::CommandComplete { command_id, .. } => command_id,
        }
    }
}

/// Publish-only destination for deploy events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DeployEvent);

    fn output(&self, event: CommandEvent) {
        self.emit(DeployEvent::CommandOutput(event));
    }

    fn complete(&self, command_id: &CommandId, exit_code: i32) {
        self.emit(DeployEvent::CommandComplete {
            command_id: command_id.clone(),
            exit_code,
        });
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: DeployEvent) {
        (**self).emit(event);
    }
}

impl EventSink for mpsc::UnboundedSender<DeployEvent> {
    fn emit(&self, event: DeployEvent) {
        // A dropped receiver just means nobody is watching any more
        let _ = self.send(event);
    }
}

/// Fan-out channel for any number of subscribers
///
/// Subscribers may attach and detach at any time. Publishing with nobody
/// attached is not an error.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<DeployEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeployEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for EventBroadcaster {
    fn emit(&self, event: DeployEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("deploy event dropped, no subscribers");
        }
    }
}
