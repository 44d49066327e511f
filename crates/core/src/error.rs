//! # Command Errors
//!
//! Every failure the core can surface to a caller.

use std::io;

use crate::events::CommandId;

/// Errors produced while running or managing deployment commands
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The shell could not be started (bad working directory, missing shell, ...)
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The command ran to completion and exited unsuccessfully
    #[error("Command failed with exit code {code}")]
    NonZeroExit { code: i32 },

    /// The process was killed through the registry before it finished
    #[error("Command was stopped before it finished")]
    Cancelled,

    /// A step failed, so the remaining steps of the sequence were skipped
    #[error("{step} failed: {source}")]
    SequenceAborted {
        step: String,
        #[source]
        source: Box<CommandError>,
    },

    /// Stop requested for an id with no live process
    #[error("No running process found for command {0}")]
    ProcessNotFound(CommandId),

    /// A second process was registered under an id that is still live
    #[error("A process is already running for command {0}")]
    AlreadyRunning(CommandId),

    /// Deploy request rejected before anything was spawned
    #[error("Invalid deploy request: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CommandError {
    /// Exit code carried by this error, if the process actually ran
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::NonZeroExit { code } => Some(*code),
            CommandError::SequenceAborted { source, .. } => source.exit_code(),
            _ => None,
        }
    }

    /// True for errors caused by the request itself rather than a process
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, CommandError::InvalidInput(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_aborted_names_step_and_code() {
        let err = CommandError::SequenceAborted {
            step: "Install dependencies".to_string(),
            source: Box::new(CommandError::NonZeroExit { code: 2 }),
        };

        assert_eq!(
            err.to_string(),
            "Install dependencies failed: Command failed with exit code 2"
        );
        assert_eq!(err.exit_code(), Some(2));
    }

    #[test]
    fn test_process_not_found_message() {
        let err = CommandError::ProcessNotFound(CommandId::from("abc-1"));
        assert_eq!(err.to_string(), "No running process found for command abc-1");
        assert_eq!(err.exit_code(), None);
    }
}
