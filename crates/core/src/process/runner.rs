//! # Process Runner
//!
//! Runs one external command through the platform shell and turns its two
//! output pipes into [`CommandEvent`]s.
//!
//! Each pipe gets its own [`LineBuffer`], so interleaving between stdout and
//! stderr is harmless while order within one pipe is preserved. Complete
//! lines are emitted as they arrive; the unterminated tail of each pipe is
//! emitted once, when the pipe closes, as a replace-last progress update.
//! A process stopped through the registry emits nothing after the stop.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::deploy::StepDescriptor;
use crate::error::CommandError;
use crate::events::{CommandEvent, CommandId, EventSink, OutputType};
use crate::stream::{LineBuffer, Utf8Decoder};

use super::registry::{ProcessHandle, ProcessRegistry};

/// Hints that make CLIs keep colours and progress bars when writing to a pipe
const FORCE_COLOR_ENV: &[(&str, &str)] = &[("FORCE_COLOR", "1"), ("CLICOLOR_FORCE", "1")];

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Something that can execute one step of a deployment
///
/// [`ProcessRunner`] is the real implementation; the sequencer only sees this
/// trait, which keeps it testable without spawning processes.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run the step to completion, resolving with exit code 0 on success
    async fn run_step(&self, step: &StepDescriptor, command_id: &CommandId) -> Result<i32, CommandError>;
}

/// Spawns shell commands and streams their output
#[derive(Clone)]
pub struct ProcessRunner {
    registry: Arc<ProcessRegistry>,
    sink: Arc<dyn EventSink>,
}

impl ProcessRunner {
    pub fn new(registry: Arc<ProcessRegistry>, sink: Arc<dyn EventSink>) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Run `command` in `working_dir` and stream its output under `command_id`
    ///
    /// Resolves with `Ok(0)` when the process exits successfully. A non-zero
    /// exit emits an `error` event and returns [`CommandError::NonZeroExit`].
    /// A spawn failure returns [`CommandError::Spawn`] without emitting any
    /// terminal event. A process killed through the registry returns
    /// [`CommandError::Cancelled`], also without a terminal event, and so
    /// does any run attempted after the registry has been shut down.
    pub async fn run(
        &self,
        command: &str,
        working_dir: &Path,
        command_id: &CommandId,
        description: Option<&str>,
    ) -> Result<i32, CommandError> {
        if self.registry.is_closed() {
            tracing::info!(command_id = %command_id, command, "registry closed, not starting");
            return Err(CommandError::Cancelled);
        }

        if let Some(description) = description {
            self.sink.output(CommandEvent::system(command_id, description));
        }

        let mut child = shell_command(command)
            .current_dir(working_dir)
            .envs(FORCE_COLOR_ENV.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        // Register before touching the pipes so a stop request can always
        // find the process, however quickly it fails. Registration also
        // fails if a shutdown raced the spawn; kill_on_drop reaps the child.
        let handle = ProcessHandle::new(command_id.clone(), child.id());
        let serial = handle.serial();
        let cancel = handle.cancellation();
        if let Err(e) = self.registry.register(handle) {
            let _ = child.start_kill();
            return Err(e);
        }
        tracing::debug!(command_id = %command_id, pid = ?child.id(), command, "process spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let wait = async {
            tokio::select! {
                status = child.wait() => (status, false),
                _ = cancel.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(command_id = %command_id, error = %e, "failed to kill process");
                    }
                    (child.wait().await, true)
                }
            }
        };

        let sink: &dyn EventSink = self.sink.as_ref();
        let (_, _, (status, killed)) = tokio::join!(
            pump(stdout, OutputType::Stdout, command_id, sink, &cancel),
            pump(stderr, OutputType::Stderr, command_id, sink, &cancel),
            wait,
        );

        self.registry.release(command_id, serial);

        if killed {
            tracing::info!(command_id = %command_id, command, "process stopped");
            return Err(CommandError::Cancelled);
        }

        let code = exit_code(status?);
        self.sink.output(CommandEvent::exit(command_id, code));

        if code == 0 {
            Ok(code)
        } else {
            tracing::warn!(command_id = %command_id, command, code, "process exited with failure");
            Err(CommandError::NonZeroExit { code })
        }
    }
}

#[async_trait]
impl StepRunner for ProcessRunner {
    async fn run_step(&self, step: &StepDescriptor, command_id: &CommandId) -> Result<i32, CommandError> {
        self.run(
            &step.command,
            &step.working_dir,
            command_id,
            step.description.as_deref(),
        )
        .await
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

/// Processes killed by a signal have no exit code
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Read one pipe until it closes (or the process is stopped), emitting lines
///
/// The trailing partial line is only flushed when the pipe closed on its own.
async fn pump<R>(
    reader: Option<R>,
    output_type: OutputType,
    command_id: &CommandId,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };

    let mut decoder = Utf8Decoder::new();
    let mut lines = LineBuffer::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    let emit_lines = |completed: Vec<String>| {
        for line in completed {
            sink.output(CommandEvent::line(command_id, output_type, line));
        }
    };

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => emit_lines(lines.push(&decoder.decode(&buf[..n]))),
            Err(e) => {
                tracing::warn!(command_id = %command_id, ?output_type, error = %e, "failed reading process output");
                break;
            }
        }
    }

    if cancel.is_cancelled() {
        return;
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        emit_lines(lines.push(&tail));
    }

    if let Some(partial) = lines.flush() {
        sink.output(CommandEvent::partial(command_id, output_type, partial));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::events::DeployEvent;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn runner() -> (ProcessRunner, Arc<ProcessRegistry>, mpsc::UnboundedReceiver<DeployEvent>) {
        let registry = Arc::new(ProcessRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        (ProcessRunner::new(registry.clone(), Arc::new(tx)), registry, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DeployEvent>) -> Vec<CommandEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DeployEvent::CommandOutput(event) = event {
                events.push(event);
            }
        }
        events
    }

    fn outputs(events: &[CommandEvent], output_type: OutputType) -> Vec<&str> {
        events
            .iter()
            .filter(|e| e.output_type == output_type)
            .map(|e| e.output.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_streams_both_pipes_then_success() {
        let (runner, registry, mut rx) = runner();
        let id = CommandId::from("ok");

        let code = runner
            .run("printf 'one\\ntwo\\n'; printf 'oops\\n' >&2", Path::new("."), &id, None)
            .await
            .unwrap();

        assert_eq!(code, 0);
        let events = drain(&mut rx);
        assert_eq!(outputs(&events, OutputType::Stdout), vec!["one", "two"]);
        assert_eq!(outputs(&events, OutputType::Stderr), vec!["oops"]);

        let last = events.last().unwrap();
        assert_eq!(last.output_type, OutputType::Success);
        assert!(events.iter().all(|e| e.command_id == id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_blank_lines_are_kept() {
        let (runner, _, mut rx) = runner();
        let id = CommandId::from("blank");

        runner
            .run("printf 'a\\n\\nb\\r\\nc\\n'", Path::new("."), &id, None)
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(outputs(&events, OutputType::Stdout), vec!["a", "", "b", "c"]);
    }

    #[tokio::test]
    async fn test_description_comes_first() {
        let (runner, _, mut rx) = runner();
        let id = CommandId::from("desc");

        runner
            .run("echo hi", Path::new("."), &id, Some("Saying hi..."))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events[0].output_type, OutputType::System);
        assert_eq!(events[0].output, "Saying hi...");
    }

    #[tokio::test]
    async fn test_trailing_partial_flushed_as_progress() {
        let (runner, _, mut rx) = runner();
        let id = CommandId::from("progress");

        runner
            .run("printf 'Downloading 10%%\\rall done'", Path::new("."), &id, None)
            .await
            .unwrap();

        let events = drain(&mut rx);
        let stdout: Vec<&CommandEvent> = events
            .iter()
            .filter(|e| e.output_type == OutputType::Stdout)
            .collect();

        assert_eq!(stdout.len(), 2);
        assert_eq!(stdout[0].output, "Downloading 10%");
        assert!(stdout[0].is_progress);
        assert!(!stdout[0].replace_last);

        // Leftover text is always a replace-last progress update
        assert_eq!(stdout[1].output, "all done");
        assert!(stdout[1].is_progress);
        assert!(stdout[1].replace_last);

        // Flushed before the terminal event
        assert_eq!(events.last().unwrap().output_type, OutputType::Success);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let (runner, registry, mut rx) = runner();
        let id = CommandId::from("fail");

        let err = runner
            .run("echo nope >&2; exit 3", Path::new("."), &id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::NonZeroExit { code: 3 }));
        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.output_type, OutputType::Error);
        assert!(last.output.contains('3'));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_error_emits_no_terminal_event() {
        let (runner, registry, mut rx) = runner();
        let id = CommandId::from("spawn");

        let err = runner
            .run("echo unreachable", Path::new("/definitely/not/a/dir"), &id, Some("Trying..."))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Spawn { .. }));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].output_type, OutputType::System);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stop_cancels_running_process() {
        let (runner, registry, mut rx) = runner();
        let id = CommandId::from("long");

        let task = {
            let runner = runner.clone();
            let id = id.clone();
            tokio::spawn(async move { runner.run("sleep 30", Path::new("."), &id, None).await })
        };

        // Wait for registration
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while registry.get(&id).is_none() {
            assert!(tokio::time::Instant::now() < deadline, "process never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        registry.stop(&id).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner should return promptly after stop")
            .unwrap();

        assert!(matches!(result, Err(CommandError::Cancelled)));
        assert!(registry.is_empty());
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .all(|e| !matches!(e.output_type, OutputType::Success | OutputType::Error)));
    }

    #[tokio::test]
    async fn test_stopped_process_does_not_flush_partial_line() {
        let (runner, registry, mut rx) = runner();
        let id = CommandId::from("half");

        let task = {
            let runner = runner.clone();
            let id = id.clone();
            tokio::spawn(async move {
                runner
                    .run("printf 'half a line'; sleep 30", Path::new("."), &id, None)
                    .await
            })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while registry.get(&id).is_none() {
            assert!(tokio::time::Instant::now() < deadline, "process never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Give the shell time to write the partial line into the pipe
        tokio::time::sleep(Duration::from_millis(200)).await;

        registry.stop(&id).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner should return promptly after stop")
            .unwrap();

        assert!(matches!(result, Err(CommandError::Cancelled)));
        let events = drain(&mut rx);
        assert!(outputs(&events, OutputType::Stdout).is_empty());
    }

    #[tokio::test]
    async fn test_closed_registry_refuses_to_start() {
        let (runner, registry, mut rx) = runner();
        registry.kill_all();

        let err = runner
            .run("echo too late", Path::new("."), &CommandId::from("late"), Some("Starting..."))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Cancelled));
        assert!(drain(&mut rx).is_empty());
        assert!(registry.is_empty());
    }
}
