//! # Command Sequencer
//!
//! Runs the steps of one deployment strictly in order under a single
//! [`CommandId`], stopping at the first failure.
//!
//! Every step of a session shares the same id so subscribers can correlate
//! all of its output. A session always ends with exactly one
//! `commandComplete` event: exit code 0 when every step succeeded, 1
//! otherwise, preceded by a `stderr` event carrying the error message.

use std::sync::Arc;

use serde::Serialize;

use crate::config::DeployConfig;
use crate::error::CommandError;
use crate::events::{CommandEvent, CommandId, EventSink};
use crate::process::{ProcessRegistry, ProcessRunner, StepRunner};

use super::repo::validate_request;
use super::steps::{plan_deployment, StepDescriptor};

/// Result of one deployment session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOutcome {
    pub success: bool,
    pub command_id: CommandId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Orchestrates clone/fetch, checkout, pull, install and build
pub struct CommandSequencer {
    config: DeployConfig,
    runner: Arc<dyn StepRunner>,
    sink: Arc<dyn EventSink>,
}

impl CommandSequencer {
    pub fn new(config: DeployConfig, runner: Arc<dyn StepRunner>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            runner,
            sink,
        }
    }

    /// Sequencer backed by a real [`ProcessRunner`] sharing `sink`
    pub fn with_process_runner(
        config: DeployConfig,
        registry: Arc<ProcessRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let runner = Arc::new(ProcessRunner::new(registry, sink.clone()));
        Self::new(config, runner, sink)
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Deploy under a freshly generated command id
    pub async fn deploy(&self, git_url: &str, branch: &str) -> DeploymentOutcome {
        self.deploy_with_id(CommandId::generate(), git_url, branch)
            .await
    }

    /// Deploy `branch` of `git_url`, streaming everything under `command_id`
    ///
    /// Never returns early without a `commandComplete` event; the outcome
    /// mirrors what subscribers saw.
    #[tracing::instrument(skip(self, command_id), fields(command_id = %command_id))]
    pub async fn deploy_with_id(
        &self,
        command_id: CommandId,
        git_url: &str,
        branch: &str,
    ) -> DeploymentOutcome {
        self.sink.output(CommandEvent::system(
            &command_id,
            format!("Starting deployment of {} (branch: {})", git_url, branch),
        ));

        match self.run_sequence(&command_id, git_url, branch).await {
            Ok(()) => {
                tracing::info!("deployment completed");
                self.sink.complete(&command_id, 0);
                DeploymentOutcome {
                    success: true,
                    command_id,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "deployment failed");
                let message = e.to_string();
                self.sink.output(CommandEvent::stderr(&command_id, message.clone()));
                self.sink.complete(&command_id, 1);
                DeploymentOutcome {
                    success: false,
                    command_id,
                    error: Some(message),
                }
            }
        }
    }

    /// Validate the request and work out which steps a deployment needs
    pub async fn plan(&self, git_url: &str, branch: &str) -> Result<Vec<StepDescriptor>, CommandError> {
        let repo_name = validate_request(git_url, branch)?;

        let repo_dir = self.config.repo_path(&repo_name);
        let repo_exists = tokio::fs::metadata(&repo_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        Ok(plan_deployment(
            &self.config,
            git_url.trim(),
            branch,
            &repo_name,
            repo_exists,
        ))
    }

    async fn run_sequence(
        &self,
        command_id: &CommandId,
        git_url: &str,
        branch: &str,
    ) -> Result<(), CommandError> {
        let steps = self.plan(git_url, branch).await?;
        tokio::fs::create_dir_all(&self.config.repos_dir).await?;

        for step in &steps {
            tracing::info!(step = %step.name, command = %step.command, "running deployment step");
            self.runner
                .run_step(step, command_id)
                .await
                .map_err(|source| CommandError::SequenceAborted {
                    step: step.name.clone(),
                    source: Box::new(source),
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DeployEvent, OutputType};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Records the steps it is asked to run and fails the named one
    struct ScriptedRunner {
        sink: Arc<dyn EventSink>,
        fail_on: Option<&'static str>,
        ran: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StepRunner for ScriptedRunner {
        async fn run_step(&self, step: &StepDescriptor, command_id: &CommandId) -> Result<i32, CommandError> {
            self.ran.lock().unwrap().push(step.name.clone());
            if let Some(description) = &step.description {
                self.sink.output(CommandEvent::system(command_id, description.as_str()));
            }
            self.sink
                .output(CommandEvent::line(command_id, OutputType::Stdout, step.command.as_str()));

            if self.fail_on == Some(step.name.as_str()) {
                self.sink.output(CommandEvent::exit(command_id, 1));
                Err(CommandError::NonZeroExit { code: 1 })
            } else {
                self.sink.output(CommandEvent::exit(command_id, 0));
                Ok(0)
            }
        }
    }

    struct Harness {
        sequencer: CommandSequencer,
        runner: Arc<ScriptedRunner>,
        rx: mpsc::UnboundedReceiver<DeployEvent>,
        _root: tempfile::TempDir,
        config: DeployConfig,
    }

    fn harness(fail_on: Option<&'static str>) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let config = DeployConfig {
            repos_dir: root.path().join("repos"),
            ..DeployConfig::default()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(tx);
        let runner = Arc::new(ScriptedRunner {
            sink: sink.clone(),
            fail_on,
            ran: Mutex::new(Vec::new()),
        });
        let sequencer = CommandSequencer::new(config.clone(), runner.clone(), sink);
        Harness {
            sequencer,
            runner,
            rx,
            _root: root,
            config,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DeployEvent>) -> Vec<DeployEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_fresh_deploy_runs_every_step() {
        let mut h = harness(None);

        let outcome = h
            .sequencer
            .deploy("https://example.com/acme/site.git", "main")
            .await;

        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert_eq!(
            *h.runner.ran.lock().unwrap(),
            vec![
                "Clone repository",
                "Checkout branch",
                "Pull branch",
                "Install dependencies",
                "Build project"
            ]
        );

        let events = drain(&mut h.rx);
        assert!(events.iter().all(|e| e.command_id() == &outcome.command_id));
        match events.first() {
            Some(DeployEvent::CommandOutput(first)) => {
                assert_eq!(first.output_type, OutputType::System);
                assert!(first.output.contains("Starting deployment"));
            }
            other => panic!("unexpected first event: {:?}", other),
        }
        assert!(matches!(
            events.last(),
            Some(DeployEvent::CommandComplete { exit_code: 0, .. })
        ));
        // Repository root is bootstrapped for the clone step
        assert!(h.config.repos_dir.is_dir());
    }

    #[tokio::test]
    async fn test_existing_repository_is_fetched() {
        let h = harness(None);
        tokio::fs::create_dir_all(h.config.repo_path("site"))
            .await
            .unwrap();

        let outcome = h.sequencer.deploy("git@example.com:acme/site.git", "dev").await;

        assert!(outcome.success);
        assert_eq!(h.runner.ran.lock().unwrap()[0], "Fetch updates");
    }

    #[tokio::test]
    async fn test_install_failure_skips_build() {
        let mut h = harness(Some("Install dependencies"));

        let outcome = h
            .sequencer
            .deploy("https://example.com/acme/site.git", "main")
            .await;

        assert!(!outcome.success);
        let ran = h.runner.ran.lock().unwrap().clone();
        assert!(!ran.iter().any(|s| s == "Build project"));
        assert_eq!(ran.last().map(String::as_str), Some("Install dependencies"));

        let error = outcome.error.unwrap();
        assert!(error.contains("Install dependencies"));
        assert!(error.contains("exit code 1"));

        let events = drain(&mut h.rx);
        let n = events.len();
        match &events[n - 2] {
            DeployEvent::CommandOutput(event) => {
                assert_eq!(event.output_type, OutputType::Stderr);
                assert_eq!(event.output, error);
            }
            other => panic!("expected stderr event, got {:?}", other),
        }
        assert!(matches!(
            events[n - 1],
            DeployEvent::CommandComplete { exit_code: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_request_spawns_nothing() {
        let mut h = harness(None);

        let outcome = h
            .sequencer
            .deploy("https://example.com/acme/site.git", "--upload-pack=touch")
            .await;

        assert!(!outcome.success);
        assert!(h.runner.ran.lock().unwrap().is_empty());

        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events.last(),
            Some(DeployEvent::CommandComplete { exit_code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_plan_validates_url() {
        let h = harness(None);

        let err = h.sequencer.plan("   ", "main").await.unwrap_err();
        assert!(err.is_invalid_input());

        let err = h
            .sequencer
            .plan("https://example.com/acme/.git", "main")
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());

        let steps = h.sequencer.plan("https://example.com/acme/site", "main").await.unwrap();
        assert_eq!(steps.len(), 5);
    }
}
