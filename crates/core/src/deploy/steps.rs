//! Step planning for a deployment.
//!
//! Each step is one atomic shell command, so a failure is attributed to
//! exactly one step instead of a `&&` chain.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::DeployConfig;

use super::repo::shell_quote;

/// One link in a deployment sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDescriptor {
    /// Short name used in error messages ("Install dependencies")
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    /// Announced as a system event before the command starts
    pub description: Option<String>,
}

impl StepDescriptor {
    pub fn new(name: &str, command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            command: command.into(),
            working_dir: working_dir.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Build the ordered steps for deploying `branch` of `git_url`
///
/// A repository that is not checked out yet is cloned into the shared root;
/// an existing one is fetched. Checkout, pull, install and build follow.
pub fn plan_deployment(
    config: &DeployConfig,
    git_url: &str,
    branch: &str,
    repo_name: &str,
    repo_exists: bool,
) -> Vec<StepDescriptor> {
    let git = &config.git_command;
    let repo_dir = config.repo_path(repo_name);
    let quoted_branch = shell_quote(branch);

    let mut steps = Vec::with_capacity(5);

    if repo_exists {
        steps.push(
            StepDescriptor::new("Fetch updates", format!("{} fetch --all", git), &repo_dir)
                .with_description(format!("Fetching latest changes for {}...", repo_name)),
        );
    } else {
        steps.push(
            StepDescriptor::new(
                "Clone repository",
                format!("{} clone {} {}", git, shell_quote(git_url), shell_quote(repo_name)),
                &config.repos_dir,
            )
            .with_description(format!("Cloning {} into {}...", git_url, repo_name)),
        );
    }

    steps.push(
        StepDescriptor::new(
            "Checkout branch",
            format!("{} checkout {}", git, quoted_branch),
            &repo_dir,
        )
        .with_description(format!("Checking out branch {}...", branch)),
    );

    steps.push(
        StepDescriptor::new(
            "Pull branch",
            format!("{} pull origin {}", git, quoted_branch),
            &repo_dir,
        )
        .with_description(format!("Pulling latest changes from origin/{}...", branch)),
    );

    steps.push(
        StepDescriptor::new("Install dependencies", config.install_command.as_str(), &repo_dir)
            .with_description(format!("Installing dependencies ({})...", config.install_command)),
    );

    steps.push(
        StepDescriptor::new("Build project", config.build_command.as_str(), &repo_dir)
            .with_description(format!("Building project ({})...", config.build_command)),
    );

    steps
}
