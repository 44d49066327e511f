//! # Deployments
//!
//! Turns a `(git url, branch)` request into an ordered list of shell steps
//! and runs them one after another.
//!
//! ## Step Flow
//!
//! ```text
//! clone (fresh) | fetch --all (existing) → checkout → pull → install → build
//! ```

pub mod repo;
pub mod sequencer;
pub mod steps;

pub use repo::{
    ensure_repos_dir, list_repositories, repo_name_from_url, shell_quote, validate_branch,
    validate_request,
};
pub use sequencer::{CommandSequencer, DeploymentOutcome};
pub use steps::{plan_deployment, StepDescriptor};
