//! Repository naming, request validation and the shared repository root.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::CommandError;

/// Repository name from the final path segment of a git URL
///
/// Handles `https://host/org/repo.git`, `git@host:org/repo.git`, trailing
/// slashes, and URLs without the `.git` suffix.
pub fn repo_name_from_url(git_url: &str) -> Option<String> {
    let trimmed = git_url.trim().trim_end_matches('/');
    let segment = trimmed.rsplit(['/', ':']).next()?;
    let name = segment.strip_suffix(".git").unwrap_or(segment);

    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Reject branch names that could be mistaken for options or break quoting
pub fn validate_branch(branch: &str) -> Result<(), CommandError> {
    if branch.is_empty() {
        return Err(CommandError::InvalidInput("branch must not be empty".to_string()));
    }
    if branch.starts_with('-') {
        return Err(CommandError::InvalidInput(format!(
            "branch '{}' must not start with '-'",
            branch
        )));
    }
    if branch.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CommandError::InvalidInput(format!(
            "branch '{}' contains whitespace or control characters",
            branch.escape_debug()
        )));
    }
    Ok(())
}

/// Check a deploy request and return the repository name it targets
pub fn validate_request(git_url: &str, branch: &str) -> Result<String, CommandError> {
    if git_url.trim().is_empty() {
        return Err(CommandError::InvalidInput("git URL must not be empty".to_string()));
    }
    validate_branch(branch)?;
    repo_name_from_url(git_url).ok_or_else(|| {
        CommandError::InvalidInput(format!("cannot derive a repository name from '{}'", git_url))
    })
}

/// Quote a value for interpolation into a POSIX shell command
#[cfg(not(windows))]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quote a value for interpolation into a `cmd /C` command line
///
/// `cmd` keeps single quotes literally, so arguments go in double quotes
/// with embedded ones backslash-escaped for the program's argv parser.
#[cfg(windows)]
pub fn shell_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

/// Create the shared repository root if needed
pub async fn ensure_repos_dir(root: &Path) -> Result<PathBuf, CommandError> {
    fs::create_dir_all(root).await?;
    Ok(root.to_path_buf())
}

/// Names of the directories under the repository root, sorted
///
/// A root that does not exist yet has no repositories.
pub async fn list_repositories(root: &Path) -> Result<Vec<String>, CommandError> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut repos = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Ok(file_type) = entry.file_type().await {
            if file_type.is_dir() {
                if let Ok(name) = entry.file_name().into_string() {
                    repos.push(name);
                }
            }
        }
    }

    repos.sort();
    Ok(repos)
}
