//! # Deploy API
//!
//! Endpoints that trigger and stop deployments and list checked-out
//! repositories.

use axum::{extract::State, http::StatusCode, Json};
use launchpad_core::deploy::{list_repositories, validate_request};
use launchpad_core::{CommandError, CommandId, DeploymentOutcome};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::SharedState;

fn default_branch() -> String {
    "main".to_string()
}

/// Request to deploy a branch of a repository
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub git_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DeploymentOutcome> for DeployResponse {
    fn from(outcome: DeploymentOutcome) -> Self {
        Self {
            success: outcome.success,
            command_id: Some(outcome.command_id.to_string()),
            error: outcome.error,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub command_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReposResponse {
    pub repos: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Deploy a repository branch and wait for the outcome
///
/// Output streams live on `/api/events` and `/api/ws` under the returned
/// command id while the request is in flight. An invalid URL or branch is
/// answered with 400 before any session starts, so nothing is streamed.
#[utoipa::path(
    post,
    path = "/api/deploy",
    tag = "deploy",
    request_body = DeployRequest,
    responses(
        (status = 200, description = "Deployment succeeded", body = DeployResponse),
        (status = 400, description = "Invalid git URL or branch", body = DeployResponse),
        (status = 500, description = "A deployment step failed", body = DeployResponse)
    )
)]
pub async fn deploy(
    State(state): State<SharedState>,
    Json(req): Json<DeployRequest>,
) -> (StatusCode, Json<DeployResponse>) {
    if let Err(e) = validate_request(&req.git_url, &req.branch) {
        return (
            StatusCode::BAD_REQUEST,
            Json(DeployResponse {
                success: false,
                command_id: None,
                error: Some(e.to_string()),
            }),
        );
    }

    tracing::info!(git_url = %req.git_url, branch = %req.branch, "deploy requested");
    let outcome = state.sequencer.deploy(&req.git_url, &req.branch).await;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(outcome.into()))
}

/// Stop the process currently running for a deployment
#[utoipa::path(
    post,
    path = "/api/stop",
    tag = "deploy",
    request_body = StopRequest,
    responses(
        (status = 200, description = "Process stopped", body = StopResponse),
        (status = 404, description = "No running process for that command id", body = StopResponse)
    )
)]
pub async fn stop(
    State(state): State<SharedState>,
    Json(req): Json<StopRequest>,
) -> (StatusCode, Json<StopResponse>) {
    match state.registry.stop(&CommandId::from(req.command_id)) {
        Ok(()) => (
            StatusCode::OK,
            Json(StopResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e @ CommandError::ProcessNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(StopResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StopResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// List repositories checked out under the repository root
#[utoipa::path(
    get,
    path = "/api/repos",
    tag = "repos",
    responses(
        (status = 200, description = "Repository directory names", body = ReposResponse),
        (status = 500, description = "Repository root unreadable", body = ErrorResponse)
    )
)]
pub async fn list_repos(
    State(state): State<SharedState>,
) -> Result<Json<ReposResponse>, (StatusCode, Json<ErrorResponse>)> {
    let root = &state.sequencer.config().repos_dir;
    match list_repositories(root).await {
        Ok(repos) => Ok(Json(ReposResponse { repos })),
        Err(e) => {
            tracing::error!(root = %root.display(), error = %e, "failed to list repositories");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    error: e.to_string(),
                }),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppState;
    use launchpad_core::{CommandSequencer, DeployConfig, EventBroadcaster, ProcessRegistry};
    use std::sync::Arc;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio_util::sync::CancellationToken;

    fn state() -> SharedState {
        let broadcaster = Arc::new(EventBroadcaster::new(16));
        let registry = Arc::new(ProcessRegistry::new());
        let sequencer = CommandSequencer::with_process_runner(
            DeployConfig::default(),
            registry.clone(),
            broadcaster.clone(),
        );
        Arc::new(AppState {
            sequencer,
            registry,
            broadcaster,
            shutdown: CancellationToken::new(),
        })
    }

    #[tokio::test]
    async fn test_invalid_deploy_is_rejected_without_a_session() {
        let state = state();
        let mut events = state.broadcaster.subscribe();

        let (status, Json(response)) = deploy(
            State(state.clone()),
            Json(DeployRequest {
                git_url: "https://example.com/acme/site.git".to_string(),
                branch: "--upload-pack=touch".to_string(),
            }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!response.success);
        assert!(response.command_id.is_none());
        assert!(response.error.is_some());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_stop_unknown_command_is_not_found() {
        let (status, Json(response)) = stop(
            State(state()),
            Json(StopRequest {
                command_id: "missing".to_string(),
            }),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!response.success);
    }

    #[test]
    fn test_deploy_request_defaults_branch() {
        let req: DeployRequest =
            serde_json::from_str(r#"{"gitUrl": "https://example.com/a/b.git"}"#).unwrap();
        assert_eq!(req.git_url, "https://example.com/a/b.git");
        assert_eq!(req.branch, "main");
    }

    #[test]
    fn test_deploy_response_from_outcome() {
        let response: DeployResponse = DeploymentOutcome {
            success: false,
            command_id: CommandId::from("7-0"),
            error: Some("Build project failed".to_string()),
        }
        .into();

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["commandId"], "7-0");
        assert_eq!(json["error"], "Build project failed");
    }
}
