//! Control operations and their outcomes
//!
//! Each operation maps onto the engine host and answers with one of a
//! small set of outcomes. The HTTP layer only translates outcomes into
//! status codes.

use axum::http::StatusCode;
use flow_engine::{EngineMeta, ExecutionType, IterationId, LifecycleOutcome, ProjectDefinition};
use serde::{Deserialize, Serialize};

use crate::host::{EngineHost, HostError};

/// Result class of a control operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Conflict,
    NotFound,
    /// The request was understood but its values are unusable
    Invalid,
}

impl Outcome {
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::Conflict => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Invalid => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

/// Body returned by every control operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub outcome: Outcome,
    /// Id of the created step or link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Engine status after a lifecycle request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EngineMeta>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            outcome: Outcome::Ok,
            id: None,
            message: None,
            meta: None,
        }
    }

    pub fn created(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::ok()
        }
    }

    fn lifecycle(outcome: LifecycleOutcome) -> Self {
        Self {
            outcome: if outcome.accepted {
                Outcome::Ok
            } else {
                Outcome::Conflict
            },
            message: outcome.meta.diagnostic.clone(),
            meta: Some(outcome.meta),
            ..Self::ok()
        }
    }

    fn failed(error: HostError) -> Self {
        let outcome = if error.is_conflict() {
            Outcome::Conflict
        } else if error.is_not_found() {
            Outcome::NotFound
        } else {
            Outcome::Invalid
        };
        Self {
            outcome,
            message: Some(error.to_string()),
            ..Self::ok()
        }
    }

    fn refused(outcome: Outcome, message: String) -> Self {
        Self {
            outcome,
            message: Some(message),
            ..Self::ok()
        }
    }

    fn from_result<T>(result: Result<T, HostError>, into: impl FnOnce(T) -> Self) -> Self {
        match result {
            Ok(value) => into(value),
            Err(e) => {
                log::debug!("Control request refused: {}", e);
                Self::failed(e)
            }
        }
    }
}

/// Request body of `start`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub execution_type: ExecutionType,
}

/// Request body of `add-step`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStepRequest {
    pub step_type: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// Request body of `link`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub source_port_id: String,
    pub target_port_id: String,
}

/// Request body of `set-port-value`
#[derive(Debug, Clone, Deserialize)]
pub struct SetValueRequest {
    pub value: serde_json::Value,
}

/// Body returned by `snapshots`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotList {
    /// Oldest first
    pub iterations: Vec<IterationId>,
}

pub async fn start(host: &EngineHost, request: StartRequest) -> CommandResponse {
    CommandResponse::lifecycle(host.start_run(request.execution_type).await)
}

pub async fn stop(host: &EngineHost) -> CommandResponse {
    CommandResponse::lifecycle(host.stop_run().await)
}

pub async fn abort(host: &EngineHost) -> CommandResponse {
    CommandResponse::lifecycle(host.abort_run().await)
}

pub async fn status(host: &EngineHost) -> EngineMeta {
    host.status().await
}

pub async fn add_step(host: &EngineHost, request: AddStepRequest) -> CommandResponse {
    let result = host.add_step(&request.step_type, request.x, request.y).await;
    CommandResponse::from_result(result, CommandResponse::created)
}

pub async fn remove_step(host: &EngineHost, step_id: &str) -> CommandResponse {
    CommandResponse::from_result(host.remove_step(step_id).await, |()| CommandResponse::ok())
}

pub async fn link(host: &EngineHost, request: LinkRequest) -> CommandResponse {
    let result = host
        .link(&request.source_port_id, &request.target_port_id)
        .await;
    CommandResponse::from_result(result, CommandResponse::created)
}

pub async fn unlink(host: &EngineHost, link_id: &str) -> CommandResponse {
    CommandResponse::from_result(host.unlink(link_id).await, |()| CommandResponse::ok())
}

pub async fn set_port_value(host: &EngineHost, port_id: &str, request: SetValueRequest) -> CommandResponse {
    let result = host.set_port_value(port_id, &request.value).await;
    CommandResponse::from_result(result, |()| CommandResponse::ok())
}

pub fn snapshots(host: &EngineHost) -> SnapshotList {
    SnapshotList {
        iterations: host.snapshot_iterations(),
    }
}

/// Project definition cached for an iteration
pub fn snapshot(host: &EngineHost, iteration_id: &str) -> Result<ProjectDefinition, CommandResponse> {
    let iteration_id: IterationId = iteration_id.parse().map_err(|e| {
        CommandResponse::refused(Outcome::Invalid, format!("Invalid iteration id: {}", e))
    })?;
    match host.snapshot(iteration_id) {
        Some(Ok(definition)) => Ok(definition),
        Some(Err(e)) => {
            log::error!("Cached snapshot of iteration {} is unreadable: {}", iteration_id, e);
            Err(CommandResponse::refused(Outcome::Invalid, e.to_string()))
        }
        None => Err(CommandResponse::refused(
            Outcome::NotFound,
            format!("No snapshot cached for iteration {}", iteration_id),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::log_host;
    use flow_engine::{EngineState, Project};

    #[tokio::test]
    async fn test_lifecycle_outcomes() {
        let host = log_host();
        let response = stop(&host).await;
        assert_eq!(response.outcome, Outcome::Conflict);
        assert_eq!(response.meta.unwrap().state, EngineState::Idle);

        assert!(host.try_activate_project(Project::new("p", "P")).await);
        let response = start(
            &host,
            StartRequest {
                execution_type: ExecutionType::SingleRun,
            },
        )
        .await;
        assert_eq!(response.outcome, Outcome::Ok);
        assert_eq!(status(&host).await.execution_type, Some(ExecutionType::SingleRun));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_edit_outcomes() {
        let host = log_host();
        let missing = remove_step(&host, "a").await;
        assert_eq!(missing.outcome, Outcome::NotFound);

        assert!(host.try_activate_project(Project::new("p", "P")).await);
        let created = add_step(
            &host,
            AddStepRequest {
                step_type: "constant".to_string(),
                x: 10.0,
                y: 20.0,
            },
        )
        .await;
        assert_eq!(created.outcome, Outcome::Ok);
        let step_id = created.id.unwrap();

        let port_id = format!("{}/value", step_id);
        let bad = set_port_value(
            &host,
            &port_id,
            SetValueRequest {
                value: serde_json::json!("not a number"),
            },
        )
        .await;
        assert_eq!(bad.outcome, Outcome::Invalid);
        assert!(bad.message.is_some());

        let good = set_port_value(
            &host,
            &port_id,
            SetValueRequest {
                value: serde_json::json!(3),
            },
        )
        .await;
        assert_eq!(good.outcome, Outcome::Ok);

        assert_eq!(unlink(&host, "nope").await.outcome, Outcome::NotFound);
        assert_eq!(remove_step(&host, &step_id).await.outcome, Outcome::Ok);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_outcomes() {
        let host = log_host();
        assert!(snapshots(&host).iterations.is_empty());

        let bad = snapshot(&host, "not-a-uuid").unwrap_err();
        assert_eq!(bad.outcome, Outcome::Invalid);
        let missing = snapshot(&host, &uuid::Uuid::new_v4().to_string()).unwrap_err();
        assert_eq!(missing.outcome, Outcome::NotFound);

        assert!(host.try_activate_project(Project::new("p", "Cached")).await);
        let started = start(
            &host,
            StartRequest {
                execution_type: ExecutionType::SingleRun,
            },
        )
        .await;
        assert_eq!(started.outcome, Outcome::Ok);
        host.wait_until_settled().await;

        let listed = snapshots(&host).iterations;
        assert_eq!(listed.len(), 1);
        let definition = snapshot(&host, &listed[0].to_string()).unwrap();
        assert_eq!(definition.name, "Cached");
        host.shutdown().await;
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Outcome::Ok.status_code(), StatusCode::OK);
        assert_eq!(Outcome::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(Outcome::NotFound.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_request_shapes() {
        let start: StartRequest =
            serde_json::from_value(serde_json::json!({"executionType": "continuous_run"})).unwrap();
        assert_eq!(start.execution_type, ExecutionType::ContinuousRun);

        let link: LinkRequest = serde_json::from_value(serde_json::json!({
            "sourcePortId": "a/value",
            "targetPortId": "b/in"
        }))
        .unwrap();
        assert_eq!(link.target_port_id, "b/in");
    }
}
