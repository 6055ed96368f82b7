//! Notification sink for state changes and result signals
//!
//! Notifications are best-effort. Handlers are called on the engine loop,
//! so implementations must not block: the HTTP notifier spawns its request
//! and returns immediately.

use std::time::Duration;

use flow_engine::{EngineMeta, IterationId};
use serde::Serialize;
use thiserror::Error;

/// Errors handing off a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to build notifier client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("No async runtime available to send notification")]
    NoRuntime,
}

/// Receiver of engine notifications
pub trait Notifier: Send + Sync {
    /// The engine moved to a new state
    fn state_changed(&self, meta: &EngineMeta) -> Result<(), NotifyError>;

    /// Results of an iteration were handed to the drain
    fn result_available(&self, iteration_id: IterationId) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum Notification<'a> {
    #[serde(rename_all = "camelCase")]
    StateChanged { agent_id: &'a str, meta: &'a EngineMeta },
    #[serde(rename_all = "camelCase")]
    ResultAvailable {
        agent_id: &'a str,
        iteration_id: IterationId,
    },
}

/// Posts notifications as JSON to a fixed endpoint
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    agent_id: String,
}

impl HttpNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        agent_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            agent_id: agent_id.into(),
        })
    }

    fn post(&self, notification: &Notification<'_>) -> Result<(), NotifyError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| NotifyError::NoRuntime)?;
        let body = match serde_json::to_value(notification) {
            Ok(body) => body,
            Err(e) => {
                log::error!("Failed to encode notification: {}", e);
                return Ok(());
            }
        };
        let request = self.client.post(&self.endpoint).json(&body);
        let endpoint = self.endpoint.clone();

        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    log::warn!("Notifier {} answered {}", endpoint, response.status());
                }
                Err(e) => log::warn!("Notification to {} failed: {}", endpoint, e),
            }
        });
        Ok(())
    }
}

impl Notifier for HttpNotifier {
    fn state_changed(&self, meta: &EngineMeta) -> Result<(), NotifyError> {
        self.post(&Notification::StateChanged {
            agent_id: &self.agent_id,
            meta,
        })
    }

    fn result_available(&self, iteration_id: IterationId) -> Result<(), NotifyError> {
        self.post(&Notification::ResultAvailable {
            agent_id: &self.agent_id,
            iteration_id,
        })
    }
}

/// Notifier used when no endpoint is configured
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn state_changed(&self, meta: &EngineMeta) -> Result<(), NotifyError> {
        log::info!(
            "Engine state: {:?} ({} iterations, {} failed)",
            meta.state,
            meta.iterations,
            meta.failed_iterations
        );
        Ok(())
    }

    fn result_available(&self, iteration_id: IterationId) -> Result<(), NotifyError> {
        log::debug!("Results available for iteration {}", iteration_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_shape() {
        let meta = EngineMeta::idle();
        let value = serde_json::to_value(Notification::StateChanged {
            agent_id: "line-1",
            meta: &meta,
        })
        .unwrap();
        assert_eq!(value["kind"], "stateChanged");
        assert_eq!(value["agentId"], "line-1");
        assert_eq!(value["meta"]["state"], "idle");
    }

    #[test]
    fn test_http_notifier_requires_runtime() {
        let notifier =
            HttpNotifier::new("http://127.0.0.1:9/notify", "agent", Duration::from_millis(100))
                .unwrap();
        assert!(matches!(
            notifier.result_available(uuid::Uuid::new_v4()),
            Err(NotifyError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_http_notifier_does_not_wait_for_delivery() {
        let notifier =
            HttpNotifier::new("http://127.0.0.1:9/notify", "agent", Duration::from_millis(100))
                .unwrap();
        notifier.state_changed(&EngineMeta::idle()).unwrap();
    }
}
