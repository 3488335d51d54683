//! Generic HTTP action handler
//!
//! POSTs the event as JSON to a configured endpoint and treats any 2xx as
//! success, keeping the response body as the event's response data.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ActionHandler;
use crate::domain::{ActionResult, EventData};
use crate::retry::{ExternalCallError, RetryPolicy};

#[derive(Debug, Serialize)]
struct ActionRequest<'a> {
    document: &'a str,
    client_identifier: &'a str,
    action_type: &'a str,
    side_effects: &'a Value,
    timestamp: chrono::DateTime<Utc>,
}

pub struct HttpActionHandler {
    action_type: String,
    endpoint: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpActionHandler {
    pub fn new(
        action_type: impl Into<String>,
        endpoint: impl Into<String>,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("action-processor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            action_type: action_type.into(),
            endpoint: endpoint.into(),
            client,
            retry,
        })
    }

    async fn post(&self, data: &EventData) -> Result<String, ExternalCallError> {
        let request = ActionRequest {
            document: &data.document,
            client_identifier: &data.client_identifier,
            action_type: &data.action_type,
            side_effects: &data.side_effects,
            timestamp: Utc::now(),
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(ExternalCallError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl ActionHandler for HttpActionHandler {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn execute(
        &self,
        data: &EventData,
        cancel: CancellationToken,
    ) -> anyhow::Result<ActionResult> {
        let outcome = self.retry.run(&cancel, |_| self.post(data)).await;

        match outcome {
            Ok(body) => {
                info!(
                    action_type = %self.action_type,
                    document = %data.document,
                    "Action completed"
                );
                let response = if body.is_empty() { None } else { Some(body) };
                Ok(ActionResult::success(response))
            },
            Err(err) => {
                warn!(
                    action_type = %self.action_type,
                    document = %data.document,
                    error = %err,
                    "Action failed"
                );
                Ok(ActionResult::failure(format!("External API call failed: {}", err)))
            },
        }
    }
}
