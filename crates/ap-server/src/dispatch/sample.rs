//! Reference handler for `SAMPLE_ACTION`
//!
//! Validates a personnel-style side-effects record and issues a receipt. It
//! never leaves the process, which makes it the default handler for local
//! runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::ActionHandler;
use crate::domain::{ActionResult, EventData};

pub const SAMPLE_ACTION: &str = "SAMPLE_ACTION";

/// Side effects understood by [`SampleActionHandler`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleSideEffects {
    pub edipi: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub department: Option<String>,
    pub clearance_level: Option<String>,
    pub email: Option<String>,
    pub request_date: Option<DateTime<Utc>>,
}

impl SampleSideEffects {
    /// Lenient decode: anything that is not a matching object yields the
    /// empty record
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn is_valid(&self) -> bool {
        fn present(s: &Option<String>) -> bool {
            s.as_deref().is_some_and(|s| !s.trim().is_empty())
        }

        present(&self.first_name) || present(&self.last_name) || self.edipi.is_some()
    }

    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
        .trim()
        .to_string()
    }
}

#[derive(Debug, Default)]
pub struct SampleActionHandler;

impl SampleActionHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionHandler for SampleActionHandler {
    fn action_type(&self) -> &str {
        SAMPLE_ACTION
    }

    async fn execute(
        &self,
        data: &EventData,
        cancel: CancellationToken,
    ) -> anyhow::Result<ActionResult> {
        if cancel.is_cancelled() {
            return Ok(ActionResult::failure("External API call failed: call cancelled"));
        }

        let side_effects = SampleSideEffects::from_value(&data.side_effects);
        if !side_effects.is_valid() {
            debug!(document = %data.document, "Rejected sample side effects");
            return Ok(ActionResult::failure(
                "Invalid side effects: firstName, lastName or edipi is required",
            ));
        }

        let receipt = json!({
            "success": true,
            "transactionId": Uuid::new_v4().to_string(),
            "processedAt": Utc::now(),
            "document": data.document,
            "clientIdentifier": data.client_identifier,
            "fullName": side_effects.full_name(),
            "message": "Sample action completed successfully",
        });

        info!(
            document = %data.document,
            client_identifier = %data.client_identifier,
            "SAMPLE_ACTION completed"
        );

        Ok(ActionResult::success(Some(receipt.to_string())))
    }
}
