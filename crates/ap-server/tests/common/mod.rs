//! Shared fixtures for the pipeline tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ap_server::config::ProcessorConfig;
use ap_server::dispatch::{ActionHandler, ActionHandlerRegistry};
use ap_server::domain::{ActionResult, EventData};
use ap_server::features::batches::commands::upload;
use ap_server::features::batches::{UploadBatchCommand, UploadBatchResponse};
use ap_server::processor::EventProcessor;
use ap_server::store::Store;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub const OWNER: &str = "ops@example.com";
pub const TEST_ACTION: &str = "TEST_ACTION";

/// Handler that fails any event whose document starts with `fail`
#[derive(Default)]
pub struct DocumentDrivenHandler {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ActionHandler for DocumentDrivenHandler {
    fn action_type(&self) -> &str {
        TEST_ACTION
    }

    async fn execute(&self, data: &EventData, _cancel: CancellationToken) -> anyhow::Result<ActionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if data.document.starts_with("fail") {
            Ok(ActionResult::failure(format!("rejected {}", data.document)))
        } else {
            Ok(ActionResult::success(Some(format!("accepted {}", data.document))))
        }
    }
}

/// Registry with the test handler plus the shipped sample handler
pub fn registry(handler: Arc<DocumentDrivenHandler>) -> Arc<ActionHandlerRegistry> {
    let mut registry = ActionHandlerRegistry::new();
    registry
        .register(handler)
        .unwrap()
        .register(Arc::new(ap_server::dispatch::SampleActionHandler::new()))
        .unwrap();
    Arc::new(registry)
}

pub fn processor(store: Arc<dyn Store>, handler: Arc<DocumentDrivenHandler>) -> EventProcessor {
    EventProcessor::new(store, registry(handler), ProcessorConfig::default())
}

pub async fn upload_file(store: &dyn Store, content: &str) -> UploadBatchResponse {
    upload::handle(store, UploadBatchCommand::new("events.csv", OWNER, content.as_bytes().to_vec()))
        .await
        .unwrap()
}

/// Run cycles until one claims nothing
pub async fn drain(processor: &EventProcessor) {
    let cancel = CancellationToken::new();
    for _ in 0..10 {
        if processor.run_cycle(&cancel).await.unwrap().is_idle() {
            return;
        }
    }
    panic!("queue did not drain");
}
