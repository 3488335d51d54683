//! Action handlers and the registry that routes events to them
//!
//! Each handler serves exactly one action type. The registry is built once at
//! startup, then shared read-only with the processor.

pub mod http;
pub mod sample;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ActionConfig;
use crate::domain::{ActionResult, EventData};

pub use http::HttpActionHandler;
pub use sample::SampleActionHandler;

/// Executes the external action for one action type
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The action type this handler serves
    fn action_type(&self) -> &str;

    /// Run the action for one event.
    ///
    /// Expected failures (rejections, exhausted retries, invalid payloads)
    /// come back as [`ActionResult::Failure`]. `Err` is reserved for faults;
    /// the processor records it as a processing error.
    async fn execute(
        &self,
        data: &EventData,
        cancel: CancellationToken,
    ) -> anyhow::Result<ActionResult>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A handler for action type '{0}' is already registered")]
    Duplicate(String),

    #[error("Action type must not be empty")]
    EmptyActionType,
}

/// Lookup table from action type to handler
#[derive(Default, Clone)]
pub struct ActionHandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handlers shipped with the server: the sample action always, the
    /// HTTP action when an endpoint is configured
    pub fn from_config(config: &ActionConfig) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(SampleActionHandler::new()))?;

        if let Some(endpoint) = &config.endpoint {
            let handler =
                HttpActionHandler::new(config.http_action_type.as_str(), endpoint.as_str(), config.retry_policy())?;
            registry.register(Arc::new(handler))?;
        } else {
            info!("AP_ACTION_ENDPOINT not set, HTTP action handler disabled");
        }

        Ok(registry)
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) -> Result<&mut Self, RegistryError> {
        let action_type = handler.action_type().to_string();
        if action_type.is_empty() {
            return Err(RegistryError::EmptyActionType);
        }
        if self.handlers.contains_key(&action_type) {
            return Err(RegistryError::Duplicate(action_type));
        }

        info!(action_type = %action_type, "Registered action handler");
        self.handlers.insert(action_type, handler);
        Ok(self)
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Registered action types, sorted
    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ActionHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandlerRegistry")
            .field("action_types", &self.action_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl ActionHandler for Fixed {
        fn action_type(&self) -> &str {
            self.0
        }

        async fn execute(
            &self,
            _data: &EventData,
            _cancel: CancellationToken,
        ) -> anyhow::Result<ActionResult> {
            Ok(ActionResult::success(None))
        }
    }

    #[test]
    fn test_lookup_by_action_type() {
        let mut registry = ActionHandlerRegistry::new();
        registry
            .register(Arc::new(Fixed("A")))
            .unwrap()
            .register(Arc::new(Fixed("B")))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("A").map(|h| h.action_type().to_string()), Some("A".into()));
        assert!(registry.get("C").is_none());
        assert_eq!(registry.action_types(), vec!["A", "B"]);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = ActionHandlerRegistry::new();
        registry.register(Arc::new(Fixed("A"))).unwrap();

        let err = registry.register(Arc::new(Fixed("A"))).err();
        assert_eq!(err, Some(RegistryError::Duplicate("A".into())));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_from_config_registers_http_handler_only_with_endpoint() {
        let registry = ActionHandlerRegistry::from_config(&ActionConfig::default()).unwrap();
        assert_eq!(registry.action_types(), vec![sample::SAMPLE_ACTION]);

        let config = ActionConfig {
            endpoint: Some("http://localhost:9000/actions".into()),
            ..ActionConfig::default()
        };
        let registry = ActionHandlerRegistry::from_config(&config).unwrap();
        assert!(registry.contains(sample::SAMPLE_ACTION));
        assert!(registry.contains(&config.http_action_type));
    }

    #[test]
    fn test_empty_action_type_is_rejected() {
        let mut registry = ActionHandlerRegistry::new();
        assert_eq!(
            registry.register(Arc::new(Fixed(""))).err(),
            Some(RegistryError::EmptyActionType)
        );
        assert!(registry.is_empty());
    }
}
