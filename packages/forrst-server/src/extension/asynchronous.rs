//! Deferred execution.
//!
//! A request opting into the async extension is answered immediately with an
//! operation id and a polling directive; the resolved handler runs on the
//! [`OperationExecutor`] and its outcome lands on the operation record.

use std::sync::Arc;

use async_trait::async_trait;
use forrst_core::urn::extensions;
use forrst_core::{ForrstError, ProtocolDuration, SystemFunction};
use serde_json::{json, Map, Value};

use super::{options_pointer, Event, EventKind, Extension, ExtensionError, Subscription};
use crate::operation::{AsyncOperationManager, OperationExecutor};

pub struct AsyncExtension {
    manager: Arc<AsyncOperationManager>,
    executor: OperationExecutor,
    retry_after_seconds: u64,
}

impl AsyncExtension {
    #[must_use]
    pub fn new(
        manager: Arc<AsyncOperationManager>,
        executor: OperationExecutor,
        retry_after_seconds: u64,
    ) -> Self {
        Self {
            manager,
            executor,
            retry_after_seconds,
        }
    }

    async fn defer(&self, event: &mut Event<'_>) -> Result<(), ExtensionError> {
        let request = event.request();
        let Some(function) = event.function() else {
            return Ok(());
        };
        let options = request
            .extension_options(extensions::ASYNC)
            .cloned()
            .unwrap_or_default();
        let pointer = options_pointer(extensions::ASYNC);

        let metadata = match options.get("metadata") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ForrstError::InvalidArguments {
                    message: "`metadata` must be an object".to_string(),
                    pointer: Some(format!("{pointer}/metadata")),
                }
                .into())
            }
        };
        let retry_after_seconds = match options.get("retry_after") {
            None | Some(Value::Null) => self.retry_after_seconds,
            Some(value) => ProtocolDuration::from_value(value, &format!("{pointer}/retry_after"))?
                .as_millis()
                .div_ceil(1_000)
                .max(1),
        };

        let created = self
            .manager
            .create_async_operation(
                request,
                &function.version.to_string(),
                &options,
                metadata,
                retry_after_seconds,
            )
            .await?;
        self.executor.spawn(
            created.record.id.clone(),
            Arc::clone(&function.handler),
            request.clone(),
        );
        event.short_circuit(created.response);
        Ok(())
    }
}

#[async_trait]
impl Extension for AsyncExtension {
    fn urn(&self) -> &str {
        extensions::ASYNC
    }

    fn subscribed_events(&self) -> Vec<Subscription> {
        vec![Subscription::new(EventKind::ExecutingFunction, 0)]
    }

    fn capability_metadata(&self) -> Map<String, Value> {
        let functions: Vec<&str> = [
            SystemFunction::OperationStatus,
            SystemFunction::OperationCancel,
            SystemFunction::OperationList,
        ]
        .iter()
        .map(|f| f.urn())
        .collect();
        let mut meta = Map::new();
        meta.insert("functions".to_string(), json!(functions));
        meta.insert(
            "retry_after".to_string(),
            ProtocolDuration::seconds(self.retry_after_seconds).to_value(),
        );
        meta
    }

    async fn handle(&self, event: &mut Event<'_>) -> Result<(), ExtensionError> {
        if event.kind() == EventKind::ExecutingFunction {
            self.defer(event).await?;
        }
        Ok(())
    }
}
