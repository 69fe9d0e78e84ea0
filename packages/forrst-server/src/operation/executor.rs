//! Runs function handlers for accepted async operations on background tasks.

use std::sync::Arc;

use forrst_core::urn::extensions;
use forrst_core::RequestEnvelope;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use super::error::OperationError;
use super::manager::AsyncOperationManager;
use crate::function::FunctionHandler;

/// Spawns handlers and records their outcome on the operation.
#[derive(Clone)]
pub struct OperationExecutor {
    manager: Arc<AsyncOperationManager>,
}

impl OperationExecutor {
    #[must_use]
    pub fn new(manager: Arc<AsyncOperationManager>) -> Self {
        Self { manager }
    }

    /// Runs `handler` for `operation_id` on a tokio task.
    ///
    /// The handler sees the original request; the operation id is available to
    /// it under the async extension key of the request metadata, so long
    /// handlers can poll [`AsyncOperationManager::is_cancelled`].
    pub fn spawn(
        &self,
        operation_id: String,
        handler: Arc<dyn FunctionHandler>,
        request: RequestEnvelope,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(&self.manager);
        let span = info_span!(
            "async_operation",
            operation_id = %operation_id,
            function = %request.call.function,
        );
        tokio::spawn(
            async move {
                request
                    .metadata()
                    .insert(extensions::ASYNC, json!({ "operation_id": operation_id }));
                run(&manager, &operation_id, handler.as_ref(), &request).await;
            }
            .instrument(span),
        )
    }
}

async fn run(
    manager: &AsyncOperationManager,
    operation_id: &str,
    handler: &dyn FunctionHandler,
    request: &RequestEnvelope,
) {
    match manager.mark_processing(operation_id, None).await {
        Ok(_) => {}
        Err(OperationError::InvalidState { status, .. }) => {
            info!(%status, "operation no longer runnable, not starting");
            return;
        }
        Err(err) => {
            warn!(error = %err, "could not start operation");
            return;
        }
    }

    let outcome = handler.invoke(request).await;

    let saved = match outcome {
        Ok(result) => manager.complete(operation_id, result).await,
        Err(err) => manager.fail(operation_id, vec![err.to_error_entry()]).await,
    };
    match saved {
        Ok(record) => info!(status = %record.status, "operation finished"),
        Err(OperationError::InvalidState { status, .. }) => {
            info!(%status, "dropping late result of operation");
        }
        Err(err) => warn!(error = %err, "could not record operation outcome"),
    }
}
