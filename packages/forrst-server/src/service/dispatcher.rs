//! Request dispatch: drives one request through the lifecycle stages.
//!
//! ```text
//! RequestValidated -> resolve -> ExecutingFunction -> handler
//!     -> FunctionExecuted -> SendingResponse
//! ```
//!
//! A short-circuit at `RequestValidated`, `ExecutingFunction` or
//! `FunctionExecuted` returns the listener's response and skips everything
//! after it. A fatal extension error,
//! a resolution error or a handler error moves the request to the failed
//! state: the error becomes the response and `RequestFailed` fires once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use forrst_core::{ForrstError, RequestEnvelope, ResponseEnvelope};
use tower::Service;
use tracing::debug;

use crate::extension::{Event, EventKind, ExtensionPipeline};
use crate::function::FunctionRegistry;

/// Innermost service of the request pipeline.
///
/// Never fails: every error is rendered into an error response. The `Error`
/// type exists for the middleware wrapped around it.
#[derive(Clone)]
pub struct RequestDispatcher {
    registry: Arc<FunctionRegistry>,
    pipeline: Arc<ExtensionPipeline>,
}

impl RequestDispatcher {
    #[must_use]
    pub fn new(registry: Arc<FunctionRegistry>, pipeline: Arc<ExtensionPipeline>) -> Self {
        Self { registry, pipeline }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<ExtensionPipeline> {
        &self.pipeline
    }

    /// Processes `request` to its single response.
    pub async fn dispatch(&self, request: &RequestEnvelope) -> ResponseEnvelope {
        match self.run(request).await {
            Ok(response) => response,
            Err(err) => self.fail(request, &err).await,
        }
    }

    async fn run(&self, request: &RequestEnvelope) -> Result<ResponseEnvelope, ForrstError> {
        let mut validated = Event::new(EventKind::RequestValidated, request);
        self.pipeline.dispatch(&mut validated).await?;
        if let Some(response) = validated.into_short_circuit() {
            debug!(request_id = %request.id, stage = "request_validated", "short-circuited");
            return Ok(response);
        }

        let function = self
            .registry
            .resolve(&request.call.function, request.call.version.as_deref())?;

        let mut executing = Event::new(EventKind::ExecutingFunction, request).with_function(&function);
        self.pipeline.dispatch(&mut executing).await?;
        if let Some(response) = executing.into_short_circuit() {
            debug!(request_id = %request.id, stage = "executing_function", "short-circuited");
            return Ok(response);
        }

        let result = function.handler.invoke(request).await?;

        let mut executed = Event::new(EventKind::FunctionExecuted, request)
            .with_function(&function)
            .with_response(ResponseEnvelope::success(request.id.clone(), result));
        self.pipeline.dispatch(&mut executed).await?;
        let short_circuited = executed.is_short_circuited();
        let response = executed
            .into_response()
            .unwrap_or_else(|| ResponseEnvelope::empty(request.id.clone()));
        if short_circuited {
            debug!(request_id = %request.id, stage = "function_executed", "short-circuited");
            return Ok(response);
        }

        let mut sending = Event::new(EventKind::SendingResponse, request)
            .with_function(&function)
            .with_response(response);
        self.pipeline.dispatch(&mut sending).await?;
        Ok(sending
            .into_response()
            .unwrap_or_else(|| ResponseEnvelope::empty(request.id.clone())))
    }

    async fn fail(&self, request: &RequestEnvelope, err: &ForrstError) -> ResponseEnvelope {
        debug!(request_id = %request.id, code = %err.code(), "request failed");
        let response = ResponseEnvelope::from_error(request.id.clone(), err.to_error_entry());
        let mut failed = Event::new(EventKind::RequestFailed, request).with_response(response);
        // Errors raised while failing are logged by the pipeline, never re-raised.
        let _ = self.pipeline.dispatch(&mut failed).await;
        failed.into_response().unwrap_or_else(|| {
            ResponseEnvelope::from_error(request.id.clone(), err.to_error_entry())
        })
    }
}

impl Service<RequestEnvelope> for RequestDispatcher {
    type Response = ResponseEnvelope;
    type Error = ForrstError;
    type Future = Pin<Box<dyn Future<Output = Result<ResponseEnvelope, ForrstError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RequestEnvelope) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { Ok(dispatcher.dispatch(&request).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
