//! Deadline middleware for requests.
//!
//! Answers `ForrstError::DeadlineExceeded` once the request's deadline (from
//! the deadline extension options, else the server default) has elapsed. The
//! inner future runs on its own task, so work already dispatched keeps going
//! after the client has been answered.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use forrst_core::{ForrstError, RequestEnvelope, ResponseEnvelope};
use tower::{Layer, Service};
use tracing::warn;

use crate::extension::deadline_from_request;

// ---------------------------------------------------------------------------
// DeadlineLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeadlineLayer {
    default_timeout: Duration,
}

impl DeadlineLayer {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService {
            inner,
            default_timeout: self.default_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// DeadlineService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
    default_timeout: Duration,
}

impl<S> Service<RequestEnvelope> for DeadlineService<S>
where
    S: Service<RequestEnvelope, Response = ResponseEnvelope, Error = ForrstError> + Send,
    S::Future: Send + 'static,
{
    type Response = ResponseEnvelope;
    type Error = ForrstError;
    type Future = Pin<Box<dyn Future<Output = Result<ResponseEnvelope, ForrstError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: RequestEnvelope) -> Self::Future {
        // Malformed options fall back to the default; the deadline extension
        // reports them to the client.
        let timeout = deadline_from_request(&request)
            .ok()
            .flatten()
            .unwrap_or(self.default_timeout);
        let request_id = request.id.clone();
        let handle = tokio::spawn(self.inner.call(request));

        Box::pin(async move {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(ForrstError::Internal(anyhow::anyhow!(
                    "request task failed: {join_err}"
                ))),
                Err(_elapsed) => {
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    warn!(request_id = %request_id, timeout_ms, "deadline exceeded");
                    Err(ForrstError::DeadlineExceeded { timeout_ms })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
