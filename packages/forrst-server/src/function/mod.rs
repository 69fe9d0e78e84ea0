//! Function handlers, the versioned function registry, and system functions.

pub mod registry;
pub mod system;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use forrst_core::{ForrstError, RequestEnvelope};
use serde_json::Value;

pub use registry::{FunctionRegistration, FunctionRegistry, RegistryError, Stability};
pub use system::register_system_functions;

/// The body of a registered function.
///
/// Receives the full request envelope (arguments, context, extension options)
/// and returns the `result` value or a typed protocol error.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn invoke(&self, request: &RequestEnvelope) -> Result<Value, ForrstError>;
}

/// Adapts an async closure into a [`FunctionHandler`].
///
/// The closure receives its own copy of the request so the returned future
/// can be `'static`.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> FunctionHandler for FnHandler<F>
where
    F: Fn(RequestEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ForrstError>> + Send + 'static,
{
    async fn invoke(&self, request: &RequestEnvelope) -> Result<Value, ForrstError> {
        (self.0)(request.clone()).await
    }
}

/// Wraps `f` as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn FunctionHandler>
where
    F: Fn(RequestEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ForrstError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
