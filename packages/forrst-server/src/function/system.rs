//! System functions shipped with every server: health ping and the async
//! operation status, cancel and list functions.

use std::sync::Arc;

use async_trait::async_trait;
use forrst_core::{ForrstError, RequestEnvelope, SystemFunction, SYSTEM_FUNCTION_VERSION};
use serde_json::{json, Value};

use super::registry::{FunctionRegistry, RegistryError};
use super::FunctionHandler;
use crate::operation::record::now_millis;
use crate::operation::{AsyncOperationManager, ListFilter, OperationStatus};

/// Default page size of the list function.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest page size the list function accepts.
pub const MAX_LIST_LIMIT: usize = 100;

/// Registers every [`SystemFunction`] at [`SYSTEM_FUNCTION_VERSION`].
///
/// # Errors
///
/// Returns [`RegistryError::Conflict`] if called twice on the same registry.
pub fn register_system_functions(
    registry: &FunctionRegistry,
    manager: &Arc<AsyncOperationManager>,
) -> Result<(), RegistryError> {
    for function in SystemFunction::ALL {
        let handler: Arc<dyn FunctionHandler> = match function {
            SystemFunction::Ping => Arc::new(Ping),
            SystemFunction::OperationStatus => Arc::new(OperationStatusFn {
                manager: Arc::clone(manager),
            }),
            SystemFunction::OperationCancel => Arc::new(OperationCancelFn {
                manager: Arc::clone(manager),
            }),
            SystemFunction::OperationList => Arc::new(OperationListFn {
                manager: Arc::clone(manager),
            }),
        };
        registry.register_system(function.urn(), SYSTEM_FUNCTION_VERSION, handler)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn argument_pointer(name: &str) -> String {
    format!("/call/arguments/{name}")
}

fn invalid_argument(name: &str, message: impl Into<String>) -> ForrstError {
    ForrstError::InvalidArguments {
        message: message.into(),
        pointer: Some(argument_pointer(name)),
    }
}

fn required_str<'a>(request: &'a RequestEnvelope, name: &str) -> Result<&'a str, ForrstError> {
    match request.call.argument(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(_) => Err(invalid_argument(name, format!("`{name}` must be a non-empty string"))),
        None => Err(invalid_argument(name, format!("`{name}` is required"))),
    }
}

fn optional_str<'a>(
    request: &'a RequestEnvelope,
    name: &str,
) -> Result<Option<&'a str>, ForrstError> {
    match request.call.argument(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(invalid_argument(name, format!("`{name}` must be a string"))),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

struct Ping;

#[async_trait]
impl FunctionHandler for Ping {
    async fn invoke(&self, _request: &RequestEnvelope) -> Result<Value, ForrstError> {
        Ok(json!({ "status": "healthy", "timestamp": now_millis() }))
    }
}

struct OperationStatusFn {
    manager: Arc<AsyncOperationManager>,
}

#[async_trait]
impl FunctionHandler for OperationStatusFn {
    async fn invoke(&self, request: &RequestEnvelope) -> Result<Value, ForrstError> {
        let id = required_str(request, "operation_id")?;
        let record = self
            .manager
            .find(id, Some(request.caller()))
            .await?
            .ok_or_else(|| ForrstError::OperationNotFound { id: id.to_string() })?;
        Ok(record.status_view())
    }
}

struct OperationCancelFn {
    manager: Arc<AsyncOperationManager>,
}

#[async_trait]
impl FunctionHandler for OperationCancelFn {
    async fn invoke(&self, request: &RequestEnvelope) -> Result<Value, ForrstError> {
        let id = required_str(request, "operation_id")?;
        let record = self.manager.cancel(id, Some(request.caller())).await?;
        Ok(json!({ "operation_id": record.id, "status": record.status }))
    }
}

struct OperationListFn {
    manager: Arc<AsyncOperationManager>,
}

#[async_trait]
impl FunctionHandler for OperationListFn {
    async fn invoke(&self, request: &RequestEnvelope) -> Result<Value, ForrstError> {
        let status = optional_str(request, "status")?
            .map(|s| s.parse::<OperationStatus>())
            .transpose()
            .map_err(|e| invalid_argument("status", e))?;
        let function = optional_str(request, "function")?.map(str::to_string);
        let cursor = optional_str(request, "cursor")?;
        let limit = match request.call.argument("limit") {
            None | Some(Value::Null) => DEFAULT_LIST_LIMIT,
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| (1..=MAX_LIST_LIMIT).contains(n))
                .ok_or_else(|| {
                    invalid_argument(
                        "limit",
                        format!("`limit` must be an integer between 1 and {MAX_LIST_LIMIT}"),
                    )
                })?,
        };

        let filter = ListFilter {
            status,
            function,
            owner_id: Some(request.caller().to_string()),
        };
        let page = self.manager.list(&filter, limit, cursor).await?;
        let operations: Vec<Value> = page.operations.iter().map(|r| r.status_view()).collect();
        Ok(json!({ "operations": operations, "next_cursor": page.next_cursor }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
