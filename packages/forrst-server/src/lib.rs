//! Forrst server: versioned function registry, extension pipeline, async
//! operations and the tower request pipeline that ties them together.

pub mod extension;
pub mod function;
pub mod operation;
pub mod service;
pub mod telemetry;

pub use extension::{Event, EventKind, Extension, ExtensionError, ExtensionPipeline, Subscription};
pub use function::{handler_fn, FunctionHandler, FunctionRegistry};
pub use operation::{AsyncOperationManager, InMemoryOperationRepository, OperationRepository};
pub use service::{ForrstServer, ServerConfig};
pub use telemetry::{init_tracing, LogFormat};
