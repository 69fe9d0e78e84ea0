//! Request processing service.
//!
//! 1. **Dispatch** (`dispatcher`): runs one request through the lifecycle stages
//! 2. **Middleware** (`middleware`): Tower layers (load-shedding, deadline, metrics)
//! 3. **Server** (`server`): codec + pipeline entry point for transports
//! 4. **Background workers** (`worker`): periodic operation expiry sweep

pub mod config;
pub mod dispatcher;
pub mod middleware;
pub mod server;
pub mod worker;

pub use config::ServerConfig;
pub use dispatcher::RequestDispatcher;
pub use middleware::{build_request_pipeline, RequestPipeline};
pub use server::{ForrstServer, ForrstServerBuilder, ServerError};
pub use worker::{BackgroundRunnable, BackgroundWorker, OperationSweeper, SweepTask};
