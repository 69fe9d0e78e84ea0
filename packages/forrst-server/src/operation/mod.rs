//! Async operations: records, the repository contract, the in-memory store,
//! the manager that owns every state transition, and the executor that runs
//! handlers in the background.

pub mod callback;
pub mod error;
pub mod executor;
pub mod manager;
pub mod memory;
pub mod record;
pub mod repository;

pub use callback::validate_callback_url;
pub use error::{OperationError, StoreError};
pub use executor::OperationExecutor;
pub use manager::{generate_operation_id, AsyncOperationManager, CreatedOperation};
pub use memory::InMemoryOperationRepository;
pub use record::{is_valid_operation_id, OperationRecord, OperationStatus};
pub use repository::{ListFilter, OperationPage, OperationRepository};
