pub mod algorithms;
pub mod api;
pub mod config;
pub mod executor;
pub mod files;
pub mod params;
pub mod registry;
pub mod store;
pub mod task;
pub mod tasks;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Settings;
pub use executor::{ExecuteError, Executor};
pub use files::{FileMeta, FileStore, FileStoreError, HttpFileStore, NewFile};
pub use params::{FieldViolation, InvalidParams, ParamSchema, ValidatedParams};
pub use registry::{Algorithm, AlgorithmDescriptor, AlgorithmRegistry, RegistryError};
pub use store::{JsonFileTaskStore, MemoryTaskStore, StoreError, TaskStore};
pub use task::{ErrorCode, Task, TaskId, TaskState};
pub use tasks::{TaskError, TaskService};
