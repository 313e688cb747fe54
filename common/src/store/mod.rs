//! Persistencia de tareas.
//!
//! `save` es un compare-and-set sobre el estado guardado: así dos ejecutores
//! no pueden pasar la misma tarea de PENDING a RUNNING.

mod file;
mod memory;

pub use file::JsonFileTaskStore;
pub use memory::MemoryTaskStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::task::{Task, TaskId, TaskState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("la tarea {0} ya existe")]
    Duplicate(TaskId),
    #[error("la tarea {0} no existe")]
    NotFound(TaskId),
    #[error("la tarea {id} está en {found}, se esperaba {expected}")]
    StaleState {
        id: TaskId,
        expected: TaskState,
        found: TaskState,
    },
    #[error("lock del store envenenado")]
    Poisoned,
    #[error("error de E/S en el store: {0}")]
    Io(#[from] std::io::Error),
    #[error("error serializando tareas: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserta una tarea nueva. Si falla no queda nada visible.
    async fn add(&self, task: &Task) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Todas las tareas, ordenadas por `datetime_create`.
    async fn list(&self) -> Result<Vec<Task>, StoreError>;

    /// Reemplaza la tarea sólo si el estado guardado es `expected`.
    async fn save(&self, task: &Task, expected: TaskState) -> Result<(), StoreError>;
}

pub(crate) fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        a.datetime_create
            .cmp(&b.datetime_create)
            .then_with(|| a.id.cmp(&b.id))
    });
    tasks
}

/// Chequeo común del compare-and-set.
pub(crate) fn check_expected(current: &Task, expected: TaskState) -> Result<(), StoreError> {
    if current.state == expected {
        Ok(())
    } else {
        Err(StoreError::StaleState {
            id: current.id,
            expected,
            found: current.state,
        })
    }
}
