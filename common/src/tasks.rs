use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::params::InvalidParams;
use crate::registry::{AlgorithmRegistry, RegistryError};
use crate::store::{StoreError, TaskStore};
use crate::task::{Task, TaskId, TaskState};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Algorithm(#[from] RegistryError),
    #[error("{algorithm}: {source}")]
    InvalidAlgorithmParams {
        algorithm: String,
        #[source]
        source: InvalidParams,
    },
    #[error("no se pudo crear la tarea: {0}")]
    TaskCreation(#[source] StoreError),
    #[error("la tarea {0} no existe")]
    TaskNotFound(TaskId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Alta y consulta de tareas. Nunca mueve una tarea más allá de PENDING;
/// de eso se encarga el `Executor`.
#[derive(Clone)]
pub struct TaskService {
    registry: Arc<AlgorithmRegistry>,
    store: Arc<dyn TaskStore>,
}

impl TaskService {
    pub fn new(registry: Arc<AlgorithmRegistry>, store: Arc<dyn TaskStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    pub async fn create(
        &self,
        algorithm: &str,
        input_file_id: &str,
        raw_params: &Value,
    ) -> Result<Task, TaskError> {
        let descriptor = self.registry.resolve(algorithm)?;
        let params = descriptor
            .validate(raw_params)
            .map_err(|source| TaskError::InvalidAlgorithmParams {
                algorithm: descriptor.name.clone(),
                source,
            })?;

        let task = Task::new_pending(&descriptor.name, input_file_id, params, Utc::now());

        if let Err(e) = self.store.add(&task).await {
            warn!("error creando tarea para {}: {}", descriptor.name, e);
            return Err(TaskError::TaskCreation(e));
        }

        info!(
            "tarea {} creada (algoritmo={}, input={})",
            task.id, task.algorithm, task.input_file_id
        );
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> Result<Task, TaskError> {
        self.store.get(id).await?.ok_or(TaskError::TaskNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Task>, TaskError> {
        Ok(self.store.list().await?)
    }

    pub async fn list_by_state(&self, state: TaskState) -> Result<Vec<Task>, TaskError> {
        let mut tasks = self.store.list().await?;
        tasks.retain(|t| t.state == state);
        Ok(tasks)
    }
}
