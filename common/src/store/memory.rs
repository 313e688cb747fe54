use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{check_expected, sorted, StoreError, TaskStore};
use crate::task::{Task, TaskId, TaskState};

/// Store en memoria; lo usa el master cuando no hay TASK_STORE_PATH y los tests.
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn add(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().map_err(|_| StoreError::Poisoned)?;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tasks.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(sorted(tasks.values().cloned().collect()))
    }

    async fn save(&self, task: &Task, expected: TaskState) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().map_err(|_| StoreError::Poisoned)?;
        let current = tasks.get_mut(&task.id).ok_or(StoreError::NotFound(task.id))?;
        check_expected(current, expected)?;
        *current = task.clone();
        Ok(())
    }
}
