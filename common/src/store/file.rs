use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{check_expected, sorted, StoreError, TaskStore};
use crate::task::{Task, TaskId, TaskState};

/// Store en memoria respaldado por un archivo JSON.
///
/// Cada escritura vuelca el snapshot completo a un archivo temporal y lo
/// renombra sobre el original; si la escritura falla se deshace el cambio
/// en memoria.
pub struct JsonFileTaskStore {
    path: PathBuf,
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl JsonFileTaskStore {
    /// Abre (o crea vacío) el store en `path`, recargando las tareas existentes.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tasks: HashMap<TaskId, Task> = match tokio::fs::read(&path).await {
            Ok(raw) => {
                let list: Vec<Task> = serde_json::from_slice(&raw)?;
                list.into_iter().map(|t| (t.id, t)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!("store de tareas en {} ({} tareas)", path.display(), tasks.len());
        Ok(Self {
            path,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, tasks: &HashMap<TaskId, Task>) -> Result<(), StoreError> {
        let snapshot = sorted(tasks.values().cloned().collect());
        let raw = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&raw).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn add(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id));
        }
        tasks.insert(task.id, task.clone());

        if let Err(e) = self.persist(&tasks).await {
            warn!("no se pudo persistir la tarea {}: {}", task.id, e);
            tasks.remove(&task.id);
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        Ok(sorted(self.tasks.lock().await.values().cloned().collect()))
    }

    async fn save(&self, task: &Task, expected: TaskState) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().await;
        let current = tasks.get_mut(&task.id).ok_or(StoreError::NotFound(task.id))?;
        check_expected(current, expected)?;
        let previous = std::mem::replace(current, task.clone());

        if let Err(e) = self.persist(&tasks).await {
            warn!("no se pudo persistir la tarea {}: {}", task.id, e);
            tasks.insert(task.id, previous);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ErrorCode;
    use crate::testing::pending_task;
    use chrono::Utc;

    #[tokio::test]
    async fn tarea_guardada_y_recargada_es_identica() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let mut done = pending_task();
        let failed = {
            let mut t = pending_task();
            t.mark_running(Utc::now()).unwrap();
            t.mark_failed(ErrorCode::InputFileNotFound, "no existe f1", Utc::now())
                .unwrap();
            t
        };

        {
            let store = JsonFileTaskStore::open(&path).await.unwrap();
            store.add(&done).await.unwrap();
            store.add(&failed).await.unwrap();

            done.mark_running(Utc::now()).unwrap();
            store.save(&done, TaskState::Pending).await.unwrap();
            done.mark_done("out-1".into(), "/docs/processed_a.tif".into(), Utc::now())
                .unwrap();
            store.save(&done, TaskState::Running).await.unwrap();
        }

        let reopened = JsonFileTaskStore::open(&path).await.unwrap();
        assert_eq!(reopened.get(done.id).await.unwrap(), Some(done.clone()));
        assert_eq!(reopened.get(failed.id).await.unwrap(), Some(failed.clone()));
        assert_eq!(reopened.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn archivo_inexistente_arranca_vacio() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileTaskStore::open(dir.path().join("nuevo.json"))
            .await
            .unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn escritura_fallida_no_deja_la_tarea_visible() {
        let dir = tempfile::tempdir().unwrap();
        // El "archivo" del store es un directorio: el rename final falla
        let path = dir.path().join("ocupado");
        std::fs::create_dir_all(path.join("adentro")).unwrap();

        let store = JsonFileTaskStore {
            path: path.clone(),
            tasks: Mutex::new(HashMap::new()),
        };
        let t = pending_task();
        assert!(store.add(&t).await.is_err());
        assert!(store.get(t.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_con_estado_viejo_no_pisa_el_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileTaskStore::open(dir.path().join("t.json")).await.unwrap();
        let mut t = pending_task();
        store.add(&t).await.unwrap();
        t.mark_running(Utc::now()).unwrap();
        store.save(&t, TaskState::Pending).await.unwrap();

        let mut stale = t.clone();
        stale.state = TaskState::Pending;
        stale.mark_running(Utc::now()).unwrap();
        assert!(matches!(
            store.save(&stale, TaskState::Pending).await,
            Err(StoreError::StaleState { .. })
        ));
    }
}
