//! Dobles de prueba: algoritmos, almacenamiento de archivos y stores falsos.

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::algorithms::RasterRescale;
use crate::files::{FileMeta, FileStore, FileStoreError, NewFile};
use crate::params::{validate, ParamSchema, ValidatedParams};
use crate::registry::{Algorithm, AlgorithmDescriptor, AlgorithmRegistry};
use crate::store::{MemoryTaskStore, StoreError, TaskStore};
use crate::task::{Task, TaskId, TaskState};

/// Devuelve la entrada tal cual. Duerme un poco para que start < end sea observable.
pub struct EchoAlgorithm;

#[async_trait]
impl Algorithm for EchoAlgorithm {
    async fn run(&self, input: Bytes, _ext: &str, _params: &ValidatedParams) -> anyhow::Result<Vec<u8>> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(input.to_vec())
    }
}

pub struct FailingAlgorithm;

#[async_trait]
impl Algorithm for FailingAlgorithm {
    async fn run(&self, _input: Bytes, _ext: &str, _params: &ValidatedParams) -> anyhow::Result<Vec<u8>> {
        bail!("el algoritmo explotó")
    }
}

/// RASTER_RESCALE (con su esquema real, pero sin GDAL) + FAILING.
pub fn registry_with_echo() -> AlgorithmRegistry {
    let mut registry = AlgorithmRegistry::new();
    registry
        .register(AlgorithmDescriptor::new(
            "RASTER_RESCALE",
            "rescale de prueba",
            RasterRescale::schema(),
            Arc::new(EchoAlgorithm),
        ))
        .expect("registro de prueba");
    registry
        .register(AlgorithmDescriptor::new(
            "FAILING",
            "siempre falla",
            ParamSchema::new(),
            Arc::new(FailingAlgorithm),
        ))
        .expect("registro de prueba");
    registry
}

pub fn pending_task() -> Task {
    let params = validate(&RasterRescale::schema(), &json!({"xres": 10, "yres": 10}))
        .expect("params de prueba");
    Task::new_pending("RASTER_RESCALE", "f1", params, Utc::now())
}

/* --------- almacenamiento de archivos en memoria --------- */

#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<String, (FileMeta, Bytes)>>,
    posted: Mutex<Vec<NewFile>>,
    upload_error: Mutex<Option<FileStoreError>>,
    fetch_error: Mutex<Option<FileStoreError>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un archivo y devuelve su id.
    pub fn insert(&self, filename: &str, ext: &str, path: &str, content: &[u8]) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let meta = FileMeta {
            uuid: id.clone(),
            filename: filename.to_string(),
            file_extension: ext.to_string(),
            size: content.len() as u64,
            path: path.to_string(),
            comment: None,
            created_at: Some(Utc::now().to_rfc3339()),
            updated_at: None,
        };
        self.files
            .lock()
            .unwrap()
            .insert(id.clone(), (meta, Bytes::copy_from_slice(content)));
        id
    }

    pub fn fail_uploads_with(&self, err: FileStoreError) {
        *self.upload_error.lock().unwrap() = Some(err);
    }

    /// La próxima lectura de metadata falla con `err`.
    pub fn fail_fetches_with(&self, err: FileStoreError) {
        *self.fetch_error.lock().unwrap() = Some(err);
    }

    pub fn posted(&self) -> Vec<NewFile> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn get_file_meta(&self, file_id: &str) -> Result<FileMeta, FileStoreError> {
        if let Some(err) = self.fetch_error.lock().unwrap().take() {
            return Err(err);
        }
        let files = self.files.lock().unwrap();
        files
            .get(file_id)
            .map(|(meta, _)| meta.clone())
            .ok_or_else(|| FileStoreError::NotFound(file_id.to_string()))
    }

    async fn get_file(&self, file_id: &str) -> Result<Bytes, FileStoreError> {
        let files = self.files.lock().unwrap();
        files
            .get(file_id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| FileStoreError::NotFound(file_id.to_string()))
    }

    async fn post_file(&self, file: NewFile) -> Result<FileMeta, FileStoreError> {
        if let Some(err) = self.upload_error.lock().unwrap().take() {
            return Err(err);
        }

        let exists = self.files.lock().unwrap().values().any(|(m, _)| {
            m.path == file.path
                && m.filename == file.filename
                && m.file_extension == file.file_extension
        });
        if exists {
            return Err(FileStoreError::AlreadyExists(format!(
                "{}{}.{}",
                file.path, file.filename, file.file_extension
            )));
        }

        let id = self.insert(&file.filename, &file.file_extension, &file.path, &file.content);
        self.posted.lock().unwrap().push(file);
        self.get_file_meta(&id).await
    }
}

/* --------- stores de tareas con fallas --------- */

/// Rechaza toda escritura.
pub struct BrokenTaskStore;

#[async_trait]
impl TaskStore for BrokenTaskStore {
    async fn add(&self, _task: &Task) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("disco lleno")))
    }

    async fn get(&self, _id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        Ok(Vec::new())
    }

    async fn save(&self, task: &Task, _expected: TaskState) -> Result<(), StoreError> {
        Err(StoreError::NotFound(task.id))
    }
}

/// Simula otro ejecutor que toma la tarea justo después de cada `get`.
pub struct RacingTaskStore {
    inner: MemoryTaskStore,
}

impl RacingTaskStore {
    pub fn new(inner: MemoryTaskStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TaskStore for RacingTaskStore {
    async fn add(&self, task: &Task) -> Result<(), StoreError> {
        self.inner.add(task).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let found = self.inner.get(id).await?;
        if let Some(task) = &found {
            let mut claimed = task.clone();
            if claimed.mark_running(Utc::now()).is_ok() {
                self.inner.save(&claimed, TaskState::Pending).await?;
            }
        }
        Ok(found)
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.list().await
    }

    async fn save(&self, task: &Task, expected: TaskState) -> Result<(), StoreError> {
        self.inner.save(task, expected).await
    }
}

/// Rechaza sólo el guardado RUNNING -> DONE; el resto pasa al store de adentro.
pub struct DoneRejectingTaskStore {
    inner: MemoryTaskStore,
}

impl DoneRejectingTaskStore {
    pub fn new(inner: MemoryTaskStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TaskStore for DoneRejectingTaskStore {
    async fn add(&self, task: &Task) -> Result<(), StoreError> {
        self.inner.add(task).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.list().await
    }

    async fn save(&self, task: &Task, expected: TaskState) -> Result<(), StoreError> {
        if expected == TaskState::Running && task.state == TaskState::Done {
            return Err(StoreError::Io(std::io::Error::other("disco lleno")));
        }
        self.inner.save(task, expected).await
    }
}
