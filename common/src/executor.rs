//! Ejecución de una tarea de punta a punta.
//!
//! PENDING -> RUNNING (persistido antes de cualquier llamada lenta) ->
//! DONE o ERROR (persistido antes de devolver). Un solo intento por llamada.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::files::{FileMeta, FileStore, FileStoreError, NewFile};
use crate::params::ValidatedParams;
use crate::registry::AlgorithmRegistry;
use crate::store::{StoreError, TaskStore};
use crate::task::{ErrorCode, Task, TaskId, TaskState};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("la tarea {0} no existe")]
    TaskNotFound(TaskId),
    #[error("la tarea {id} no está PENDING (estado actual: {state})")]
    NotPending { id: TaskId, state: TaskState },
    #[error("la tarea {0} ya fue tomada por otro ejecutor")]
    AlreadyClaimed(TaskId),
    #[error("falló la ejecución de la tarea {task_id} [{code}]: {message}")]
    Execution {
        task_id: TaskId,
        code: ErrorCode,
        message: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Motivo de fallo que termina guardado en la tarea.
#[derive(Debug)]
struct Failure {
    code: ErrorCode,
    message: String,
}

impl Failure {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn fetching(e: FileStoreError) -> Self {
        let code = match e {
            FileStoreError::NotFound(_) => ErrorCode::InputFileNotFound,
            _ => ErrorCode::UnknownError,
        };
        Self::new(code, e.to_string())
    }

    fn uploading(e: FileStoreError) -> Self {
        let code = match e {
            FileStoreError::AlreadyExists(_) => ErrorCode::OutputFileAlreadyExists,
            _ => ErrorCode::FileCreationFailed,
        };
        Self::new(code, e.to_string())
    }
}

#[derive(Clone)]
pub struct Executor {
    registry: Arc<AlgorithmRegistry>,
    store: Arc<dyn TaskStore>,
    files: Arc<dyn FileStore>,
}

impl Executor {
    pub fn new(
        registry: Arc<AlgorithmRegistry>,
        store: Arc<dyn TaskStore>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            registry,
            store,
            files,
        }
    }

    /// Corre la tarea y devuelve la tarea en DONE. Cualquier fallo a partir de
    /// RUNNING queda guardado en la tarea (ERROR) antes de devolverse.
    pub async fn execute(&self, task_id: TaskId) -> Result<Task, ExecuteError> {
        let mut task = self
            .store
            .get(task_id)
            .await?
            .ok_or(ExecuteError::TaskNotFound(task_id))?;

        if task.mark_running(Utc::now()).is_err() {
            return Err(ExecuteError::NotPending {
                id: task_id,
                state: task.state,
            });
        }
        match self.store.save(&task, TaskState::Pending).await {
            Ok(()) => {}
            Err(StoreError::StaleState { .. }) => return Err(ExecuteError::AlreadyClaimed(task_id)),
            Err(e) => return Err(e.into()),
        }

        info!("tarea {} en RUNNING (algoritmo={})", task.id, task.algorithm);
        let started = Instant::now();

        let uploaded = match self.process(&task).await {
            Ok(meta) => meta,
            Err(failure) => return Err(self.fail(task, failure).await),
        };

        // `task` queda en RUNNING por si hay que registrar el fallo del guardado
        let mut done = task.clone();
        if let Err(e) = done.mark_done(uploaded.uuid.clone(), uploaded.full_path(), Utc::now()) {
            error!("tarea {}: {}", task.id, e);
            return Err(ExecuteError::NotPending {
                id: task.id,
                state: task.state,
            });
        }

        if let Err(e) = self.store.save(&done, TaskState::Running).await {
            error!("no se pudo guardar el resultado de la tarea {}: {}", task.id, e);
            let failure = Failure::new(
                ErrorCode::UnknownError,
                format!("no se pudo guardar el resultado: {e}"),
            );
            let _ = self.fail(task, failure).await;
            return Err(e.into());
        }

        info!(
            "tarea {} DONE en {:?} -> {} ({})",
            done.id,
            started.elapsed(),
            uploaded.uuid,
            uploaded.full_path()
        );
        Ok(done)
    }

    /// Pasos 3 a 6: resolver, validar, bajar, correr, subir.
    async fn process(&self, task: &Task) -> Result<FileMeta, Failure> {
        let descriptor = self
            .registry
            .resolve(&task.algorithm)
            .map_err(|e| Failure::new(ErrorCode::InvalidInputParams, e.to_string()))?;
        let params = descriptor
            .validate(&task.params)
            .map_err(|e| Failure::new(ErrorCode::InvalidInputParams, e.to_string()))?;

        let meta = self
            .files
            .get_file_meta(&task.input_file_id)
            .await
            .map_err(Failure::fetching)?;
        let input = self
            .files
            .get_file(&task.input_file_id)
            .await
            .map_err(Failure::fetching)?;

        info!(
            "tarea {}: corriendo {} sobre {} ({} bytes)",
            task.id,
            descriptor.name,
            meta.full_path(),
            input.len()
        );

        let output = descriptor
            .runner
            .run(input, &meta.file_extension, &params)
            .await
            .map_err(|e| Failure::new(ErrorCode::AlgorithmExecutionFailed, format!("{e:#}")))?;

        let new_file = NewFile {
            filename: format!("processed_{}", meta.filename),
            file_extension: meta.file_extension.clone(),
            path: meta.path.clone(),
            content: output,
            comment: Some(provenance(&meta, &descriptor.name, &params)),
        };
        self.files
            .post_file(new_file)
            .await
            .map_err(Failure::uploading)
    }

    /// Camino de error: ERROR + mensaje + código, persistido antes de avisar al llamador.
    async fn fail(&self, mut task: Task, failure: Failure) -> ExecuteError {
        warn!(
            "tarea {} falló [{}]: {}",
            task.id, failure.code, failure.message
        );

        if let Err(e) = task.mark_failed(failure.code, failure.message.clone(), Utc::now()) {
            error!("tarea {}: {}", task.id, e);
            return ExecuteError::NotPending {
                id: task.id,
                state: task.state,
            };
        }
        if let Err(e) = self.store.save(&task, TaskState::Running).await {
            error!("no se pudo guardar el ERROR de la tarea {}: {}", task.id, e);
            return ExecuteError::Store(e);
        }

        ExecuteError::Execution {
            task_id: task.id,
            code: failure.code,
            message: failure.message,
        }
    }
}

fn provenance(meta: &FileMeta, algorithm: &str, params: &ValidatedParams) -> String {
    format!(
        "Processed file: {}\nuuid: {}\nalgorithm: {}\nparams: {}",
        meta.filename, meta.uuid, algorithm, params
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use crate::tasks::TaskService;
    use crate::testing::{registry_with_echo, MemoryFileStore};
    use serde_json::json;

    struct Fixture {
        service: TaskService,
        executor: Executor,
        store: MemoryTaskStore,
        files: Arc<MemoryFileStore>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(registry_with_echo());
        let store = MemoryTaskStore::new();
        let files = Arc::new(MemoryFileStore::new());
        Fixture {
            service: TaskService::new(registry.clone(), Arc::new(store.clone())),
            executor: Executor::new(registry, Arc::new(store.clone()), files.clone()),
            store,
            files,
        }
    }

    async fn rescale_task(f: &Fixture, input: &str) -> Task {
        f.service
            .create("RASTER_RESCALE", input, &json!({"xres": 10, "yres": 10}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ejecucion_exitosa_termina_en_done() {
        let f = fixture();
        let input = f.files.insert("dem", "tif", "/docs/", b"raster");
        let task = rescale_task(&f, &input).await;

        let done = f.executor.execute(task.id).await.unwrap();

        assert_eq!(done.state, TaskState::Done);
        assert!(done.output_file_id.is_some());
        assert_eq!(
            done.output_file_full_path.as_deref(),
            Some("/docs/processed_dem.tif")
        );
        assert!(done.datetime_start.unwrap() < done.datetime_end.unwrap());
        assert!(done.error.is_none() && done.error_code.is_none());
        assert_eq!(f.store.get(task.id).await.unwrap(), Some(done.clone()));

        let posted = f.files.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].content, b"raster".to_vec());
        let comment = posted[0].comment.as_deref().unwrap();
        assert!(comment.contains(&format!("uuid: {input}")));
        assert!(comment.contains("algorithm: RASTER_RESCALE"));
    }

    #[tokio::test]
    async fn archivo_de_entrada_inexistente_termina_en_error_402() {
        let f = fixture();
        let task = rescale_task(&f, "no-existe").await;

        let err = f.executor.execute(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Execution {
                code: ErrorCode::InputFileNotFound,
                ..
            }
        ));

        let stored = f.store.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Error);
        assert_eq!(stored.error_code, Some(ErrorCode::InputFileNotFound));
        assert!(stored.error.is_some());
        assert!(stored.output_file_id.is_none());
        assert!(stored.datetime_end.is_some());
    }

    #[tokio::test]
    async fn tarea_inexistente_no_muta_nada() {
        let f = fixture();
        let existing = rescale_task(&f, "x").await;
        let before = f.store.list().await.unwrap();

        let err = f.executor.execute(uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ExecuteError::TaskNotFound(_)));
        assert_eq!(f.store.list().await.unwrap(), before);
        assert_eq!(before[0].id, existing.id);
    }

    #[tokio::test]
    async fn segunda_ejecucion_se_rechaza_y_no_pisa_el_estado() {
        let f = fixture();
        let input = f.files.insert("dem", "tif", "/docs/", b"raster");
        let task = rescale_task(&f, &input).await;

        let first = f.executor.execute(task.id).await.unwrap();
        let err = f.executor.execute(task.id).await.unwrap_err();

        assert!(matches!(
            err,
            ExecuteError::NotPending {
                state: TaskState::Done,
                ..
            }
        ));
        assert_eq!(f.store.get(task.id).await.unwrap(), Some(first));
        assert_eq!(f.files.posted().len(), 1);
    }

    #[tokio::test]
    async fn falla_del_algoritmo_es_501() {
        let f = fixture();
        let input = f.files.insert("dem", "tif", "/docs/", b"raster");
        let task = f
            .service
            .create("FAILING", &input, &json!({}))
            .await
            .unwrap();

        let err = f.executor.execute(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Execution {
                code: ErrorCode::AlgorithmExecutionFailed,
                ..
            }
        ));
        let stored = f.store.get(task.id).await.unwrap().unwrap();
        assert!(stored.error.unwrap().contains("explotó"));
        assert!(f.files.posted().is_empty());
    }

    #[tokio::test]
    async fn salida_existente_es_403() {
        let f = fixture();
        let input = f.files.insert("dem", "tif", "/docs/", b"raster");
        f.files.insert("processed_dem", "tif", "/docs/", b"viejo");
        let task = rescale_task(&f, &input).await;

        let err = f.executor.execute(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Execution {
                code: ErrorCode::OutputFileAlreadyExists,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn otro_error_al_subir_es_502() {
        let f = fixture();
        let input = f.files.insert("dem", "tif", "/docs/", b"raster");
        f.files.fail_uploads_with(FileStoreError::Api {
            status: 500,
            body: "boom".into(),
        });
        let task = rescale_task(&f, &input).await;

        let err = f.executor.execute(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Execution {
                code: ErrorCode::FileCreationFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn error_del_almacenamiento_al_bajar_es_500() {
        let f = fixture();
        let input = f.files.insert("dem", "tif", "/docs/", b"raster");
        f.files.fail_fetches_with(FileStoreError::Transport("conexión rechazada".into()));
        let task = rescale_task(&f, &input).await;

        let err = f.executor.execute(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Execution {
                code: ErrorCode::UnknownError,
                ..
            }
        ));
        let stored = f.store.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Error);
        assert_eq!(stored.error_code, Some(ErrorCode::UnknownError));
        assert!(stored.error.unwrap().contains("conexión rechazada"));
    }

    #[tokio::test]
    async fn fallo_al_guardar_done_deja_error_500_y_devuelve_store() {
        let f = fixture();
        let input = f.files.insert("dem", "tif", "/docs/", b"raster");
        let task = rescale_task(&f, &input).await;

        let executor = Executor::new(
            Arc::new(registry_with_echo()),
            Arc::new(crate::testing::DoneRejectingTaskStore::new(f.store.clone())),
            f.files.clone(),
        );
        let err = executor.execute(task.id).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Store(_)));

        let stored = f.store.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Error);
        assert_eq!(stored.error_code, Some(ErrorCode::UnknownError));
        assert!(stored.output_file_id.is_none());
        assert!(stored.datetime_end.is_some());
    }

    #[tokio::test]
    async fn params_guardados_invalidos_son_401() {
        let f = fixture();
        let input = f.files.insert("dem", "tif", "/docs/", b"raster");
        let mut task = rescale_task(&f, &input).await;

        // Simula un registro que cambió el esquema después de crear la tarea
        let pending = task.clone();
        task.params = json!({"xres": "diez"});
        f.store.save(&task, TaskState::Pending).await.unwrap();

        let err = f.executor.execute(pending.id).await.unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Execution {
                code: ErrorCode::InvalidInputParams,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn claim_perdido_es_already_claimed() {
        let f = fixture();
        let task = rescale_task(&f, "x").await;

        // Otro ejecutor lo tomó entre el get y el save
        let racing = crate::testing::RacingTaskStore::new(f.store.clone());
        let executor = Executor::new(
            Arc::new(registry_with_echo()),
            Arc::new(racing),
            f.files.clone(),
        );
        let err = executor.execute(task.id).await.unwrap_err();
        assert!(matches!(err, ExecuteError::AlreadyClaimed(id) if id == task.id));
    }
}
