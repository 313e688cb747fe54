use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::api::{AvailableAlgorithms, CreateTaskRequest, ErrorBody};
use common::{ExecuteError, RegistryError, Task, TaskError, TaskId, TaskState};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/task", post(create_task))
        .route("/api/tasks/", get(list_tasks))
        .route("/api/tasks/available-algorithms", get(available_algorithms))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/run", post(run_task))
        .with_state(state)
}

/* ---------------- errores HTTP ---------------- */

const INTERNAL_ERROR_DETAIL: &str = "error interno del servidor";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::new(detail),
        }
    }

    // El detalle queda en el log; al cliente le llega un mensaje fijo
    fn internal(detail: String) -> Self {
        error!("error interno: {}", detail);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_DETAIL)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let detail = err.to_string();
        match err {
            TaskError::Algorithm(RegistryError::AlgorithmNotFound(_)) | TaskError::TaskNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, detail)
            }
            TaskError::InvalidAlgorithmParams { source, .. } => ApiError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                body: ErrorBody {
                    violations: source.violations,
                    ..ErrorBody::new(detail)
                },
            },
            _ => ApiError::internal(detail),
        }
    }
}

impl From<ExecuteError> for ApiError {
    fn from(err: ExecuteError) -> Self {
        let detail = err.to_string();
        match err {
            ExecuteError::TaskNotFound(_) => ApiError::new(StatusCode::NOT_FOUND, detail),
            ExecuteError::NotPending { .. } | ExecuteError::AlreadyClaimed(_) => {
                ApiError::new(StatusCode::CONFLICT, detail)
            }
            ExecuteError::Execution {
                task_id,
                code,
                message,
            } => ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: ErrorBody {
                    task_id: Some(task_id),
                    code: Some(code.code()),
                    ..ErrorBody::new(message)
                },
            },
            ExecuteError::Store(_) => ApiError::internal(detail),
        }
    }
}

// Un id que no es UUID no puede existir
fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, format!("la tarea {raw} no existe")))
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let params = req.params.unwrap_or(Value::Null);
    let task = state
        .tasks
        .create(&req.algorithm, &req.input_file_id, &params)
        .await
        .inspect_err(|e| warn!("no se creó la tarea ({}): {}", req.algorithm, e))?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    state: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = match query.state.as_deref() {
        Some(raw) => {
            let wanted: TaskState = raw
                .parse()
                .map_err(|e: String| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e))?;
            state.tasks.list_by_state(wanted).await?
        }
        None => state.tasks.list().await?,
    };
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    Ok(Json(state.tasks.get(id).await?))
}

// Ejecuta la tarea en el request; responde cuando queda DONE o ERROR
async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    info!("ejecución pedida para la tarea {}", id);

    match state.executor.execute(id).await {
        Ok(task) => Ok(Json(task)),
        Err(e @ (ExecuteError::NotPending { .. } | ExecuteError::AlreadyClaimed(_))) => {
            debug!("run rechazado: {}", e);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn available_algorithms(State(state): State<AppState>) -> Json<AvailableAlgorithms> {
    Json(state.tasks.registry().available())
}
