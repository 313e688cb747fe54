use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::params::ValidatedParams;

pub type TaskId = Uuid;

/// Estados del ciclo de vida: PENDING -> RUNNING -> {DONE, ERROR}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Error,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Done => "DONE",
            TaskState::Error => "ERROR",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TaskState::Pending),
            "RUNNING" => Ok(TaskState::Running),
            "DONE" => Ok(TaskState::Done),
            "ERROR" => Ok(TaskState::Error),
            other => Err(format!("estado desconocido: {other}")),
        }
    }
}

/// Códigos de error gruesos que se guardan en la tarea cuando termina en ERROR.
/// Se serializan como número.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ErrorCode {
    UnknownError,
    AlgorithmExecutionFailed,
    FileCreationFailed,
    InvalidInputParams,
    InputFileNotFound,
    OutputFileAlreadyExists,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::UnknownError => 500,
            ErrorCode::AlgorithmExecutionFailed => 501,
            ErrorCode::FileCreationFailed => 502,
            ErrorCode::InvalidInputParams => 401,
            ErrorCode::InputFileNotFound => 402,
            ErrorCode::OutputFileAlreadyExists => 403,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            500 => Ok(ErrorCode::UnknownError),
            501 => Ok(ErrorCode::AlgorithmExecutionFailed),
            502 => Ok(ErrorCode::FileCreationFailed),
            401 => Ok(ErrorCode::InvalidInputParams),
            402 => Ok(ErrorCode::InputFileNotFound),
            403 => Ok(ErrorCode::OutputFileAlreadyExists),
            other => Err(format!("código de error desconocido: {other}")),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::AlgorithmExecutionFailed => "ALGORITHM_EXECUTION_FAILED",
            ErrorCode::FileCreationFailed => "FILE_CREATION_FAILED",
            ErrorCode::InvalidInputParams => "INVALID_INPUT_PARAMS",
            ErrorCode::InputFileNotFound => "INPUT_FILE_NOT_FOUND",
            ErrorCode::OutputFileAlreadyExists => "OUTPUT_FILE_ALREADY_EXISTS",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Transición de estado no permitida por la máquina de estados.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transición inválida de {from} a {to}")]
pub struct TransitionError {
    pub from: TaskState,
    pub to: TaskState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Nombre normalizado (mayúsculas) del algoritmo
    pub algorithm: String,
    pub state: TaskState,

    pub input_file_id: String,
    /// Parámetros ya validados contra el esquema del algoritmo
    pub params: Value,

    pub output_file_id: Option<String>,
    pub output_file_full_path: Option<String>,

    pub datetime_create: DateTime<Utc>,
    pub datetime_start: Option<DateTime<Utc>>,
    pub datetime_end: Option<DateTime<Utc>>,

    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl Task {
    /// Tarea nueva en PENDING. Sólo se construye con parámetros validados.
    pub fn new_pending(
        algorithm: impl Into<String>,
        input_file_id: impl Into<String>,
        params: ValidatedParams,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            algorithm: algorithm.into(),
            state: TaskState::Pending,
            input_file_id: input_file_id.into(),
            params: params.into_value(),
            output_file_id: None,
            output_file_full_path: None,
            datetime_create: now,
            datetime_start: None,
            datetime_end: None,
            error: None,
            error_code: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(TaskState::Pending, TaskState::Running)?;
        self.state = TaskState::Running;
        self.datetime_start = Some(now);
        Ok(())
    }

    pub fn mark_done(
        &mut self,
        output_file_id: String,
        output_file_full_path: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check(TaskState::Running, TaskState::Done)?;
        self.state = TaskState::Done;
        self.output_file_id = Some(output_file_id);
        self.output_file_full_path = Some(output_file_full_path);
        self.datetime_end = Some(now);
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        code: ErrorCode,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check(TaskState::Running, TaskState::Error)?;
        self.state = TaskState::Error;
        self.error = Some(message.into());
        self.error_code = Some(code);
        self.datetime_end = Some(now);
        Ok(())
    }

    fn check(&self, expected: TaskState, to: TaskState) -> Result<(), TransitionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.state,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending() -> Task {
        let params = ValidatedParams::from_value(json!({"xres": 10.0, "yres": 10.0}));
        Task::new_pending("RASTER_RESCALE", "f1", params, Utc::now())
    }

    #[test]
    fn tarea_nueva_queda_en_pending_sin_fechas_ni_salida() {
        let t = pending();
        assert_eq!(t.state, TaskState::Pending);
        assert!(t.datetime_start.is_none());
        assert!(t.datetime_end.is_none());
        assert!(t.output_file_id.is_none());
        assert!(t.error.is_none());
    }

    #[test]
    fn flujo_feliz_pending_running_done() {
        let mut t = pending();
        let start = Utc::now();
        t.mark_running(start).unwrap();
        assert_eq!(t.datetime_start, Some(start));

        t.mark_done("out".into(), "/a/processed_x.tif".into(), Utc::now())
            .unwrap();
        assert_eq!(t.state, TaskState::Done);
        assert_eq!(t.output_file_id.as_deref(), Some("out"));
        assert!(t.error_code.is_none());
    }

    #[test]
    fn no_se_puede_salir_de_un_estado_terminal() {
        let mut t = pending();
        t.mark_running(Utc::now()).unwrap();
        t.mark_failed(ErrorCode::InputFileNotFound, "no existe", Utc::now())
            .unwrap();

        let err = t.mark_running(Utc::now()).unwrap_err();
        assert_eq!(err.from, TaskState::Error);
        assert!(t
            .mark_done("x".into(), "y".into(), Utc::now())
            .is_err());
        assert_eq!(t.error_code, Some(ErrorCode::InputFileNotFound));
        assert!(t.output_file_id.is_none());
    }

    #[test]
    fn pending_no_puede_pasar_directo_a_done() {
        let mut t = pending();
        assert!(t.mark_done("x".into(), "y".into(), Utc::now()).is_err());
        assert_eq!(t.state, TaskState::Pending);
    }

    #[test]
    fn error_code_se_serializa_como_numero() {
        let v = serde_json::to_value(ErrorCode::OutputFileAlreadyExists).unwrap();
        assert_eq!(v, json!(403));
        let back: ErrorCode = serde_json::from_value(json!(402)).unwrap();
        assert_eq!(back, ErrorCode::InputFileNotFound);
        assert!(serde_json::from_value::<ErrorCode>(json!(999)).is_err());
    }

    #[test]
    fn estado_se_parsea_sin_importar_mayusculas() {
        assert_eq!("pending".parse::<TaskState>(), Ok(TaskState::Pending));
        assert!("otro".parse::<TaskState>().is_err());
        assert_eq!(serde_json::to_value(TaskState::Done).unwrap(), json!("DONE"));
    }
}
