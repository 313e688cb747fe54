//! Cuerpos JSON que viajan entre master, worker y client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::params::FieldViolation;
use crate::task::TaskId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub algorithm: String,
    pub input_file_id: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// `{"detail": ...}` más campos opcionales según el error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<FieldViolation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            violations: Vec::new(),
            task_id: None,
            code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmInfo {
    pub description: String,
    pub schema: Value,
}

/// Respuesta de `GET /api/tasks/available-algorithms`, ordenada por nombre.
pub type AvailableAlgorithms = BTreeMap<String, AlgorithmInfo>;
