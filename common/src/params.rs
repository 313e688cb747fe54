//! Validación genérica de parámetros de algoritmos.
//!
//! Cada algoritmo declara un [`ParamSchema`]; [`validate`] no sabe nada de
//! algoritmos concretos, sólo recorre los campos del esquema.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Float,
    Integer,
    String,
    Bool,
}

impl FieldKind {
    fn json_type(self) -> &'static str {
        match self {
            FieldKind::Float => "number",
            FieldKind::Integer => "integer",
            FieldKind::String => "string",
            FieldKind::Bool => "boolean",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_type())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Cotas numéricas (sólo para Float / Integer)
    pub minimum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl FieldSpec {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
            description: None,
            minimum: None,
            exclusive_minimum: None,
            maximum: None,
        }
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn bool(name: &str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn min(mut self, bound: f64) -> Self {
        self.minimum = Some(bound);
        self
    }

    pub fn greater_than(mut self, bound: f64) -> Self {
        self.exclusive_minimum = Some(bound);
        self
    }

    pub fn max(mut self, bound: f64) -> Self {
        self.maximum = Some(bound);
        self
    }

    /// Convierte el valor recibido a su forma normalizada o devuelve el motivo del rechazo.
    fn coerce(&self, raw: &Value) -> Result<Value, String> {
        let normalized = match self.kind {
            FieldKind::Float => match raw.as_f64() {
                Some(n) => json!(n),
                _ => return Err(format!("se esperaba un número, llegó {}", type_name(raw))),
            },
            FieldKind::Integer => {
                if let Some(n) = raw.as_i64() {
                    json!(n)
                } else if raw.as_u64().is_some() {
                    return Err(format!("fuera de rango, debe ser <= {}", i64::MAX));
                } else if let Some(f) = raw.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0) {
                    // i64::MAX as f64 ya es 2^63, fuera de rango
                    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
                        return Err(format!(
                            "fuera de rango, debe estar entre {} y {}",
                            i64::MIN,
                            i64::MAX
                        ));
                    }
                    json!(f as i64)
                } else {
                    return Err(format!("se esperaba un entero, llegó {}", type_name(raw)));
                }
            }
            FieldKind::String => match raw {
                Value::String(_) => raw.clone(),
                _ => return Err(format!("se esperaba un string, llegó {}", type_name(raw))),
            },
            FieldKind::Bool => match raw {
                Value::Bool(_) => raw.clone(),
                _ => return Err(format!("se esperaba un booleano, llegó {}", type_name(raw))),
            },
        };

        if let Some(n) = normalized.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    return Err(format!("debe ser >= {min}"));
                }
            }
            if let Some(min) = self.exclusive_minimum {
                if n <= min {
                    return Err(format!("debe ser > {min}"));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Err(format!("debe ser <= {max}"));
                }
            }
        }

        Ok(normalized)
    }

    fn json_schema(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(self.kind.json_type()));
        if let Some(d) = &self.description {
            prop.insert("description".into(), json!(d));
        }
        if let Some(d) = &self.default {
            prop.insert("default".into(), d.clone());
        }
        if let Some(m) = self.minimum {
            prop.insert("minimum".into(), json!(m));
        }
        if let Some(m) = self.exclusive_minimum {
            prop.insert("exclusiveMinimum".into(), json!(m));
        }
        if let Some(m) = self.maximum {
            prop.insert("maximum".into(), json!(m));
        }
        Value::Object(prop)
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Esquema de parámetros de un algoritmo (orden de declaración preservado).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    pub fields: Vec<FieldSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Representación JSON Schema, para publicar los algoritmos disponibles.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Parámetros que no cumplen el esquema. Lleva todas las violaciones encontradas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct InvalidParams {
    pub violations: Vec<FieldViolation>,
}

impl fmt::Display for InvalidParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("parámetros inválidos: ")?;
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", v.field, v.message)?;
        }
        Ok(())
    }
}

/// Parámetros normalizados: todos los campos declarados, nada más.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedParams(Map<String, Value>);

impl ValidatedParams {
    pub(crate) fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self(Map::new()),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Deserializa al struct tipado del algoritmo.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl fmt::Display for ValidatedParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

pub fn validate(schema: &ParamSchema, raw: &Value) -> Result<ValidatedParams, InvalidParams> {
    let empty = Map::new();
    let input = match raw {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(InvalidParams {
                violations: vec![FieldViolation {
                    field: "$".into(),
                    message: format!("se esperaba un objeto, llegó {}", type_name(other)),
                }],
            })
        }
    };

    let mut out = Map::new();
    let mut violations = Vec::new();

    for spec in &schema.fields {
        let value = match input.get(&spec.name) {
            None | Some(Value::Null) if spec.required => {
                violations.push(FieldViolation {
                    field: spec.name.clone(),
                    message: "campo requerido".into(),
                });
                continue;
            }
            // null explícito en un opcional vale lo mismo que no mandarlo
            None | Some(Value::Null) => spec.default.clone().unwrap_or(Value::Null),
            Some(v) => match spec.coerce(v) {
                Ok(normalized) => normalized,
                Err(message) => {
                    violations.push(FieldViolation {
                        field: spec.name.clone(),
                        message,
                    });
                    continue;
                }
            },
        };
        out.insert(spec.name.clone(), value);
    }

    if violations.is_empty() {
        Ok(ValidatedParams(out))
    } else {
        Err(InvalidParams { violations })
    }
}
