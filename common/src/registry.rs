//! Registro de algoritmos
//!
//! Mapa de sólo-agregado entre el nombre (normalizado a mayúsculas) y el
//! descriptor del algoritmo. Se arma una sola vez al arrancar el proceso y
//! después sólo se lee, así que se comparte con `Arc` sin locks.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::info;

use crate::algorithms;
use crate::api::{AlgorithmInfo, AvailableAlgorithms};
use crate::params::{self, InvalidParams, ParamSchema, ValidatedParams};

/// Punto de entrada de ejecución de un algoritmo: bytes de entrada -> bytes de salida.
#[async_trait]
pub trait Algorithm: Send + Sync {
    async fn run(
        &self,
        input: Bytes,
        file_ext: &str,
        params: &ValidatedParams,
    ) -> anyhow::Result<Vec<u8>>;
}

pub struct AlgorithmDescriptor {
    pub name: String,
    pub description: String,
    pub schema: ParamSchema,
    pub runner: Arc<dyn Algorithm>,
}

impl AlgorithmDescriptor {
    pub fn new(
        name: &str,
        description: &str,
        schema: ParamSchema,
        runner: Arc<dyn Algorithm>,
    ) -> Self {
        Self {
            name: name.to_uppercase(),
            description: description.to_string(),
            schema,
            runner,
        }
    }

    pub fn validate(&self, raw: &Value) -> Result<ValidatedParams, InvalidParams> {
        params::validate(&self.schema, raw)
    }

    /// `{description, schema}` para el listado de algoritmos disponibles.
    /// Descripción + JSON Schema, para el endpoint de descubrimiento.
    pub fn info(&self) -> AlgorithmInfo {
        AlgorithmInfo {
            description: self.description.clone(),
            schema: self.schema.to_json_schema(),
        }
    }
}

impl std::fmt::Debug for AlgorithmDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmDescriptor")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("el algoritmo '{0}' ya está registrado")]
    DuplicateAlgorithm(String),
    #[error("algoritmo '{0}' no encontrado")]
    AlgorithmNotFound(String),
    #[error("el registro global de algoritmos ya fue inicializado")]
    AlreadyInitialized,
}

#[derive(Debug, Default)]
pub struct AlgorithmRegistry {
    entries: Vec<Arc<AlgorithmDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registro con los algoritmos que trae el servicio.
    pub fn builtin(gdal: algorithms::GdalTools) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for descriptor in algorithms::builtin(gdal) {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, mut descriptor: AlgorithmDescriptor) -> Result<(), RegistryError> {
        let key = descriptor.name.to_uppercase();
        if self.by_name.contains_key(&key) {
            return Err(RegistryError::DuplicateAlgorithm(key));
        }
        descriptor.name = key.clone();

        info!("algoritmo registrado: {}", key);
        self.by_name.insert(key, self.entries.len());
        self.entries.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<AlgorithmDescriptor>, RegistryError> {
        let key = name.to_uppercase();
        self.by_name
            .get(&key)
            .map(|&idx| Arc::clone(&self.entries[idx]))
            .ok_or(RegistryError::AlgorithmNotFound(key))
    }

    /// Descriptores en orden de registro.
    pub fn list(&self) -> &[Arc<AlgorithmDescriptor>] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn available(&self) -> AvailableAlgorithms {
        self.entries
            .iter()
            .map(|d| (d.name.clone(), d.info()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/* --------- instancia global del proceso --------- */

static GLOBAL: OnceLock<Arc<AlgorithmRegistry>> = OnceLock::new();

/// Instala el registro del proceso. Se llama una vez al arrancar, antes de atender requests.
pub fn init(registry: AlgorithmRegistry) -> Result<(), RegistryError> {
    GLOBAL
        .set(Arc::new(registry))
        .map_err(|_| RegistryError::AlreadyInitialized)
}

pub fn global() -> Option<Arc<AlgorithmRegistry>> {
    GLOBAL.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::FieldSpec;
    use crate::testing::EchoAlgorithm;

    fn descriptor(name: &str) -> AlgorithmDescriptor {
        AlgorithmDescriptor::new(
            name,
            "prueba",
            ParamSchema::new().field(FieldSpec::float("xres").required()),
            Arc::new(EchoAlgorithm),
        )
    }

    #[test]
    fn resolve_no_distingue_mayusculas() {
        let mut reg = AlgorithmRegistry::new();
        reg.register(descriptor("raster_rescale")).unwrap();

        let a = reg.resolve("raster_rescale").unwrap();
        let b = reg.resolve("RASTER_RESCALE").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name, "RASTER_RESCALE");
    }

    #[test]
    fn registrar_dos_veces_el_mismo_nombre_falla() {
        let mut reg = AlgorithmRegistry::new();
        reg.register(descriptor("Raster_Rescale")).unwrap();
        let err = reg.register(descriptor("RASTER_RESCALE")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateAlgorithm("RASTER_RESCALE".into()));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn resolve_de_nombre_desconocido_falla() {
        let reg = AlgorithmRegistry::new();
        assert_eq!(
            reg.resolve("nope").unwrap_err(),
            RegistryError::AlgorithmNotFound("NOPE".into())
        );
    }

    #[test]
    fn list_respeta_orden_de_registro() {
        let mut reg = AlgorithmRegistry::new();
        for name in ["b_algo", "a_algo", "c_algo"] {
            reg.register(descriptor(name)).unwrap();
        }
        assert_eq!(reg.names(), vec!["B_ALGO", "A_ALGO", "C_ALGO"]);
    }

    #[test]
    fn builtin_trae_rescale_y_transform() {
        let reg = AlgorithmRegistry::builtin(algorithms::GdalTools::default()).unwrap();
        assert!(reg.resolve("raster_rescale").is_ok());
        assert!(reg.resolve("vector_transform").is_ok());
    }

    #[test]
    fn available_expone_descripcion_y_esquema() {
        let mut reg = AlgorithmRegistry::new();
        reg.register(descriptor("echo")).unwrap();
        let available = reg.available();
        let info = &available["ECHO"];
        assert_eq!(info.description, "prueba");
        assert_eq!(info.schema["required"], serde_json::json!(["xres"]));
    }

    #[test]
    fn init_global_solo_una_vez() {
        let mut reg = AlgorithmRegistry::new();
        reg.register(descriptor("primero")).unwrap();
        init(reg).unwrap();

        let mut other = AlgorithmRegistry::new();
        other.register(descriptor("segundo")).unwrap();
        assert_eq!(init(other).unwrap_err(), RegistryError::AlreadyInitialized);

        let installed = global().unwrap();
        assert_eq!(installed.names(), vec!["PRIMERO"]);
        assert!(Arc::ptr_eq(&installed, &global().unwrap()));
    }
}
