//! Configuración por variables de entorno (todas con default).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::algorithms::GdalTools;

#[derive(Debug, Error)]
#[error("valor inválido para {var}: '{value}'")]
pub struct ConfigError {
    pub var: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_host: String,
    pub app_port: u16,
    pub app_name: String,
    pub app_version: String,
    pub debug: bool,

    /// Almacenamiento de archivos
    pub file_storage_host: String,
    pub file_storage_port: Option<u16>,
    pub file_storage_timeout: Duration,

    /// Si no está, las tareas viven sólo en memoria
    pub task_store_path: Option<PathBuf>,
    pub gdal_bin_dir: Option<PathBuf>,

    /// Worker / client
    pub master_url: String,
    pub worker_concurrency: u32,
    pub worker_poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_host: "0.0.0.0".to_string(),
            app_port: 8000,
            app_name: "Image Processing API".to_string(),
            app_version: "3.0.0".to_string(),
            debug: false,
            file_storage_host: "http://localhost".to_string(),
            file_storage_port: Some(9000),
            file_storage_timeout: Duration::from_secs(30),
            task_store_path: None,
            gdal_bin_dir: None,
            master_url: "http://localhost:8000".to_string(),
            worker_concurrency: 2,
            worker_poll_interval: Duration::from_secs(2),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una función de búsqueda inyectable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut s = Settings::default();

        if let Some(v) = get("APP_HOST") {
            s.app_host = v;
        }
        if let Some(v) = get("APP_PORT") {
            s.app_port = parse("APP_PORT", &v)?;
        }
        if let Some(v) = get("APP_NAME") {
            s.app_name = v;
        }
        if let Some(v) = get("APP_VERSION") {
            s.app_version = v;
        }
        if let Some(v) = get("DEBUG") {
            s.debug = parse_bool("DEBUG", &v)?;
        }
        if let Some(v) = get("FILE_STORAGE_HOST") {
            s.file_storage_host = v;
        }
        if let Some(v) = get("FILE_STORAGE_PORT") {
            s.file_storage_port = Some(parse("FILE_STORAGE_PORT", &v)?);
        }
        if let Some(v) = get("FILE_STORAGE_TIMEOUT") {
            s.file_storage_timeout = Duration::from_secs(parse("FILE_STORAGE_TIMEOUT", &v)?);
        }
        s.task_store_path = get("TASK_STORE_PATH").map(PathBuf::from);
        s.gdal_bin_dir = get("GDAL_BIN_DIR").map(PathBuf::from);
        if let Some(v) = get("MASTER_URL") {
            s.master_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("WORKER_CONCURRENCY") {
            s.worker_concurrency = parse::<u32>("WORKER_CONCURRENCY", &v)?.max(1);
        }
        if let Some(v) = get("WORKER_POLL_INTERVAL_SECS") {
            s.worker_poll_interval = Duration::from_secs(parse("WORKER_POLL_INTERVAL_SECS", &v)?);
        }

        Ok(s)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.app_host, self.app_port)
    }

    pub fn gdal_tools(&self) -> GdalTools {
        GdalTools::new(self.gdal_bin_dir.clone())
    }

    /// Filtro de tracing por defecto cuando no hay RUST_LOG.
    pub fn log_filter(&self, crate_name: &str) -> String {
        if self.debug {
            format!("{crate_name}=debug,common=debug,tower_http=debug")
        } else {
            format!("{crate_name}=info,common=info,tower_http=info")
        }
    }
}

fn parse<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn sin_variables_usa_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.bind_addr(), "0.0.0.0:8000");
        assert_eq!(s.file_storage_port, Some(9000));
        assert_eq!(s.file_storage_timeout, Duration::from_secs(30));
        assert!(s.task_store_path.is_none());
        assert!(!s.debug);
    }

    #[test]
    fn variables_sobreescriben() {
        let s = settings(&[
            ("APP_PORT", "9090"),
            ("DEBUG", "true"),
            ("TASK_STORE_PATH", "/data/tasks.json"),
            ("MASTER_URL", "http://master:8000/"),
            ("WORKER_CONCURRENCY", "0"),
        ])
        .unwrap();
        assert_eq!(s.app_port, 9090);
        assert!(s.debug);
        assert_eq!(s.task_store_path, Some(PathBuf::from("/data/tasks.json")));
        assert_eq!(s.master_url, "http://master:8000");
        assert_eq!(s.worker_concurrency, 1);
        assert!(s.log_filter("master").starts_with("master=debug"));
    }

    #[test]
    fn valor_invalido_nombra_la_variable() {
        let err = settings(&[("APP_PORT", "ochenta")]).unwrap_err();
        assert_eq!(err.var, "APP_PORT");
        assert!(settings(&[("DEBUG", "quizas")]).is_err());
    }
}
