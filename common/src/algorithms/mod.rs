//! Algoritmos incluidos en el servicio.
//!
//! El procesamiento geoespacial en sí lo hacen las herramientas de línea de
//! comandos de GDAL; acá sólo se arma la invocación sobre archivos temporales.

mod raster_rescale;
mod vector_transform;

pub use raster_rescale::{RasterRescale, RasterRescaleParams};
pub use vector_transform::{VectorTransform, VectorTransformParams};

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::registry::AlgorithmDescriptor;

/// Dónde buscar los ejecutables de GDAL (`None` = resolverlos por PATH).
#[derive(Debug, Clone, Default)]
pub struct GdalTools {
    pub bin_dir: Option<PathBuf>,
}

impl GdalTools {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    pub fn program(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

pub fn builtin(gdal: GdalTools) -> Vec<AlgorithmDescriptor> {
    vec![
        AlgorithmDescriptor::new(
            "RASTER_RESCALE",
            "Cambia la resolución de un raster (gdalwarp -tr)",
            RasterRescale::schema(),
            Arc::new(RasterRescale::new(gdal.clone())),
        ),
        AlgorithmDescriptor::new(
            "VECTOR_TRANSFORM",
            "Reproyecta datos vectoriales a otro sistema de coordenadas (ogr2ogr)",
            VectorTransform::schema(),
            Arc::new(VectorTransform::new(gdal)),
        ),
    ]
}

/// Nombre de archivo con la extensión original, si la hay.
pub(crate) fn file_name(stem: &str, ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{ext}")
    }
}

/// Escribe la entrada en un directorio temporal, corre la herramienta y devuelve la salida.
/// `build_args` recibe (entrada, salida).
pub(crate) async fn run_on_temp_files<F>(
    program: &Path,
    input: &[u8],
    file_ext: &str,
    build_args: F,
) -> Result<Vec<u8>>
where
    F: FnOnce(&Path, &Path) -> Vec<OsString>,
{
    let dir = tempfile::tempdir().context("no se pudo crear directorio temporal")?;
    let in_path = dir.path().join(file_name("in", file_ext));
    let out_path = dir.path().join(file_name("out", file_ext));

    tokio::fs::write(&in_path, input)
        .await
        .with_context(|| format!("no se pudo escribir {}", in_path.display()))?;

    let args = build_args(&in_path, &out_path);
    debug!("ejecutando {} {:?}", program.display(), args);

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("no se pudo lanzar {}", program.display()))?;

    if !output.status.success() {
        bail!(
            "{} terminó con {}: {}",
            program.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let bytes = tokio::fs::read(&out_path).await.with_context(|| {
        format!("{} no generó el archivo de salida", program.display())
    })?;
    Ok(bytes)
}
