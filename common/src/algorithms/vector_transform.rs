use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;

use super::{run_on_temp_files, GdalTools};
use crate::params::{FieldSpec, ParamSchema, ValidatedParams};
use crate::registry::Algorithm;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VectorTransformParams {
    pub srs_def: String,
    pub s_srs: Option<String>,
}

/// VECTOR_TRANSFORM: reproyección con `ogr2ogr -t_srs`.
pub struct VectorTransform {
    gdal: GdalTools,
}

impl VectorTransform {
    pub fn new(gdal: GdalTools) -> Self {
        Self { gdal }
    }

    pub fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(
                FieldSpec::string("srs_def")
                    .required()
                    .describe("Sistema de coordenadas destino (ej: 'EPSG:4326')"),
            )
            .field(
                FieldSpec::string("s_srs")
                    .describe("Sistema de coordenadas origen (opcional, si no se detecta solo)"),
            )
    }

    // ogr2ogr recibe primero el destino y después el origen
    fn args(params: &VectorTransformParams, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-t_srs".into(), params.srs_def.clone().into()];
        if let Some(s_srs) = &params.s_srs {
            args.push("-s_srs".into());
            args.push(s_srs.clone().into());
        }
        args.push(output.as_os_str().to_owned());
        args.push(input.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Algorithm for VectorTransform {
    async fn run(&self, input: Bytes, file_ext: &str, params: &ValidatedParams) -> Result<Vec<u8>> {
        let params: VectorTransformParams = params.decode()?;
        let program = self.gdal.program("ogr2ogr");
        run_on_temp_files(&program, &input, file_ext, |i, o| Self::args(&params, i, o)).await
    }
}
