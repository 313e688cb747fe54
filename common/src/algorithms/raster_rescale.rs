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
pub struct RasterRescaleParams {
    pub xres: f64,
    pub yres: f64,
}

/// RASTER_RESCALE: cambia el tamaño de pixel con `gdalwarp -tr`.
pub struct RasterRescale {
    gdal: GdalTools,
}

impl RasterRescale {
    pub fn new(gdal: GdalTools) -> Self {
        Self { gdal }
    }

    pub fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(
                FieldSpec::float("xres")
                    .required()
                    .greater_than(0.0)
                    .describe("Resolución objetivo en X (unidades del sistema de coordenadas)"),
            )
            .field(
                FieldSpec::float("yres")
                    .required()
                    .greater_than(0.0)
                    .describe("Resolución objetivo en Y (unidades del sistema de coordenadas)"),
            )
    }

    fn args(params: &RasterRescaleParams, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-overwrite".into(),
            "-tr".into(),
            params.xres.to_string().into(),
            params.yres.to_string().into(),
            input.as_os_str().to_owned(),
            output.as_os_str().to_owned(),
        ]
    }
}

#[async_trait]
impl Algorithm for RasterRescale {
    async fn run(&self, input: Bytes, file_ext: &str, params: &ValidatedParams) -> Result<Vec<u8>> {
        let params: RasterRescaleParams = params.decode()?;
        let program = self.gdal.program("gdalwarp");
        run_on_temp_files(&program, &input, file_ext, |i, o| Self::args(&params, i, o)).await
    }
}
