//! Cliente del almacenamiento externo de archivos.
//!
//! Endpoints:
//! - POST /files (multipart)
//! - GET /files/{id}/meta
//! - GET /files/{id}

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub uuid: String,
    pub filename: String,
    pub file_extension: String,
    #[serde(default)]
    pub size: u64,
    pub path: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl FileMeta {
    /// `<path sin '/' final>/<filename>.<extension>`
    pub fn full_path(&self) -> String {
        format!(
            "{}/{}.{}",
            self.path.trim_end_matches('/'),
            self.filename,
            self.file_extension
        )
    }
}

/// Archivo a subir.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub filename: String,
    pub file_extension: String,
    pub path: String,
    pub content: Vec<u8>,
    pub comment: Option<String>,
}

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("archivo no encontrado: {0}")]
    NotFound(String),
    #[error("el archivo ya existe: {0}")]
    AlreadyExists(String),
    #[error("la API de archivos respondió {status}: {body}")]
    Api { status: u16, body: String },
    #[error("error de red hablando con el almacenamiento: {0}")]
    Transport(String),
    #[error("respuesta inválida del almacenamiento: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for FileStoreError {
    fn from(e: reqwest::Error) -> Self {
        FileStoreError::Transport(e.to_string())
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get_file_meta(&self, file_id: &str) -> Result<FileMeta, FileStoreError>;
    async fn get_file(&self, file_id: &str) -> Result<Bytes, FileStoreError>;
    async fn post_file(&self, file: NewFile) -> Result<FileMeta, FileStoreError>;
}

#[derive(Clone)]
pub struct HttpFileStore {
    client: Client,
    base_url: String,
}

impl HttpFileStore {
    pub fn new(host: &str, port: Option<u16>, timeout: Duration) -> Result<Self, FileStoreError> {
        let mut base_url = host.trim_end_matches('/').to_string();
        if let Some(port) = port {
            base_url.push_str(&format!(":{port}"));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 404 -> NotFound, 409 -> AlreadyExists, resto de no-2xx -> Api.
    async fn check(resp: Response) -> Result<Response, FileStoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => FileStoreError::NotFound(body),
            StatusCode::CONFLICT => FileStoreError::AlreadyExists(body),
            _ => FileStoreError::Api {
                status: status.as_u16(),
                body,
            },
        })
    }

    async fn parse_meta(resp: Response) -> Result<FileMeta, FileStoreError> {
        let raw = resp.bytes().await?;
        serde_json::from_slice(&raw).map_err(|e| FileStoreError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn get_file_meta(&self, file_id: &str) -> Result<FileMeta, FileStoreError> {
        let url = self.url(&format!("/files/{file_id}/meta"));
        debug!("GET {}", url);
        let resp = Self::check(self.client.get(&url).send().await?).await?;
        Self::parse_meta(resp).await
    }

    async fn get_file(&self, file_id: &str) -> Result<Bytes, FileStoreError> {
        let url = self.url(&format!("/files/{file_id}"));
        debug!("GET {}", url);
        let resp = Self::check(self.client.get(&url).send().await?).await?;
        Ok(resp.bytes().await?)
    }

    async fn post_file(&self, file: NewFile) -> Result<FileMeta, FileStoreError> {
        let url = self.url("/files");
        debug!(
            "POST {} ({}.{} en {}, {} bytes)",
            url,
            file.filename,
            file.file_extension,
            file.path,
            file.content.len()
        );

        let part = Part::bytes(file.content)
            .file_name(format!("{}.{}", file.filename, file.file_extension));
        let mut form = Form::new()
            .part("file", part)
            .text("filename", file.filename)
            .text("file_extension", file.file_extension)
            .text("path", file.path);
        if let Some(comment) = file.comment {
            form = form.text("comment", comment);
        }

        let resp = Self::check(self.client.post(&url).multipart(form).send().await?).await?;
        Self::parse_meta(resp).await
    }
}
