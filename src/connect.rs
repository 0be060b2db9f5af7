//! Publishing service API client.
//!
//! This module provides:
//!
//! - `ShareApi`: the two calls the workflow makes (upload, progress query)
//! - `ConnectClient`: `reqwest` implementation against the real service
//! - `UploadResponse` and `ProgressResponse`: deserialized service responses
//!
//! Uploads are multipart: `title`, optional `buildGUID`, optional `projectId`,
//! and the archive as a `file` part. The archive is streamed from disk in chunks
//! so the number of bytes handed to the connection can be published through a
//! `watch` channel while the request is in flight.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;

use crate::app_data::publisher_data;
use crate::session::Environment;
use crate::util::filtered_title;

/// User agent for API requests
const USER_AGENT: &str = concat!("Publisher/", env!("CARGO_PKG_VERSION"));

/// Size of each chunk of the streamed archive body
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Errors from the publishing service
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request was cancelled locally
    #[error("Request aborted")]
    Aborted,

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Failed to read archive: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Whether this is a user-initiated cancellation rather than a failure
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Response to an upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadResponse {
    /// Job key for polling processing progress
    #[serde(default, deserialize_with = "null_as_empty")]
    pub key: String,
}

/// Response to a processing progress query
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub project_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,
    /// Processing progress, 0-100
    #[serde(default)]
    pub progress: i32,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub error: String,
}

impl ProgressResponse {
    pub fn is_complete(&self) -> bool {
        self.progress >= 100
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Progress clamped for display
    pub fn percent(&self) -> u8 {
        self.progress.clamp(0, 100) as u8
    }
}

/// Bytes of the archive handed to the connection so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Fraction sent (0.0 - 1.0)
    pub fn fraction(&self) -> f32 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.bytes_sent as f64 / self.total_bytes as f64).clamp(0.0, 1.0) as f32
        }
    }

    pub fn percent(&self) -> u8 {
        (self.fraction() * 100.0) as u8
    }
}

/// Everything needed to send one upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub token: String,
    pub title: String,
    pub build_guid: String,
    pub project_id: String,
    pub zip_path: PathBuf,
}

impl UploadRequest {
    /// Text fields of the multipart form, in send order
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("title", filtered_title(&self.title).to_string())];
        if !self.build_guid.is_empty() {
            fields.push(("buildGUID", self.build_guid.clone()));
        }
        if !self.project_id.is_empty() {
            fields.push(("projectId", self.project_id.clone()));
        }
        fields
    }
}

/// Calls the share workflow makes against the publishing service
pub trait ShareApi: Send + Sync + 'static {
    /// Send the archive. Bytes sent are published on `progress`.
    fn upload(
        &self,
        request: UploadRequest,
        progress: watch::Sender<TransferProgress>,
    ) -> impl Future<Output = Result<UploadResponse, ApiError>> + Send;

    /// Query processing progress of a job
    fn query_progress(
        &self,
        token: &str,
        key: &str,
    ) -> impl Future<Output = Result<ProgressResponse, ApiError>> + Send;
}

/// Publishing service API client
#[derive(Clone)]
pub struct ConnectClient {
    client: reqwest::Client,
    base_url: String,
}

impl ConnectClient {
    /// Create a client for the given environment
    pub fn new(environment: Environment) -> anyhow::Result<Self> {
        Self::with_base_url(environment.base_url())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Check status and decode a JSON body
    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("Unknown error").to_string()
            } else {
                text
            };
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Chunks of `file`, publishing the running byte count on `progress` as the
/// connection pulls each one
fn counted_stream(
    file: tokio::fs::File,
    progress: watch::Sender<TransferProgress>,
) -> impl futures::Stream<Item = <ReaderStream<tokio::fs::File> as futures::Stream>::Item> + Send + 'static
{
    ReaderStream::with_capacity(file, UPLOAD_CHUNK_SIZE).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            progress.send_modify(|p| p.bytes_sent += bytes.len() as u64);
        }
        chunk
    })
}

impl ShareApi for ConnectClient {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: watch::Sender<TransferProgress>,
    ) -> Result<UploadResponse, ApiError> {
        let file = tokio::fs::File::open(&request.zip_path).await?;
        let total_bytes = file.metadata().await?.len();
        progress.send_replace(TransferProgress {
            bytes_sent: 0,
            total_bytes,
        });

        let file_name = request
            .zip_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| publisher_data().archive.file_name.clone());

        let body = reqwest::Body::wrap_stream(counted_stream(file, progress));
        let file_part = Part::stream_with_length(body, total_bytes)
            .file_name(file_name)
            .mime_str("application/zip")?;

        let mut form = Form::new();
        for (name, value) in request.text_fields() {
            form = form.text(name, value);
        }
        let form = form.part("file", file_part);

        let endpoint = &publisher_data().api.upload_endpoint;
        tracing::info!(
            "Uploading {} bytes to {}{}",
            total_bytes,
            self.base_url,
            endpoint
        );

        let response = self
            .client
            .post(self.url(endpoint))
            .bearer_auth(&request.token)
            .header("X-Requested-With", &publisher_data().api.requested_with)
            .multipart(form)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn query_progress(&self, token: &str, key: &str) -> Result<ProgressResponse, ApiError> {
        let api = &publisher_data().api;

        let response = self
            .client
            .get(self.url(&api.progress_endpoint))
            .query(&[("key", key)])
            .bearer_auth(token)
            .header("X-Requested-With", &api.requested_with)
            .timeout(Duration::from_secs(api.request_timeout_seconds))
            .send()
            .await?;

        Self::decode(response).await
    }
}
