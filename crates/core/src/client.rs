//! HTTP client for the segmentation, mapping and navigation backend.

use std::io;
use std::path::Path;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use lidarnav_protocol::api::{self, HealthResponse, MapResponse, SegmentResponse};
use lidarnav_protocol::env::{Grid, ResetResponse, StepResult};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::ClientConfig;
use crate::episode::{Environment, ResetSource};
use crate::error::{ConfigError, TransportError};
use crate::session::StreamSource;

const SEGMENT_STREAM: &str = "segment_stream";

/// A point-cloud file (`.npz` with a `points` array) to send as multipart field `file`.
#[derive(Debug, Clone)]
pub struct Upload {
    file_name: String,
    bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn from_path(path: &Path) -> io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scan.npz".to_string());
        Ok(Self { file_name, bytes })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn into_form(self) -> Form {
        Form::new().part("file", Part::bytes(self.bytes).file_name(self.file_name))
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(ConfigError::Client)?;
        Ok(Self {
            http,
            base: config.endpoint(""),
        })
    }

    pub fn base(&self) -> &str {
        self.base.trim_end_matches('/')
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base, endpoint)
    }

    pub async fn health(&self) -> Result<HealthResponse, TransportError> {
        self.fetch("health", self.http.get(self.url("health"))).await
    }

    /// One-shot segmentation of an uploaded scan.
    pub async fn segment(&self, upload: Upload) -> Result<SegmentResponse, TransportError> {
        self.fetch("segment", self.post_form("segment", upload)).await
    }

    /// Segmentation of a random scene picked by the server.
    pub async fn segment_random(&self) -> Result<SegmentResponse, TransportError> {
        self.fetch("segment_random", self.http.get(self.url("segment_random")))
            .await
    }

    /// Streaming segmentation; drive the returned source with a
    /// [`StreamSession`](crate::session::StreamSession).
    pub fn segment_stream(&self, upload: Upload) -> SegmentStreamRequest {
        SegmentStreamRequest {
            request: self
                .post_form(SEGMENT_STREAM, upload)
                .header(ACCEPT, "text/event-stream"),
        }
    }

    /// Builds the occupancy map from a labelled scan. The server keeps it for
    /// `get_map` and `rl_reset_from_map`.
    pub async fn build_map(&self, upload: Upload) -> Result<Grid, TransportError> {
        let res: MapResponse = self.fetch("build_map", self.post_form("build_map", upload)).await?;
        Ok(res.grid)
    }

    pub async fn build_map_random(&self) -> Result<Grid, TransportError> {
        let res: MapResponse = self
            .fetch("build_map_random", self.http.get(self.url("build_map_random")))
            .await?;
        Ok(res.grid)
    }

    pub async fn get_map(&self) -> Result<Grid, TransportError> {
        let res: MapResponse = self.fetch("get_map", self.http.get(self.url("get_map"))).await?;
        Ok(res.grid)
    }

    /// Download URL of the preprocessed sample scan.
    pub fn sample_scene_url(&self) -> String {
        self.url("sample_npz")
    }

    /// Download URL of a random synthetic scene.
    pub fn random_scene_url(&self) -> String {
        self.url("random_scene_npz")
    }

    fn post_form(&self, endpoint: &str, upload: Upload) -> RequestBuilder {
        debug!("POST {} ({}, {} bytes)", endpoint, upload.file_name, upload.len());
        self.http.post(self.url(endpoint)).multipart(upload.into_form())
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<T, TransportError> {
        let res = send(endpoint, request).await?;
        let body = res
            .bytes()
            .await
            .map_err(|source| TransportError::Http { endpoint, source })?;
        decode_json(endpoint, &body)
    }
}

impl Environment for ApiClient {
    async fn reset(&self, source: ResetSource) -> Result<Grid, TransportError> {
        let endpoint = match source {
            ResetSource::Random => "rl_reset_random",
            ResetSource::OccupancyMap => "rl_reset_from_map",
        };
        let res: ResetResponse = self.fetch(endpoint, self.http.post(self.url(endpoint))).await?;
        Ok(res.grid)
    }

    async fn step(&self) -> Result<StepResult, TransportError> {
        self.fetch("rl_step", self.http.post(self.url("rl_step"))).await
    }
}

/// Pending `POST /segment_stream`.
///
/// Opening waits for the first non-empty chunk. A body that ends before
/// yielding any bytes, whether sized or chunked, fails with
/// [`TransportError::NoBody`]; one that ends later without a final frame is
/// reported by the session as [`TransportError::Truncated`].
#[derive(Debug)]
pub struct SegmentStreamRequest {
    request: RequestBuilder,
}

impl StreamSource for SegmentStreamRequest {
    type Body = BoxStream<'static, Result<Bytes, TransportError>>;

    async fn open(self) -> Result<Self::Body, TransportError> {
        let res = send(SEGMENT_STREAM, self.request).await?;
        let mut body = res
            .bytes_stream()
            .map_err(|source| TransportError::Http {
                endpoint: SEGMENT_STREAM,
                source,
            })
            .boxed();

        loop {
            match body.next().await {
                None => {
                    return Err(TransportError::NoBody {
                        endpoint: SEGMENT_STREAM,
                    })
                }
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(first) => return Ok(stream::iter(Some(first)).chain(body).boxed()),
            }
        }
    }
}

async fn send(endpoint: &'static str, request: RequestBuilder) -> Result<Response, TransportError> {
    let res = request
        .send()
        .await
        .map_err(|source| TransportError::Http { endpoint, source })?;
    let status = res.status();
    if !status.is_success() {
        return Err(TransportError::Status { endpoint, status });
    }
    debug!("{} -> {}", endpoint, status);
    Ok(res)
}

/// Parses a JSON reply, turning an in-band `{"error": ...}` into [`TransportError::Remote`].
fn decode_json<T: DeserializeOwned>(endpoint: &'static str, body: &[u8]) -> Result<T, TransportError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|source| TransportError::InvalidResponse { endpoint, source })?;
    if let Some(message) = api::error_message(&value) {
        return Err(TransportError::Remote(message));
    }
    serde_json::from_value(value).map_err(|source| TransportError::InvalidResponse { endpoint, source })
}
