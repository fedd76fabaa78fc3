//! Backend Job API
//!
//! The backend does the heavy lifting (extraction, transcription, scoring);
//! this module is the only place that knows its HTTP surface. Responses are
//! decoded into loose wire structs first and then validated into the typed
//! results the controller works with, so a misbehaving backend surfaces as
//! `ApiError::Malformed` instead of silently wrong state.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ApiError;
use crate::models::{SentimentData, VideoFormat};

/// Treat `null` and type mismatches the same as a missing field.
fn deserialize_null_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer).unwrap_or(None))
}

/// Metadata returned by `info`.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Backend-assigned id; absent for backends that don't report one.
    pub video_id: Option<String>,
    pub title: String,
    pub thumbnail: String,
    pub duration: Option<u64>,
    pub video_formats: Vec<VideoFormat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartJobRequest {
    pub url: String,
    pub video_format_id: String,
    pub video_id: String,
    pub title: String,
}

/// Status reported by the backend for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Downloading,
    Completed,
    Error,
}

impl RemoteStatus {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "downloading" => RemoteStatus::Downloading,
            "completed" => RemoteStatus::Completed,
            "error" => RemoteStatus::Error,
            _ => return None,
        })
    }
}

/// One validated progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub progress: u8,
    pub status: RemoteStatus,
    pub error: Option<String>,
}

impl ProgressReport {
    pub fn downloading(progress: u8) -> Self {
        Self {
            progress,
            status: RemoteStatus::Downloading,
            error: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            progress: 100,
            status: RemoteStatus::Completed,
            error: None,
        }
    }

    pub fn failed(error: Option<&str>) -> Self {
        Self {
            progress: 0,
            status: RemoteStatus::Error,
            error: error.map(str::to_string),
        }
    }
}

/// The finished file.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Filename suggested by `Content-Disposition`, if any.
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub video_id: Option<String>,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryResult {
    pub video_id: Option<String>,
    pub summary: String,
}

#[async_trait]
pub trait JobApi: Send + Sync {
    async fn info(&self, url: &str) -> Result<VideoInfo, ApiError>;
    /// Create a download job and return its id.
    async fn start_job(&self, req: &StartJobRequest) -> Result<String, ApiError>;
    async fn progress(&self, job_id: &str) -> Result<ProgressReport, ApiError>;
    async fn cancel(&self, job_id: &str) -> Result<(), ApiError>;
    /// Only valid once the job reported `completed`.
    async fn artifact(&self, job_id: &str) -> Result<Artifact, ApiError>;
    async fn transcript(&self, url: &str) -> Result<TranscriptResult, ApiError>;
    /// The backend requires a transcript for the video to exist.
    async fn summary(&self, video_id: &str) -> Result<SummaryResult, ApiError>;
    async fn sentiment(&self, url: &str) -> Result<SentimentData, ApiError>;
}

// ============================================================================
// Wire formats
// ============================================================================

#[derive(Debug, Deserialize)]
struct InfoWire {
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    video_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    thumbnail: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    duration: Option<f64>,
    #[serde(default)]
    video_formats: Vec<VideoFormat>,
}

#[derive(Debug, Deserialize)]
struct StartWire {
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    download_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressWire {
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    progress: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptWire {
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    video_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    transcript: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryWire {
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    video_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWire {
    #[serde(default, deserialize_with = "deserialize_null_as_none")]
    error: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl InfoWire {
    fn validate(self) -> Result<VideoInfo, ApiError> {
        let title = non_empty(self.title)
            .ok_or_else(|| ApiError::Malformed("info response has no title".to_string()))?;

        if let Some(bad) = self
            .video_formats
            .iter()
            .find(|f| f.format_id.trim().is_empty())
        {
            return Err(ApiError::Malformed(format!(
                "format {:?} has an empty id",
                bad.label
            )));
        }

        let duration = match self.duration {
            Some(d) if d.is_finite() && d >= 0.0 => Some(d.round() as u64),
            Some(d) => return Err(ApiError::Malformed(format!("invalid duration {d}"))),
            None => None,
        };

        Ok(VideoInfo {
            video_id: non_empty(self.video_id),
            title,
            thumbnail: self.thumbnail.unwrap_or_default(),
            duration,
            video_formats: self.video_formats,
        })
    }
}

impl ProgressWire {
    fn validate(self) -> Result<ProgressReport, ApiError> {
        let status_raw = self
            .status
            .ok_or_else(|| ApiError::Malformed("progress response has no status".to_string()))?;
        let status = RemoteStatus::parse(status_raw.trim())
            .ok_or_else(|| ApiError::Malformed(format!("unknown job status {status_raw:?}")))?;

        let progress = match (self.progress, status) {
            (Some(p), _) if p.is_finite() && (0.0..=100.0).contains(&p) => p.floor() as u8,
            (Some(p), _) => {
                return Err(ApiError::Malformed(format!("progress {p} out of range")))
            }
            (None, RemoteStatus::Downloading) => {
                return Err(ApiError::Malformed(
                    "downloading report has no progress".to_string(),
                ))
            }
            (None, RemoteStatus::Completed) => 100,
            (None, RemoteStatus::Error) => 0,
        };

        Ok(ProgressReport {
            progress,
            status,
            error: non_empty(self.error),
        })
    }
}

/// Pull `filename="..."` out of a `Content-Disposition` header.
fn content_disposition_filename(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Which call a response belongs to; decides how statuses map to errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Info,
    Start,
    Progress,
    Cancel,
    Artifact,
    Transcript,
    Summary,
    Sentiment,
}

fn map_status(endpoint: Endpoint, status: StatusCode, message: String) -> ApiError {
    match (endpoint, status.as_u16()) {
        (_, 404) => ApiError::NotFound,
        (Endpoint::Cancel, 409) => ApiError::AlreadyTerminal,
        (Endpoint::Start, 400) => ApiError::InvalidFormat(message),
        (Endpoint::Info, 400) => ApiError::InvalidUrl(message),
        (_, code) => ApiError::Http {
            status: code,
            message,
        },
    }
}

pub struct HttpJobApi {
    client: Client,
    base_url: String,
}

impl HttpJobApi {
    /// No per-request timeout is configured; stall detection is the only
    /// liveness check on downloads.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("clipgist/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let response = req.send().await.map_err(|e| {
            if e.is_connect() {
                ApiError::Unreachable(e.to_string())
            } else {
                ApiError::Transport(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorWire>(&body)
            .ok()
            .and_then(|w| non_empty(w.error))
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    trimmed.chars().take(200).collect()
                }
            });

        log::debug!("{:?} returned {}: {}", endpoint, status, message);
        Err(map_status(endpoint, status, message))
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.send(endpoint, req).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Malformed(format!("{:?} response: {}", endpoint, e)))
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn info(&self, url: &str) -> Result<VideoInfo, ApiError> {
        let req = self
            .client
            .post(self.url("get_info"))
            .json(&serde_json::json!({ "url": url }));
        self.json::<InfoWire>(Endpoint::Info, req).await?.validate()
    }

    async fn start_job(&self, body: &StartJobRequest) -> Result<String, ApiError> {
        let req = self.client.post(self.url("start_download")).json(body);
        let wire: StartWire = self.json(Endpoint::Start, req).await?;
        non_empty(wire.download_id)
            .ok_or_else(|| ApiError::Malformed("start response has no download_id".to_string()))
    }

    async fn progress(&self, job_id: &str) -> Result<ProgressReport, ApiError> {
        let req = self
            .client
            .get(self.url("progress"))
            .query(&[("download_id", job_id)]);
        self.json::<ProgressWire>(Endpoint::Progress, req)
            .await?
            .validate()
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ApiError> {
        let req = self
            .client
            .post(self.url("cancel_download"))
            .json(&serde_json::json!({ "download_id": job_id }));
        self.send(Endpoint::Cancel, req).await?;
        Ok(())
    }

    async fn artifact(&self, job_id: &str) -> Result<Artifact, ApiError> {
        let req = self
            .client
            .get(self.url("get_file"))
            .query(&[("download_id", job_id)]);
        let response = self.send(Endpoint::Artifact, req).await?;

        let file_name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(content_disposition_filename);
        let bytes = response.bytes().await?.to_vec();

        Ok(Artifact { file_name, bytes })
    }

    async fn transcript(&self, url: &str) -> Result<TranscriptResult, ApiError> {
        let req = self
            .client
            .post(self.url("get_transcript"))
            .json(&serde_json::json!({ "url": url }));
        let wire: TranscriptWire = self.json(Endpoint::Transcript, req).await?;
        Ok(TranscriptResult {
            video_id: non_empty(wire.video_id),
            transcript: wire
                .transcript
                .ok_or_else(|| ApiError::Malformed("transcript response is empty".to_string()))?,
        })
    }

    async fn summary(&self, video_id: &str) -> Result<SummaryResult, ApiError> {
        let req = self
            .client
            .post(self.url("get_summary"))
            .json(&serde_json::json!({ "video_id": video_id }));
        let wire: SummaryWire = self.json(Endpoint::Summary, req).await?;
        Ok(SummaryResult {
            video_id: non_empty(wire.video_id),
            summary: wire
                .summary
                .ok_or_else(|| ApiError::Malformed("summary response is empty".to_string()))?,
        })
    }

    async fn sentiment(&self, url: &str) -> Result<SentimentData, ApiError> {
        let req = self
            .client
            .post(self.url("analyze_sentiment"))
            .json(&serde_json::json!({ "url": url }));
        self.json(Endpoint::Sentiment, req).await
    }
}

// ============================================================================
// Test double
// ============================================================================
