use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Stable error codes to allow UX mapping in whatever front end renders events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    InvalidUrl,
    DuplicateVideo,
    BackendRequest,
    JobNotFound,
    Stalled,
    JobFailed,
    ArtifactRetrieval,
    Storage,
}

/// Severity of a transient notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// The most recent error, kept until the user dismisses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Banner {
    pub error_code: ErrorCode,
    pub user_message: String,
    pub raised_at: DateTime<Utc>,
}

impl Banner {
    pub fn new(error_code: ErrorCode, user_message: impl Into<String>) -> Self {
        Self {
            error_code,
            user_message: user_message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Controller -> presentation events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    MetadataReady {
        video_id: String,
        title: String,
    },

    DownloadStarted {
        job_id: String,
        video_id: String,
    },
    DownloadProgress {
        job_id: String,
        percent: u8,
    },
    DownloadCompleted {
        job_id: String,
        path: PathBuf,
    },
    DownloadCanceled {
        job_id: String,
    },
    DownloadFailed {
        job_id: String,
        error_code: ErrorCode,
        user_message: String,
    },

    TranscriptReady {
        video_id: String,
    },
    SummaryReady {
        video_id: String,
    },
    SentimentReady {
        video_id: String,
        total_analyzed: u64,
    },

    HistoryChanged {
        len: usize,
    },

    Notice {
        level: NoticeLevel,
        message: String,
    },
}

impl ClientEvent {
    /// True for events after which the tracked download is gone.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientEvent::DownloadCompleted { .. }
                | ClientEvent::DownloadCanceled { .. }
                | ClientEvent::DownloadFailed { .. }
        )
    }
}

/// Send an event, ignoring a closed receiver: the controller keeps working
/// when nobody is listening.
pub async fn emit(tx: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    log::debug!("Emitting event: {:?}", event);
    if tx.send(event).await.is_err() {
        log::trace!("Event receiver dropped");
    }
}

pub mod helpers {
    use super::*;

    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> ClientEvent {
        ClientEvent::Notice {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> ClientEvent {
        notice(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> ClientEvent {
        notice(NoticeLevel::Success, message)
    }

    pub fn error(message: impl Into<String>) -> ClientEvent {
        notice(NoticeLevel::Error, message)
    }
}
