//! Error taxonomy shared by the API client, the history store and the controller.

use thiserror::Error;

use crate::events::ErrorCode;

/// Input problems the user can fix and retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select a video format to download")]
    MissingFormat,

    #[error("Not a valid http(s) video URL: {0}")]
    InvalidUrl(String),

    #[error("Could not determine a video id for {0}")]
    MissingVideoId(String),

    #[error("Video {video_id} is already in history")]
    DuplicateVideo { video_id: String },

    #[error("A download is already in progress ({job_id})")]
    JobActive { job_id: String },

    #[error("No download is in progress")]
    NoActiveJob,

    #[error("Please generate transcript first")]
    TranscriptRequired { video_id: String },

    #[error("Format {format_id} is not offered for this video")]
    UnknownFormat { format_id: String },

    #[error("No history entry at index {index}")]
    IndexOutOfRange { index: usize },
}

/// Errors raised while talking to the backend job API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("job not found or expired")]
    NotFound,

    #[error("job already finished")]
    AlreadyTerminal,

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// HTTP status associated with the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound => Some(404),
            ApiError::AlreadyTerminal => Some(409),
            ApiError::InvalidFormat(_) | ApiError::InvalidUrl(_) => Some(400),
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::Unreachable(_) | ApiError::Malformed(_) => None,
        }
    }
}

/// Everything the controller can report to the presentation layer.
///
/// None of these are fatal: after any of them the controller is idle and the
/// user can retry.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{message}")]
    BackendRequest {
        status: Option<u16>,
        message: String,
    },

    #[error("Download {job_id} was not found or has expired")]
    JobNotFound { job_id: String },

    #[error("Download stalled")]
    Stall { job_id: String },

    #[error("{message}")]
    JobFailed { job_id: String, message: String },

    #[error("Download finished but the file could not be retrieved: {message}")]
    ArtifactRetrieval { job_id: String, message: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ClientError {
    /// Wrap an API failure with a user-facing prefix.
    pub fn backend(context: &str, err: ApiError) -> Self {
        ClientError::BackendRequest {
            status: err.status(),
            message: format!("{context}: {err}"),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Validation(ValidationError::InvalidUrl(_)) => ErrorCode::InvalidUrl,
            ClientError::Validation(ValidationError::DuplicateVideo { .. }) => {
                ErrorCode::DuplicateVideo
            }
            ClientError::Validation(_) => ErrorCode::Validation,
            ClientError::BackendRequest { .. } => ErrorCode::BackendRequest,
            ClientError::JobNotFound { .. } => ErrorCode::JobNotFound,
            ClientError::Stall { .. } => ErrorCode::Stalled,
            ClientError::JobFailed { .. } => ErrorCode::JobFailed,
            ClientError::ArtifactRetrieval { .. } => ErrorCode::ArtifactRetrieval,
            ClientError::Storage(_) => ErrorCode::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_failed_displays_backend_message_verbatim() {
        let err = ClientError::JobFailed {
            job_id: "abc".to_string(),
            message: "codec failure".to_string(),
        };
        assert_eq!(err.to_string(), "codec failure");
        assert!(matches!(err.code(), ErrorCode::JobFailed));
    }

    #[test]
    fn backend_wrapper_keeps_status() {
        let err = ClientError::backend(
            "Error checking progress",
            ApiError::Http {
                status: 502,
                message: "bad gateway".to_string(),
            },
        );
        match err {
            ClientError::BackendRequest { status, message } => {
                assert_eq!(status, Some(502));
                assert!(message.starts_with("Error checking progress"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stall_message() {
        let err = ClientError::Stall {
            job_id: "x".to_string(),
        };
        assert_eq!(err.to_string(), "Download stalled");
    }
}
