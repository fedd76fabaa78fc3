use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// One selectable download format offered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub format_id: String,
    pub label: String,
}

/// Polarity class of an analyzed comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

/// A single analyzed comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub id: String,
    pub text: String,
    pub sentiment: Sentiment,
    pub polarity: f64,
    pub subjectivity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SentimentBucket {
    pub count: u64,
    pub percentage: f64,
}

/// Aggregated counts per polarity class.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SentimentSummary {
    pub positive: SentimentBucket,
    pub negative: SentimentBucket,
    pub neutral: SentimentBucket,
    pub total_analyzed: u64,
    pub total_comments: u64,
}

impl SentimentSummary {
    pub fn bucket(&self, sentiment: Sentiment) -> &SentimentBucket {
        match sentiment {
            Sentiment::Positive => &self.positive,
            Sentiment::Negative => &self.negative,
            Sentiment::Neutral => &self.neutral,
        }
    }
}

/// Result of a comment sentiment analysis for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentData {
    /// Empty when the backend omits it; filled from the history entry.
    #[serde(default)]
    pub video_id: String,
    pub sentiment_results: Vec<SentimentResult>,
    pub sentiment_summary: SentimentSummary,
}

/// One row of the persisted history.
///
/// The `has_*` flags are stored separately from the optional content so a
/// derived artifact can be marked present even when its text was cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub video_id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub video_formats: Vec<VideoFormat>,

    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub download_id: Option<String>,

    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub has_transcript: bool,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub has_summary: bool,
    #[serde(default)]
    pub sentiment_data: Option<SentimentData>,
    #[serde(default)]
    pub has_analysis: bool,

    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
}

impl VideoEntry {
    pub fn new(
        video_id: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            url: url.into(),
            title: title.into(),
            thumbnail: String::new(),
            duration: None,
            video_formats: Vec::new(),
            downloaded: false,
            download_id: None,
            transcript: None,
            has_transcript: false,
            summary: None,
            has_summary: false,
            sentiment_data: None,
            has_analysis: false,
            added_at: Utc::now(),
        }
    }

    /// An entry matches a job or a one-shot result by URL or by video id.
    pub fn matches(&self, url: &str, video_id: &str) -> bool {
        (!video_id.is_empty() && self.video_id == video_id) || (!url.is_empty() && self.url == url)
    }

    pub fn offers_format(&self, format_id: &str) -> bool {
        self.video_formats.iter().any(|f| f.format_id == format_id)
    }

    pub fn mark_downloaded(&mut self, job_id: &str) {
        self.downloaded = true;
        self.download_id = Some(job_id.to_string());
    }

    pub fn set_transcript(&mut self, transcript: String) {
        self.transcript = Some(transcript);
        self.has_transcript = true;
    }

    pub fn set_summary(&mut self, summary: String) {
        self.summary = Some(summary);
        self.has_summary = true;
    }

    pub fn set_sentiment(&mut self, data: SentimentData) {
        self.sentiment_data = Some(data);
        self.has_analysis = true;
    }
}

/// Lifecycle status of the tracked download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Downloading,
    /// The backend reported completion and the artifact is being retrieved.
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

/// The single in-flight download job. Never persisted.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub job_id: String,
    pub status: JobStatus,
    pub progress_percent: u8,
    /// Last time a report with 0 < progress < 100 was observed.
    pub last_progress_at: Instant,
    pub source_url: String,
    pub video_id: String,
    pub started_at: DateTime<Utc>,
}

impl DownloadJob {
    pub fn started(
        job_id: impl Into<String>,
        source_url: impl Into<String>,
        video_id: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Downloading,
            progress_percent: 0,
            last_progress_at: Instant::now(),
            source_url: source_url.into(),
            video_id: video_id.into(),
            started_at: Utc::now(),
        }
    }

    pub fn is_downloading(&self) -> bool {
        self.status == JobStatus::Downloading
    }
}

/// Render a duration as `1h 2m 3s`, leaving out zero components.
pub fn format_duration(seconds: u64) -> String {
    let hrs = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::with_capacity(3);
    if hrs > 0 {
        parts.push(format!("{hrs}h"));
    }
    if mins > 0 {
        parts.push(format!("{mins}m"));
    }
    if secs > 0 {
        parts.push(format!("{secs}s"));
    }
    parts.join(" ")
}

/// Shorten a title to `max` characters, appending `...` when cut.
pub fn truncate_title(title: &str, max: usize) -> String {
    if title.chars().count() <= max {
        return title.to_string();
    }
    let cut: String = title.chars().take(max).collect();
    format!("{cut}...")
}
