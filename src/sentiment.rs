//! Browsing helpers for comment sentiment results: tab filtering and
//! incremental paging.

use std::fmt;
use std::str::FromStr;

use crate::models::{Sentiment, SentimentData, SentimentResult, SentimentSummary};

/// Comments shown per page.
pub const PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SentimentTab {
    #[default]
    All,
    Only(Sentiment),
}

impl SentimentTab {
    pub const ALL_TABS: [SentimentTab; 4] = [
        SentimentTab::All,
        SentimentTab::Only(Sentiment::Positive),
        SentimentTab::Only(Sentiment::Negative),
        SentimentTab::Only(Sentiment::Neutral),
    ];

    pub fn accepts(self, result: &SentimentResult) -> bool {
        match self {
            SentimentTab::All => true,
            SentimentTab::Only(s) => result.sentiment == s,
        }
    }

    /// Number of comments under this tab according to the summary.
    pub fn count(self, data: &SentimentData) -> u64 {
        match self {
            SentimentTab::All => data.sentiment_results.len() as u64,
            SentimentTab::Only(s) => data.sentiment_summary.bucket(s).count,
        }
    }
}

impl fmt::Display for SentimentTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentimentTab::All => f.pad("all"),
            SentimentTab::Only(s) => f.pad(s.as_str()),
        }
    }
}

impl FromStr for SentimentTab {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(SentimentTab::All),
            "positive" => Ok(SentimentTab::Only(Sentiment::Positive)),
            "negative" => Ok(SentimentTab::Only(Sentiment::Negative)),
            "neutral" => Ok(SentimentTab::Only(Sentiment::Neutral)),
            other => Err(format!(
                "unknown tab {other:?} (expected all, positive, negative or neutral)"
            )),
        }
    }
}

/// Results under `tab`, in backend order.
pub fn filter(results: &[SentimentResult], tab: SentimentTab) -> Vec<&SentimentResult> {
    results.iter().filter(|r| tab.accepts(r)).collect()
}

/// Reveals a filtered comment list one page at a time.
#[derive(Debug)]
pub struct CommentPager<'a> {
    filtered: Vec<&'a SentimentResult>,
    shown: usize,
}

impl<'a> CommentPager<'a> {
    /// Starts with the first page visible.
    pub fn new(results: &'a [SentimentResult], tab: SentimentTab) -> Self {
        let filtered = filter(results, tab);
        let shown = filtered.len().min(PAGE_SIZE);
        Self { filtered, shown }
    }

    pub fn visible(&self) -> &[&'a SentimentResult] {
        &self.filtered[..self.shown]
    }

    pub fn has_more(&self) -> bool {
        self.shown < self.filtered.len()
    }

    /// Reveal the next page; returns the newly visible comments.
    pub fn load_more(&mut self) -> &[&'a SentimentResult] {
        let start = self.shown;
        self.shown = (self.shown + PAGE_SIZE).min(self.filtered.len());
        &self.filtered[start..self.shown]
    }

    /// Reveal pages until `page` (1-based) is visible.
    pub fn advance_to(&mut self, page: usize) {
        while self.shown < page.saturating_mul(PAGE_SIZE) && self.has_more() {
            self.load_more();
        }
    }

    pub fn total(&self) -> usize {
        self.filtered.len()
    }
}

/// The polarity with the largest share; ties resolve positive, negative, neutral.
pub fn dominant(summary: &SentimentSummary) -> Option<Sentiment> {
    if summary.total_analyzed == 0 {
        return None;
    }
    [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral]
        .into_iter()
        .fold(None, |best: Option<Sentiment>, s| match best {
            Some(b) if summary.bucket(b).count >= summary.bucket(s).count => Some(b),
            _ => Some(s),
        })
}
