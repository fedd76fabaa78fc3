//! Persisted list of processed videos, newest first.
//!
//! The whole list is one JSON blob under a fixed key and is rewritten on every
//! mutation. `History` owns the in-memory copy; a `HistoryStore` only knows
//! how to load and save it, so tests swap SQLite for `MemoryHistoryStore`.

use anyhow::{Context, Result};

use crate::db::Db;
use crate::error::ValidationError;
use crate::models::VideoEntry;

/// Storage key of the serialized history.
pub const HISTORY_KEY: &str = "videoHistory";

pub trait HistoryStore: Send {
    fn load(&mut self) -> Result<Vec<VideoEntry>>;
    fn save(&mut self, entries: &[VideoEntry]) -> Result<()>;
}

/// History kept in the SQLite `storage` table.
pub struct SqliteHistoryStore {
    db: Db,
}

impl SqliteHistoryStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn load(&mut self) -> Result<Vec<VideoEntry>> {
        let Some(raw) = self.db.get_value(HISTORY_KEY)? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<VideoEntry>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // A corrupt blob would otherwise brick every command.
                log::warn!("Discarding unreadable history blob: {}", e);
                Ok(Vec::new())
            }
        }
    }

    fn save(&mut self, entries: &[VideoEntry]) -> Result<()> {
        let json = serde_json::to_string(entries).context("Failed to serialize history")?;
        self.db.put_value(HISTORY_KEY, &json)
    }
}

/// In-memory store for tests and throwaway sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryHistoryStore {
    pub entries: Vec<VideoEntry>,
    pub saves: usize,
}

impl MemoryHistoryStore {
    pub fn with_entries(entries: Vec<VideoEntry>) -> Self {
        Self { entries, saves: 0 }
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&mut self) -> Result<Vec<VideoEntry>> {
        Ok(self.entries.clone())
    }

    fn save(&mut self, entries: &[VideoEntry]) -> Result<()> {
        self.entries = entries.to_vec();
        self.saves += 1;
        Ok(())
    }
}

/// Error type of `History` mutations: input problems stay distinguishable
/// from storage failures.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<HistoryError> for crate::error::ClientError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::Validation(v) => v.into(),
            HistoryError::Storage(e) => e.into(),
        }
    }
}

pub struct History<S: HistoryStore> {
    store: S,
    entries: Vec<VideoEntry>,
}

impl<S: HistoryStore> History<S> {
    /// Load the persisted list from `store`.
    pub fn open(mut store: S) -> Result<Self> {
        let entries = store.load()?;
        log::debug!("Loaded {} history entries", entries.len());
        Ok(Self { store, entries })
    }

    pub fn entries(&self) -> &[VideoEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn find(&self, video_id: &str) -> Option<&VideoEntry> {
        self.entries.iter().find(|e| e.video_id == video_id)
    }

    pub fn find_matching(&self, url: &str, video_id: &str) -> Option<&VideoEntry> {
        self.entries.iter().find(|e| e.matches(url, video_id))
    }

    /// Prepend a new entry. An existing `video_id` is rejected untouched.
    pub fn add(&mut self, entry: VideoEntry) -> Result<(), HistoryError> {
        if entry.video_id.is_empty() {
            return Err(ValidationError::MissingVideoId(entry.url.clone()).into());
        }
        if self.find(&entry.video_id).is_some() {
            return Err(ValidationError::DuplicateVideo {
                video_id: entry.video_id,
            }
            .into());
        }

        let mut next = Vec::with_capacity(self.entries.len() + 1);
        next.push(entry);
        next.extend(self.entries.iter().cloned());
        self.commit(next)?;
        Ok(())
    }

    /// Replace the entry with the same `video_id` in place, or prepend it.
    pub fn upsert(&mut self, entry: VideoEntry) -> Result<()> {
        let mut next = self.entries.clone();
        match next.iter_mut().find(|e| e.video_id == entry.video_id) {
            Some(existing) => *existing = entry,
            None => next.insert(0, entry),
        }
        self.commit(next)
    }

    /// Remove exactly the entry at `index`; the rest keep their order.
    pub fn remove(&mut self, index: usize) -> Result<VideoEntry, HistoryError> {
        if index >= self.entries.len() {
            return Err(ValidationError::IndexOutOfRange { index }.into());
        }
        let mut next = self.entries.clone();
        let removed = next.remove(index);
        self.commit(next)?;
        Ok(removed)
    }

    /// Apply `f` to the first entry matching by URL or video id and persist.
    ///
    /// Returns the updated entry, or `None` (and writes nothing) when no entry
    /// matches.
    pub fn update_matching<F>(&mut self, url: &str, video_id: &str, f: F) -> Result<Option<VideoEntry>>
    where
        F: FnOnce(&mut VideoEntry),
    {
        let Some(pos) = self.entries.iter().position(|e| e.matches(url, video_id)) else {
            return Ok(None);
        };
        let mut next = self.entries.clone();
        f(&mut next[pos]);
        let updated = next[pos].clone();
        self.commit(next)?;
        Ok(Some(updated))
    }

    /// Persist `next` and adopt it. On a failed save the current list stays.
    fn commit(&mut self, next: Vec<VideoEntry>) -> Result<()> {
        self.store
            .save(&next)
            .context("Failed to persist history")?;
        self.entries = next;
        Ok(())
    }
}
