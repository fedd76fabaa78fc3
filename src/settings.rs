//! Settings Manager
//!
//! Handles persistence and retrieval of client preferences using SQLite.
//! Settings are stored as JSON values keyed by setting name.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::controller::ControllerConfig;

/// Client settings with all configurable options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub downloads: DownloadSettings,
}

/// Where the job backend lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Progress polling cadence and stall detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Delay before the first progress poll.
    #[serde(default = "default_poll_ms")]
    pub initial_delay_ms: u64,

    /// Delay between subsequent polls.
    #[serde(default = "default_poll_ms")]
    pub interval_ms: u64,

    /// A download with no forward progress for this long is canceled.
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_poll_ms(),
            interval_ms: default_poll_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Folder finished artifacts are written to.
    #[serde(default = "default_download_folder")]
    pub download_folder: PathBuf,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            download_folder: default_download_folder(),
        }
    }
}

// Default value functions
fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_poll_ms() -> u64 {
    2_000
}

fn default_stall_timeout_ms() -> u64 {
    30_000
}

fn default_download_folder() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("~/Downloads"))
}

/// Keys accepted by `ClientSettings::set_field`.
pub const FIELDS: &[&str] = &[
    "backend.base_url",
    "polling.initial_delay_ms",
    "polling.interval_ms",
    "polling.stall_timeout_ms",
    "downloads.download_folder",
];

impl ClientSettings {
    /// Update a single field from its dotted name, as typed on the command line.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<()> {
        let parse_ms = |v: &str| -> Result<u64> {
            v.trim()
                .parse::<u64>()
                .with_context(|| format!("{field} expects milliseconds, got {v:?}"))
        };

        match field {
            "backend.base_url" => {
                let normalized = crate::url_utils::normalize_http_url(value)
                    .ok_or_else(|| anyhow!("not a valid http(s) URL: {value}"))?;
                self.backend.base_url = normalized.trim_end_matches('/').to_string();
            }
            "polling.initial_delay_ms" => self.polling.initial_delay_ms = parse_ms(value)?,
            "polling.interval_ms" => {
                let ms = parse_ms(value)?;
                if ms == 0 {
                    return Err(anyhow!("polling.interval_ms must be positive"));
                }
                self.polling.interval_ms = ms;
            }
            "polling.stall_timeout_ms" => self.polling.stall_timeout_ms = parse_ms(value)?,
            "downloads.download_folder" => {
                self.downloads.download_folder = PathBuf::from(value.trim());
            }
            other => {
                return Err(anyhow!(
                    "unknown setting {other:?} (expected one of: {})",
                    FIELDS.join(", ")
                ))
            }
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            initial_delay: Duration::from_millis(self.polling.initial_delay_ms),
            poll_interval: Duration::from_millis(self.polling.interval_ms.max(1)),
            stall_timeout: Duration::from_millis(self.polling.stall_timeout_ms),
            download_folder: self.downloads.download_folder.clone(),
        }
    }
}

/// Settings keys used in the database.
pub mod keys {
    pub const CLIENT_SETTINGS: &str = "client_settings";
    pub const LAST_FORMAT: &str = "last_format";
}

/// Settings manager for reading and writing settings to the database.
pub struct SettingsManager<'a> {
    conn: &'a Connection,
}

impl<'a> SettingsManager<'a> {
    /// Create a new settings manager with a database connection.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get a setting value by key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let result: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query settings")?;

        match result {
            Some(json) => {
                let value: T =
                    serde_json::from_str(&json).context("Failed to deserialize setting")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a setting value by key.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).context("Failed to serialize setting")?;

        self.conn
            .execute(
                "INSERT INTO settings (key, value_json) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
                params![key, json],
            )
            .context("Failed to save setting")?;

        Ok(())
    }

    /// Delete a setting by key.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .context("Failed to delete setting")?;
        Ok(())
    }

    /// Get the client settings, returning defaults if not set.
    pub fn get_client_settings(&self) -> Result<ClientSettings> {
        self.get::<ClientSettings>(keys::CLIENT_SETTINGS)
            .map(|opt| opt.unwrap_or_default())
    }

    pub fn save_client_settings(&self, settings: &ClientSettings) -> Result<()> {
        self.set(keys::CLIENT_SETTINGS, settings)
    }

    /// Get the last format id the user downloaded with.
    pub fn get_last_format(&self) -> Result<Option<String>> {
        self.get::<String>(keys::LAST_FORMAT)
    }

    pub fn save_last_format(&self, format_id: &str) -> Result<()> {
        self.set(keys::LAST_FORMAT, &format_id.to_string())
    }
}
