use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

pub mod api;
pub mod controller;
pub mod db;
pub mod error;
pub mod events;
pub mod history;
pub mod models;
pub mod sentiment;
pub mod settings;
pub mod url_utils;

use api::{HttpJobApi, JobApi};
use controller::DownloadController;
use error::{ClientError, ValidationError};
use events::{ClientEvent, NoticeLevel};
use history::{History, HistoryStore, SqliteHistoryStore};
use models::{format_duration, truncate_title, VideoEntry};
use sentiment::{CommentPager, SentimentTab, PAGE_SIZE};
use settings::{ClientSettings, SettingsManager};

/// Controller wired to the real backend and the on-disk history.
type Controller = DownloadController<HttpJobApi, SqliteHistoryStore>;

/// Width titles are cut to in listings.
const TITLE_WIDTH: usize = 25;

// ============================================================================
// Command Line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "clipgist", version, about = "Download and analyze videos through a clipgist backend")]
pub struct Cli {
    /// Backend base URL (overrides the saved setting).
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// SQLite database path, or `:memory:` for a throwaway session.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch metadata for a URL and add it to history.
    Info {
        /// Video URL, or text containing one.
        url: String,
    },
    /// Download a video, following progress until it finishes. Ctrl-C cancels.
    Download {
        url: String,
        /// Format id as listed by `info`; defaults to the last one used.
        #[arg(long)]
        format: Option<String>,
        /// Open the file once it is saved.
        #[arg(long)]
        open: bool,
    },
    /// Inspect or edit the local history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Generate a transcript for a video.
    Transcript { url: String },
    /// Summarize a video whose transcript exists.
    Summary { video_id: String },
    /// Analyze comment sentiment for a video.
    Sentiment {
        url: String,
        /// all, positive, negative or neutral.
        #[arg(long, default_value = "all")]
        filter: SentimentTab,
        /// Page of comments to show (1-based).
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// Show or change client settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    /// List entries, newest first.
    List,
    /// Show one entry in full.
    Show { video_id: String },
    /// Remove the entry at an index shown by `list`.
    Remove { index: usize },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    /// Set a single field, e.g. `polling.stall_timeout_ms 60000`.
    Set { key: String, value: String },
}

// ============================================================================
// Session
// ============================================================================

struct Session {
    db: db::Db,
    settings: ClientSettings,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let db = match &cli.db {
            Some(path) if path.as_os_str() == ":memory:" => db::Db::open_in_memory()?,
            Some(path) => db::Db::open_at(path)?,
            None => db::Db::open()?,
        };
        log::debug!("Using database at {}", db.path().display());

        let mut settings = SettingsManager::new(db.conn()).get_client_settings()?;
        if let Some(base_url) = &cli.base_url {
            settings
                .set_field("backend.base_url", base_url)
                .context("invalid --base-url")?;
        }

        Ok(Self { db, settings })
    }

    fn settings_manager(&self) -> SettingsManager<'_> {
        SettingsManager::new(self.db.conn())
    }

    /// Hand the database to the history store and build the controller.
    fn into_controller(self) -> Result<(Arc<Controller>, mpsc::Receiver<ClientEvent>)> {
        let api = HttpJobApi::new(&self.settings.backend.base_url)?;
        let history = History::open(SqliteHistoryStore::new(self.db))?;
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(256);

        let controller = DownloadController::new(
            self.settings.controller_config(),
            Arc::new(api),
            history,
            event_tx,
        );
        Ok((Arc::new(controller), event_rx))
    }
}

/// Keep the event channel drained for commands that don't render events.
fn drain_events(mut rx: mpsc::Receiver<ClientEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            log::debug!("Event: {:?}", event);
        }
    });
}

fn require_url(text: &str) -> Result<String> {
    url_utils::first_url(text)
        .ok_or_else(|| ClientError::from(ValidationError::InvalidUrl(text.to_string())).into())
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_info(session: Session, text: &str) -> Result<()> {
    let url = require_url(text)?;
    let (controller, rx) = session.into_controller()?;
    drain_events(rx);

    let entry = controller.fetch_info(&url).await?;
    print_entry(&entry);
    Ok(())
}

async fn cmd_download(session: Session, text: &str, format: Option<String>, open_file: bool) -> Result<()> {
    let url = require_url(text)?;

    let format_id = match format {
        Some(f) => {
            session.settings_manager().save_last_format(&f)?;
            f
        }
        None => session
            .settings_manager()
            .get_last_format()?
            .ok_or_else(|| ClientError::from(ValidationError::MissingFormat))?,
    };

    let (controller, mut rx) = session.into_controller()?;

    let local_id = url_utils::extract_video_id(&url).unwrap_or_default();
    let known = controller
        .history()
        .await
        .into_iter()
        .find(|e| e.matches(&url, &local_id));
    let entry = match known {
        Some(entry) => entry,
        None => controller.fetch_info(&url).await?,
    };

    if !entry.video_formats.is_empty() && !entry.offers_format(&format_id) {
        let offered: Vec<_> = entry
            .video_formats
            .iter()
            .map(|f| format!("{} ({})", f.format_id, f.label))
            .collect();
        return Err(ClientError::from(ValidationError::UnknownFormat { format_id }))
            .with_context(|| format!("available formats: {}", offered.join(", ")));
    }

    println!(
        "Downloading \"{}\" as {} into {}",
        truncate_title(&entry.title, TITLE_WIDTH),
        format_id,
        controller.config().download_folder.display()
    );
    controller
        .start_and_track(&entry.url, &format_id, &entry.video_id)
        .await?;

    let followed = follow_download(&*controller, &mut rx, tokio::signal::ctrl_c).await;
    controller.shutdown().await;

    if let Some(message) = followed.failure {
        return Err(anyhow!(message));
    }
    if let (Some(path), true) = (&followed.saved, open_file) {
        if let Err(e) = open::that(path) {
            log::warn!("Failed to open {}: {}", path.display(), e);
        }
    }
    Ok(())
}

/// How a followed download ended.
#[derive(Debug, Default)]
struct Followed {
    saved: Option<PathBuf>,
    failure: Option<String>,
}

/// Render job events until the download ends. Each `interrupt` firing asks
/// the controller to cancel; a refused cancel keeps the job followed.
async fn follow_download<A, S, I, F>(
    controller: &DownloadController<A, S>,
    rx: &mut mpsc::Receiver<ClientEvent>,
    mut interrupt: I,
) -> Followed
where
    A: JobApi,
    S: HistoryStore,
    I: FnMut() -> F,
    F: Future,
{
    let mut followed = Followed::default();
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match &event {
                    ClientEvent::DownloadCompleted { path, .. } => {
                        followed.saved = Some(path.clone());
                    }
                    ClientEvent::DownloadFailed { user_message, .. } => {
                        followed.failure = Some(user_message.clone());
                    }
                    _ => {}
                }
                let terminal = event.is_terminal();
                render_event(&event);
                if terminal {
                    break;
                }
            }
            _ = interrupt() => {
                eprintln!("Canceling download...");
                if let Err(e) = controller.cancel_download().await {
                    log::debug!("Cancel request failed: {}", e);
                }
            }
        }
    }
    followed
}

async fn cmd_history(session: Session, action: HistoryAction) -> Result<()> {
    let (controller, rx) = session.into_controller()?;
    drain_events(rx);

    match action {
        HistoryAction::List => {
            let entries = controller.history().await;
            if entries.is_empty() {
                println!("History is empty");
            }
            for (index, entry) in entries.iter().enumerate() {
                println!(
                    "{:>3}  {:<14} {:<28} {:>10}  {}",
                    index,
                    entry.video_id,
                    truncate_title(&entry.title, TITLE_WIDTH),
                    entry.duration.map(format_duration).unwrap_or_default(),
                    flags(entry)
                );
            }
        }
        HistoryAction::Show { video_id } => {
            let entry = controller
                .find_entry(&video_id)
                .await
                .ok_or_else(|| anyhow!("{video_id} is not in history"))?;
            print_entry(&entry);
            if let Some(transcript) = &entry.transcript {
                println!("\nTranscript:\n{transcript}");
            }
            if let Some(summary) = &entry.summary {
                println!("\nSummary:\n{summary}");
            }
        }
        HistoryAction::Remove { index } => {
            let removed = controller.remove_history(index).await?;
            println!("Removed {} ({})", removed.video_id, removed.title);
        }
    }
    Ok(())
}

async fn cmd_transcript(session: Session, text: &str) -> Result<()> {
    let url = require_url(text)?;
    let (controller, rx) = session.into_controller()?;
    drain_events(rx);

    let transcript = controller.generate_transcript(&url).await?;
    println!("{transcript}");
    Ok(())
}

async fn cmd_summary(session: Session, video_id: &str) -> Result<()> {
    let (controller, rx) = session.into_controller()?;
    drain_events(rx);

    let summary = controller.generate_summary(video_id).await?;
    println!("{summary}");
    Ok(())
}

async fn cmd_sentiment(session: Session, text: &str, tab: SentimentTab, page: usize) -> Result<()> {
    let url = require_url(text)?;
    let (controller, rx) = session.into_controller()?;
    drain_events(rx);

    let data = controller.analyze_sentiment(&url).await?;
    let summary = &data.sentiment_summary;

    println!(
        "Analyzed {} of {} comments",
        summary.total_analyzed, summary.total_comments
    );
    for tab in SentimentTab::ALL_TABS {
        if let SentimentTab::Only(s) = tab {
            println!(
                "  {:<9} {:>5}  {:>5.1}%",
                tab,
                tab.count(&data),
                summary.bucket(s).percentage
            );
        }
    }
    if let Some(d) = sentiment::dominant(summary) {
        println!("Overall: {}", d.as_str());
    }

    let mut pager = CommentPager::new(&data.sentiment_results, tab);
    pager.advance_to(page.max(1));
    let start = (page.max(1) - 1) * PAGE_SIZE;
    let visible = pager.visible();
    if start >= visible.len() {
        println!("\nNo {} comments on page {}", tab, page);
        return Ok(());
    }

    println!("\n{} comments ({} total), page {}:", tab, pager.total(), page.max(1));
    for comment in &visible[start..] {
        println!(
            "  [{:<8}] {:+.2}  {}",
            comment.sentiment.as_str(),
            comment.polarity,
            comment.text
        );
    }
    if pager.has_more() {
        println!("  ... more on page {}", page.max(1) + 1);
    }
    Ok(())
}

fn cmd_config(session: Session, action: ConfigAction) -> Result<()> {
    let manager = session.settings_manager();
    match action {
        ConfigAction::Show => {
            let stored = manager.get_client_settings()?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
        ConfigAction::Set { key, value } => {
            let mut stored = manager.get_client_settings()?;
            stored.set_field(&key, &value)?;
            manager.save_client_settings(&stored)?;
            log::info!("Saved setting {}", key);
        }
    }
    Ok(())
}

// ============================================================================
// Rendering
// ============================================================================

fn flags(entry: &VideoEntry) -> String {
    let mut out = Vec::new();
    if entry.downloaded {
        out.push("downloaded");
    }
    if entry.has_transcript {
        out.push("transcript");
    }
    if entry.has_summary {
        out.push("summary");
    }
    if entry.has_analysis {
        out.push("sentiment");
    }
    out.join(",")
}

fn print_entry(entry: &VideoEntry) {
    println!("{}", entry.title);
    println!("  id:       {}", entry.video_id);
    println!("  url:      {}", entry.url);
    if let Some(d) = entry.duration {
        println!("  duration: {}", format_duration(d));
    }
    if !entry.thumbnail.is_empty() {
        println!("  thumb:    {}", entry.thumbnail);
    }
    for format in &entry.video_formats {
        println!("  format {:<8} {}", format.format_id, format.label);
    }
    let f = flags(entry);
    if !f.is_empty() {
        println!("  status:   {f}");
    }
}

fn render_event(event: &ClientEvent) {
    match event {
        ClientEvent::DownloadStarted { job_id, .. } => println!("Job {job_id} started"),
        ClientEvent::DownloadProgress { percent, .. } => println!("  {percent:>3}%"),
        ClientEvent::DownloadCompleted { path, .. } => println!("Saved to {}", path.display()),
        ClientEvent::Notice { level, message } => match level {
            NoticeLevel::Info | NoticeLevel::Success => println!("{message}"),
            // Returned errors are printed by `run`.
            NoticeLevel::Error => log::debug!("Error notice: {}", message),
        },
        other => log::debug!("Event: {:?}", other),
    }
}

// ============================================================================
// App Entry Point
// ============================================================================

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn execute(cli: Cli) -> Result<()> {
    let session = Session::open(&cli)?;
    match cli.command {
        Command::Info { url } => cmd_info(session, &url).await,
        Command::Download { url, format, open } => cmd_download(session, &url, format, open).await,
        Command::History { action } => cmd_history(session, action).await,
        Command::Transcript { url } => cmd_transcript(session, &url).await,
        Command::Summary { video_id } => cmd_summary(session, &video_id).await,
        Command::Sentiment { url, filter, page } => cmd_sentiment(session, &url, filter, page).await,
        Command::Config { action } => cmd_config(session, action),
    }
}

pub fn run() {
    init_logging();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(execute(cli)) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
