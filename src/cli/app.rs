use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ConfigAction;
use crate::audit::{AuditLog, TracingAuditLog};
use crate::config::ConfigManager;
use crate::history::{DownloadHistory, HistoryRecord, HistoryStatus};
use crate::media::{
    DownloadMode, EngineOptions, FetchError, FetchEvent, FetchOutcome, FetchPlan, LanguageResolution,
    MetadataProvider, OutcomeCategory, Quality, SequentialFetchOrchestrator, SubtitleNegotiator,
    YtDlpEngine,
};
use crate::security::{
    audit_cookies_file, discover_cookies_file, sanitize_filename, PathGuard, SourceReference,
    MAX_FILENAME_LEN,
    UrlValidator,
};
use crate::utils::{format_duration, format_number, format_size};

/// One `download` invocation. Unset fields fall back to the configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadRequest {
    pub url: String,
    pub mode: Option<DownloadMode>,
    pub quality: Option<Quality>,
    pub langs: Option<Vec<String>>,
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryQuery {
    List {
        limit: usize,
        status: Option<HistoryStatus>,
        search: Option<String>,
    },
    Stats,
    Delete(usize),
    Clear,
}

pub struct App {
    config: ConfigManager,
    history: DownloadHistory,
    audit: Arc<dyn AuditLog>,
    validator: UrlValidator,
    path_guard: PathGuard,
}

impl App {
    pub fn new(config: ConfigManager, history: DownloadHistory) -> Self {
        Self::with_audit(config, history, Arc::new(TracingAuditLog))
    }

    pub fn with_audit(config: ConfigManager, history: DownloadHistory, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            config,
            history,
            validator: UrlValidator::new(audit.clone()),
            audit,
            path_guard: PathGuard::for_current_os(),
        }
    }

    fn cookies_file(&self) -> Option<PathBuf> {
        self.config
            .config()
            .cookies_file
            .clone()
            .filter(|path| path.is_file())
            .or_else(discover_cookies_file)
    }

    fn engine_options(&self, output_dir: PathBuf) -> EngineOptions {
        let config = self.config.config();

        let cookies_file = self.cookies_file();
        if let Some(cookies) = &cookies_file {
            info!("Using cookies file: {}", cookies.display());
            audit_cookies_file(cookies);
        }

        EngineOptions {
            output_dir,
            cookies_file,
            ffmpeg_location: config.ffmpeg_location.clone(),
            player_client: config.player_client.clone(),
            ..Default::default()
        }
    }

    fn engine(&self, options: EngineOptions) -> YtDlpEngine {
        YtDlpEngine::new(self.config.config().ytdlp_binary(), options)
    }

    fn validate(&self, url: &str) -> Result<SourceReference> {
        self.validator
            .validate(url)
            .with_context(|| format!("Invalid URL `{}`", url.trim()))
    }

    pub async fn info(&self, url: &str) -> Result<()> {
        let source = self.validate(url)?;
        let engine = self.engine(self.engine_options(PathBuf::from(&self.config.config().download_path)));
        let metadata = engine.fetch_metadata(&source).await.map_err(explain)?;

        println!("Title:    {}", metadata.title);
        println!("ID:       {} ({} link)", metadata.id, source.shape());
        println!("Source:   {}://{}{}", source.scheme(), source.host(), source.path());
        if let Some(uploader) = &metadata.uploader {
            println!("Uploader: {}", uploader);
        }
        if let Some(duration) = metadata.duration {
            println!("Duration: {}", format_duration(duration));
        }
        if let Some(views) = metadata.view_count {
            println!("Views:    {}", format_number(views));
        }
        Ok(())
    }

    pub async fn subtitles(&self, url: &str) -> Result<()> {
        let source = self.validate(url)?;
        let engine = self.engine(self.engine_options(PathBuf::from(&self.config.config().download_path)));
        let metadata = engine.fetch_metadata(&source).await.map_err(explain)?;

        let captions = &metadata.captions;
        if captions.is_empty() {
            println!("No subtitles available for {}", metadata.title);
            return Ok(());
        }

        let manual: Vec<&str> = captions.manual.keys().map(String::as_str).collect();
        let automatic: Vec<&str> = captions.automatic.keys().map(String::as_str).collect();
        println!("Subtitles for {}", metadata.title);
        println!("  manual ({}):    {}", manual.len(), manual.join(", "));
        println!("  automatic ({}): {}", automatic.len(), automatic.join(", "));
        Ok(())
    }

    pub async fn download(&mut self, request: DownloadRequest) -> Result<FetchOutcome> {
        let source = self.validate(&request.url)?;

        let defaults = self.config.config().clone();
        let output = request.output.unwrap_or(defaults.download_path);
        let destination = self
            .path_guard
            .validate(&output)
            .with_context(|| format!("Refusing to download into `{}`", output.trim()))?;

        info!("Saving downloads to {}", destination.as_path().display());

        let mode = request.mode.unwrap_or(defaults.default_download_mode);
        let quality = request.quality.unwrap_or(defaults.default_quality);
        let langs = request.langs.unwrap_or(defaults.default_subtitle_langs);

        let options = self.engine_options(destination.into_path_buf());
        let provider = Arc::new(self.engine(options.clone()));

        let prepared = if mode.wants_subtitles() {
            SubtitleNegotiator::new(provider.clone())
                .negotiate(&source, &langs)
                .await
        } else {
            provider
                .fetch_metadata(&source)
                .await
                .map(|metadata| (LanguageResolution::empty(), metadata))
        };

        let (resolution, metadata) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                let outcome = FetchOutcome::Failure(e);
                self.store(HistoryRecord::new(source.raw(), source.video_id(), mode, &outcome), &source);
                render_outcome(&outcome);
                return Ok(outcome);
            }
        };

        if mode.wants_subtitles() {
            report_resolution(&langs, &resolution);
        }

        let plan = match mode {
            DownloadMode::VideoOnly => FetchPlan::VideoOnly(quality),
            DownloadMode::SubtitlesOnly => FetchPlan::SubtitlesOnly(resolution.clone()),
            DownloadMode::VideoAndSubtitles => FetchPlan::VideoAndSubtitles(quality, resolution.clone()),
        };

        let stem = output_stem(&metadata.title, source.video_id());
        let engine = self.engine(EngineOptions {
            output_template: format!("{}.%(ext)s", stem.replace('%', "%%")),
            ..options.clone()
        });
        let orchestrator = SequentialFetchOrchestrator::new(Arc::new(engine), self.audit.clone())
            .with_subtitle_delay(Duration::from_secs(defaults.subtitle_delay_secs));

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling download");
                    cancel.cancel();
                }
            })
        };

        println!("Downloading {} ({})", metadata.title, mode);
        let events = |event: FetchEvent| render_event(&event);
        let outcome = orchestrator.run(&source, &plan, &events, &cancel).await;
        interrupt.abort();

        let mut record = HistoryRecord::new(source.raw(), &metadata.title, mode, &outcome);
        if mode != DownloadMode::SubtitlesOnly {
            record = record.with_quality(quality);
        }
        if !resolution.is_empty() {
            record = record.with_subtitle_langs(resolution.tags().to_vec());
        }
        if outcome.is_success() {
            if let (Some(path), size) = collect_outputs(&options.output_dir, &stem).await {
                record = record.with_file(path, size);
            }
        }
        self.store(record, &source);

        render_outcome(&outcome);
        Ok(outcome)
    }

    fn store(&mut self, record: HistoryRecord, source: &SourceReference) {
        if let Err(e) = self.history.add(record) {
            warn!("Failed to save download history: {:#}", e);
        }
        if let Err(e) = self.config.add_recent_url(source.raw()) {
            warn!("Failed to save recent URLs: {:#}", e);
        }
    }

    pub fn history(&mut self, query: HistoryQuery) -> Result<()> {
        match query {
            HistoryQuery::Clear => {
                self.history.clear()?;
                println!("Download history cleared: {}", self.history.path().display());
            }
            HistoryQuery::Delete(index) => {
                if self.history.delete(index)? {
                    println!("Deleted record {}", index);
                } else {
                    return Err(anyhow!(
                        "No history record at index {} ({} records)",
                        index,
                        self.history.all().len()
                    ));
                }
            }
            HistoryQuery::Stats => {
                let stats = self.history.statistics();
                println!("Total:     {}", stats.total);
                println!("Success:   {}", stats.success);
                println!("Failed:    {}", stats.failed);
                println!("Cancelled: {}", stats.cancelled);
                println!("Size:      {}", format_size(stats.total_size));
            }
            HistoryQuery::List { limit, status, search } => {
                let records: Vec<&HistoryRecord> = match (&search, status) {
                    (Some(query), status) => self
                        .history
                        .search(query)
                        .into_iter()
                        .filter(|r| status.is_none_or(|s| r.status == s))
                        .collect(),
                    (None, Some(status)) => self.history.by_status(status),
                    (None, None) => self.history.recent(limit).iter().collect(),
                };

                if records.is_empty() {
                    println!("No matching downloads");
                }
                for (index, record) in records.into_iter().take(limit).enumerate() {
                    println!("{}", describe_record(index, record));
                }
            }
        }
        Ok(())
    }

    pub fn recent(&self) {
        let urls = self.config.recent_urls();
        if urls.is_empty() {
            println!("No recent URLs");
        }
        for url in urls {
            match UrlValidator::extract_video_id(url) {
                Some(id) => println!("{}  [{}]", url, id),
                None => println!("{}", url),
            }
        }
    }

    pub fn logs(&self, lines: usize) -> Result<()> {
        let Some(dir) = self.config.config().logging.file_directory() else {
            println!("File logging is disabled");
            return Ok(());
        };

        for line in crate::logging::recent_lines(dir, lines)? {
            println!("{}", line);
        }
        Ok(())
    }

    /// True when yt-dlp can be run.
    pub async fn check(&self) -> bool {
        let engine = self.engine(EngineOptions::default());
        let available = match engine.check_availability().await {
            Some(version) => {
                println!("yt-dlp {} found", version);
                true
            }
            None => {
                println!("yt-dlp was not found. Install it with `pip install yt-dlp`");
                false
            }
        };

        match self.cookies_file() {
            Some(cookies) => {
                let warnings = audit_cookies_file(&cookies);
                println!("Cookies file: {}", cookies.display());
                for warning in warnings {
                    println!("  warning: {}", warning);
                }
            }
            None => println!("No cookies file found"),
        }

        available
    }

    pub fn config(&mut self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                let rendered =
                    toml::to_string_pretty(self.config.config()).context("Failed to render config")?;
                println!("# {}", self.config.path().display());
                print!("{}", rendered);
            }
            ConfigAction::Reset => {
                self.config.reset_to_defaults()?;
                println!("Configuration reset: {}", self.config.path().display());
            }
            ConfigAction::Path => println!("{}", self.config.path().display()),
        }
        Ok(())
    }
}

/// Bytes kept free for what yt-dlp appends to the stem, such as
/// `.f137.mp4.part` or `.pt-BR.srt`.
const OUTPUT_SUFFIX_RESERVE: usize = 40;

/// File stem for a download: the sanitized title cut to fit the filename
/// limit in bytes once suffixes are added, or the video id when nothing
/// usable is left.
fn output_stem(title: &str, video_id: &str) -> String {
    let sanitized = sanitize_filename(title);
    let limit = MAX_FILENAME_LEN - OUTPUT_SUFFIX_RESERVE;

    let end = sanitized
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= limit)
        .last()
        .unwrap_or(0);
    let stem = sanitized[..end].trim_matches(|c: char| c.is_whitespace() || c == '.');

    if stem.is_empty() {
        video_id.to_string()
    } else {
        stem.to_string()
    }
}

fn explain(error: FetchError) -> anyhow::Error {
    anyhow!("{}\n{}", error, error.guidance())
}

/// Largest file in `dir` named `<stem>.<anything>`, and the combined size of
/// every such file.
async fn collect_outputs(dir: &Path, stem: &str) -> (Option<PathBuf>, u64) {
    let prefix = format!("{stem}.");
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return (None, 0);
    };

    let mut largest: Option<(PathBuf, u64)> = None;
    let mut total = 0;

    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        total += metadata.len();
        if largest.as_ref().is_none_or(|(_, size)| metadata.len() > *size) {
            largest = Some((entry.path(), metadata.len()));
        }
    }

    (largest.map(|(path, _)| path), total)
}

fn report_resolution(requested: &[String], resolution: &LanguageResolution) {
    if resolution.is_empty() {
        println!("None of the requested subtitle languages ({}) are available", requested.join(", "));
    } else if resolution.is_suggested() {
        println!(
            "Requested subtitles ({}) are not available, using {} instead",
            requested.join(", "),
            resolution.tags().join(", ")
        );
    }
}

fn render_event(event: &FetchEvent) {
    match event {
        FetchEvent::Video(progress) => {
            eprint!("\r  {:>5.1}% {}", progress.percent, progress.status);
            let _ = std::io::stderr().flush();
            if progress.percent >= 100.0 {
                eprintln!();
            }
        }
        FetchEvent::SubtitleStarted {
            language,
            position,
            total,
        } => eprintln!("  subtitles [{}/{}] {}", position, total, language),
        FetchEvent::SubtitleFinished { language, ok } => {
            if !ok {
                eprintln!("  subtitles {} skipped", language);
            }
        }
        FetchEvent::Waiting { seconds } => eprintln!("  waiting {}s before the next subtitle request", seconds),
    }
}

fn render_outcome(outcome: &FetchOutcome) {
    match (outcome.category(), outcome) {
        (OutcomeCategory::Completed, FetchOutcome::PartialSuccess { succeeded, total }) => {
            println!("Download finished, {} of {} subtitle languages saved", succeeded, total)
        }
        (OutcomeCategory::Completed, _) => println!("Download finished"),
        (OutcomeCategory::Cancelled, _) => println!("Download cancelled"),
        (OutcomeCategory::RateLimited, _) => {
            println!("Download failed: {}", FetchError::RateLimited);
            println!("{}", FetchError::RateLimited.guidance());
        }
        (OutcomeCategory::Failed, FetchOutcome::Failure(e)) => {
            println!("Download failed: {}", e);
            println!("{}", e.guidance());
        }
        (OutcomeCategory::Failed, _) => println!("Download failed"),
    }
}

fn describe_record(index: usize, record: &HistoryRecord) -> String {
    let mut line = format!(
        "{:>3}. {} [{}] {} ({})",
        index,
        record.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
        record.status,
        record.title,
        record.mode
    );
    if let Some(size) = record.file_size {
        line.push_str(&format!(" {}", format_size(size)));
    }
    line.push_str(&format!("\n     {}", record.url));
    line
}
