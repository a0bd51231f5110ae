use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{FetchEngine, FetchError, MetadataProvider, ProgressHook};
use super::types::{CaptionCatalog, CaptionTrack, DownloadProgress, VideoMetadata};
use crate::security::SourceReference;

const PROGRESS_PREFIX: &str = "download:";

/// Options the yt-dlp engine passes on every invocation.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub output_dir: PathBuf,
    pub output_template: String,
    pub cookies_file: Option<PathBuf>,
    pub ffmpeg_location: Option<PathBuf>,
    /// Extractor hint forwarded as `youtube:player_client=<value>`.
    pub player_client: Option<String>,
    pub subtitle_format: String,
    pub metadata_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            output_template: "%(title)s.%(ext)s".to_string(),
            cookies_file: None,
            ffmpeg_location: None,
            player_client: None,
            subtitle_format: "srt".to_string(),
            metadata_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    subtitles: Option<BTreeMap<String, Vec<CaptionTrack>>>,
    #[serde(default)]
    automatic_captions: Option<BTreeMap<String, Vec<CaptionTrack>>>,
}

/// Turn `--dump-json` output into [`VideoMetadata`].
pub fn parse_metadata(json: &str) -> Result<VideoMetadata, FetchError> {
    let raw: RawInfo = serde_json::from_str(json)
        .map_err(|e| FetchError::Unknown(format!("failed to parse media metadata: {e}")))?;

    Ok(VideoMetadata {
        id: raw.id,
        title: raw.title.unwrap_or_else(|| "Unknown Title".to_string()),
        duration: raw.duration.map(|d| d as u64),
        uploader: raw.uploader,
        view_count: raw.view_count,
        captions: CaptionCatalog {
            manual: raw.subtitles.unwrap_or_default(),
            automatic: raw.automatic_captions.unwrap_or_default(),
        },
    })
}

/// Parse a `download:<percent>` progress line.
pub fn parse_progress_line(line: &str) -> Option<DownloadProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let percent = rest.trim().trim_end_matches('%').trim().parse::<f64>().ok()?;

    Some(DownloadProgress {
        percent,
        status: if percent >= 100.0 { "finished" } else { "downloading" }.to_string(),
    })
}

pub struct YtDlpEngine {
    binary: PathBuf,
    options: EngineOptions,
}

impl YtDlpEngine {
    pub fn new(binary: impl Into<PathBuf>, options: EngineOptions) -> Self {
        Self {
            binary: binary.into(),
            options,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-warnings".to_string(),
            "--output".to_string(),
            self.options
                .output_dir
                .join(&self.options.output_template)
                .to_string_lossy()
                .to_string(),
        ];

        if let Some(cookies) = &self.options.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().to_string());
        }

        if let Some(ffmpeg) = &self.options.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().to_string());
        }

        if let Some(client) = &self.options.player_client {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={client}"));
        }

        args
    }

    fn video_args(&self, source: &SourceReference, format_selector: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "--format".to_string(),
            format_selector.to_string(),
            "--newline".to_string(),
            "--progress-template".to_string(),
            format!("{PROGRESS_PREFIX}%(progress._percent_str)s"),
            source.raw().to_string(),
        ]);
        args
    }

    fn subtitle_args(&self, source: &SourceReference, language: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "--skip-download".to_string(),
            "--write-subs".to_string(),
            "--write-auto-subs".to_string(),
            "--sub-langs".to_string(),
            language.to_string(),
            "--convert-subs".to_string(),
            self.options.subtitle_format.clone(),
            "--sleep-subtitles".to_string(),
            "3".to_string(),
            source.raw().to_string(),
        ]);
        args
    }

    async fn ensure_output_dir(&self) -> Result<(), FetchError> {
        tokio::fs::create_dir_all(&self.options.output_dir)
            .await
            .map_err(|e| {
                FetchError::Unknown(format!(
                    "failed to create {}: {e}",
                    self.options.output_dir.display()
                ))
            })
    }

    /// Probe yt-dlp (required) and ffmpeg (needed for merging and subtitle
    /// conversion). Returns the yt-dlp version when available.
    pub async fn check_availability(&self) -> Option<String> {
        let version = match Command::new(&self.binary).arg("--version").output().await {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                info!("✅ yt-dlp is available, version: {}", version);
                Some(version)
            }
            Ok(_) => {
                warn!("❌ yt-dlp command failed");
                None
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                None
            }
        };

        let ffmpeg = self
            .options
            .ffmpeg_location
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));
        let ffmpeg_available = match Command::new(&ffmpeg).arg("-version").output().await {
            Ok(output) if output.status.success() => {
                let version_line = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or("unknown")
                    .to_string();
                info!("✅ ffmpeg is available: {}", version_line);
                true
            }
            Ok(_) => {
                warn!("❌ ffmpeg command failed");
                false
            }
            Err(e) => {
                warn!("❌ ffmpeg not found: {} (required for merging and subtitle conversion)", e);
                false
            }
        };

        if version.is_some() && !ffmpeg_available {
            warn!("⚠️  yt-dlp will work but merging and subtitle conversion will be disabled");
        }

        version
    }
}

#[async_trait]
impl MetadataProvider for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch_metadata(&self, source: &SourceReference) -> Result<VideoMetadata, FetchError> {
        debug!("Extracting metadata with yt-dlp for: {}", source);

        let mut args = self.base_args();
        args.extend([
            "--dump-json".to_string(),
            "--skip-download".to_string(),
            source.raw().to_string(),
        ]);

        let output = tokio::time::timeout(
            self.options.metadata_timeout,
            Command::new(&self.binary).args(&args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| FetchError::NetworkFailure("media metadata extraction timed out".into()))?
        .map_err(|e| FetchError::Unknown(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Metadata extraction failed for {}: {}", source, stderr.trim());
            return Err(FetchError::from_stderr(&stderr));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        parse_metadata(&json)
    }
}

#[async_trait]
impl FetchEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch_video(
        &self,
        source: &SourceReference,
        format_selector: &str,
        progress: ProgressHook<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        self.ensure_output_dir().await?;

        info!("Downloading video with yt-dlp: {}", source.video_id());
        debug!("Using format: {}", format_selector);

        let mut child = Command::new(&self.binary)
            .args(self.video_args(source, format_selector))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::Unknown(format!("failed to start yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Unknown("failed to capture yt-dlp stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::Unknown("failed to capture yt-dlp stderr".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            let _ = stderr.read_to_string(&mut buffer).await;
            buffer
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut aborted = false;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(update) = parse_progress_line(&line) {
                            if progress(update).is_break() {
                                aborted = true;
                                break;
                            }
                        } else {
                            debug!("yt-dlp: {}", line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read yt-dlp output: {}", e);
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    aborted = true;
                    break;
                }
            }
        }

        if aborted {
            info!("Aborting yt-dlp download of {}", source.video_id());
            let _ = child.kill().await;
            stderr_task.abort();
            return Err(FetchError::Cancelled);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| FetchError::Unknown(format!("yt-dlp process failed: {e}")))?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            warn!("Video download failed for {}: {}", source, stderr.trim());
            return Err(FetchError::from_stderr(&stderr));
        }

        Ok(())
    }

    async fn fetch_subtitle(&self, source: &SourceReference, language: &str) -> Result<(), FetchError> {
        self.ensure_output_dir().await?;

        info!("Downloading {} subtitles with yt-dlp: {}", language, source.video_id());

        let output = Command::new(&self.binary)
            .args(self.subtitle_args(source, language))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Unknown(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::from_stderr(&stderr));
        }

        Ok(())
    }
}
