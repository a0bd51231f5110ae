use std::ops::ControlFlow;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::types::{DownloadProgress, VideoMetadata};
use crate::security::SourceReference;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("the remote source is rate-limiting requests")]
    RateLimited,

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("cancelled by user")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),
}

impl FetchError {
    /// Classify a failed engine run from its diagnostic output.
    pub fn from_stderr(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();

        if lower.contains("429") || lower.contains("too many requests") {
            return Self::RateLimited;
        }

        let detail = last_error_line(stderr);

        if lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("connection reset")
            || lower.contains("connection refused")
            || lower.contains("network is unreachable")
            || lower.contains("name resolution")
            || lower.contains("getaddrinfo")
        {
            return Self::NetworkFailure(detail);
        }

        if lower.contains("video unavailable")
            || lower.contains("private video")
            || lower.contains("has been removed")
            || lower.contains("is not available")
            || lower.contains("sign in to confirm")
            || lower.contains("members-only")
            || lower.contains("http error 404")
        {
            return Self::SourceUnavailable(detail);
        }

        Self::Unknown(detail)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::NetworkFailure(_) => "network_failure",
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::Cancelled => "cancelled",
            Self::Unknown(_) => "unknown",
        }
    }

    /// What the user can do about it.
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::RateLimited => {
                "The source is throttling requests. Wait a while before retrying, \
                 request fewer subtitle languages at once and avoid downloading \
                 several videos back to back."
            }
            Self::NetworkFailure(_) => "Check your internet connection and try again.",
            Self::SourceUnavailable(_) => {
                "The video may be private, removed, region-locked or age-restricted. \
                 A cookies file from a signed-in browser can help for restricted videos."
            }
            Self::Cancelled => "The download was cancelled.",
            Self::Unknown(_) => "Check the URL, update yt-dlp and try again.",
        }
    }
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| line.starts_with("ERROR"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
        .unwrap_or("unknown error")
        .trim()
        .to_string()
}

/// Callback a [`FetchEngine`] invokes for every progress update. Returning
/// `Break` asks the engine to abort the in-flight download.
pub type ProgressHook<'a> = &'a (dyn Fn(DownloadProgress) -> ControlFlow<()> + Send + Sync);

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Human-readable name of the provider
    fn name(&self) -> &'static str;

    /// Fetch descriptive metadata and the current caption catalog
    async fn fetch_metadata(&self, source: &SourceReference) -> Result<VideoMetadata, FetchError>;
}

#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Human-readable name of the engine
    fn name(&self) -> &'static str;

    /// Download the video using an engine-specific format selector.
    ///
    /// Must return [`FetchError::Cancelled`] when `progress` returns `Break`
    /// or `cancel` fires.
    async fn fetch_video(
        &self,
        source: &SourceReference,
        format_selector: &str,
        progress: ProgressHook<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError>;

    /// Download the subtitle track for one language
    async fn fetch_subtitle(&self, source: &SourceReference, language: &str) -> Result<(), FetchError>;
}
