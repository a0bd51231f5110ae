use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::engine::FetchError;

/// One advertised subtitle rendition. Opaque to the negotiation logic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionTrack {
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Subtitle tracks a source advertises for one item, keyed by language tag.
///
/// Built fresh from every metadata query; never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionCatalog {
    pub manual: BTreeMap<String, Vec<CaptionTrack>>,
    pub automatic: BTreeMap<String, Vec<CaptionTrack>>,
}

impl CaptionCatalog {
    /// Catalog with no track details, keyed by the given languages.
    #[cfg(test)]
    pub fn from_languages<M, A>(manual: M, automatic: A) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            manual: manual.into_iter().map(|l| (l.into(), Vec::new())).collect(),
            automatic: automatic.into_iter().map(|l| (l.into(), Vec::new())).collect(),
        }
    }

    pub fn contains(&self, language: &str) -> bool {
        self.manual.contains_key(language) || self.automatic.contains_key(language)
    }

    /// Sorted union of manual and automatic language tags.
    pub fn all_languages(&self) -> BTreeSet<&str> {
        self.manual
            .keys()
            .chain(self.automatic.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.manual.is_empty() && self.automatic.is_empty()
    }
}

/// Descriptive metadata returned by a [`MetadataProvider`](super::MetadataProvider).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub duration: Option<u64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
    pub captions: CaptionCatalog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// Every tag was requested verbatim.
    Exact,
    /// No requested tag matched, tags are regional variants found by prefix.
    Suggested,
}

/// Ordered language tags a run will fetch. Every tag was present in the
/// catalog it was resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageResolution {
    tags: Vec<String>,
    kind: ResolutionKind,
}

impl LanguageResolution {
    pub(crate) fn new(tags: Vec<String>, kind: ResolutionKind) -> Self {
        Self { tags, kind }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), ResolutionKind::Exact)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn kind(&self) -> ResolutionKind {
        self.kind
    }

    pub fn is_suggested(&self) -> bool {
        self.kind() == ResolutionKind::Suggested
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Requested video quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "worst")]
    Worst,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl Quality {
    /// Unrecognized values fall back to [`Quality::Best`].
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "worst" => Self::Worst,
            "720p" | "720" => Self::P720,
            "480p" | "480" => Self::P480,
            "360p" | "360" => Self::P360,
            _ => Self::Best,
        }
    }

    /// yt-dlp format selector for this quality.
    pub fn format_selector(self) -> &'static str {
        match self {
            Self::Best => "bv*+ba/b",
            Self::Worst => "worst",
            Self::P720 => "bv*[height<=720]+ba/b[height<=720]",
            Self::P480 => "bv*[height<=480]+ba/b[height<=480]",
            Self::P360 => "bv*[height<=360]+ba/b[height<=360]",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::Worst => "worst",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::P360 => "360p",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a download run fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    #[default]
    VideoOnly,
    SubtitlesOnly,
    VideoAndSubtitles,
}

impl DownloadMode {
    pub fn wants_subtitles(self) -> bool {
        matches!(self, Self::SubtitlesOnly | Self::VideoAndSubtitles)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VideoOnly => "video_only",
            Self::SubtitlesOnly => "subtitles_only",
            Self::VideoAndSubtitles => "video_and_subtitles",
        }
    }
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    VideoOnly(Quality),
    SubtitlesOnly(LanguageResolution),
    VideoAndSubtitles(Quality, LanguageResolution),
}

impl FetchPlan {
    pub fn mode(&self) -> DownloadMode {
        match self {
            Self::VideoOnly(_) => DownloadMode::VideoOnly,
            Self::SubtitlesOnly(_) => DownloadMode::SubtitlesOnly,
            Self::VideoAndSubtitles(..) => DownloadMode::VideoAndSubtitles,
        }
    }
}

/// Final result of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    PartialSuccess { succeeded: usize, total: usize },
    Failure(FetchError),
    Cancelled,
}

/// Coarse classification for choosing user guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeCategory {
    Completed,
    Cancelled,
    RateLimited,
    Failed,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess { .. })
    }

    pub fn category(&self) -> OutcomeCategory {
        match self {
            Self::Success | Self::PartialSuccess { .. } => OutcomeCategory::Completed,
            Self::Cancelled => OutcomeCategory::Cancelled,
            Self::Failure(FetchError::RateLimited) => OutcomeCategory::RateLimited,
            Self::Failure(_) => OutcomeCategory::Failed,
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialSuccess { succeeded, total } => {
                write!(f, "partial success ({succeeded}/{total})")
            }
            Self::Failure(e) => write!(f, "failure: {e}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Progress snapshot reported by a fetch engine during a video download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub percent: f64,
    pub status: String,
}

/// Events forwarded to the caller while a plan runs.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// Engine progress, forwarded unchanged.
    Video(DownloadProgress),
    SubtitleStarted { language: String, position: usize, total: usize },
    SubtitleFinished { language: String, ok: bool },
    Waiting { seconds: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_mapping() {
        assert_eq!(Quality::parse_lossy("720p").format_selector(), "bv*[height<=720]+ba/b[height<=720]");
        assert_eq!(Quality::parse_lossy("BEST"), Quality::Best);
        assert_eq!(Quality::parse_lossy("worst").format_selector(), "worst");
        assert_eq!(Quality::parse_lossy("4k"), Quality::Best);
        assert_eq!(Quality::parse_lossy("").format_selector(), "bv*+ba/b");
    }

    #[test]
    fn test_catalog_union_is_sorted_and_deduplicated() {
        let mut catalog = CaptionCatalog::from_languages(["ko", "en"], ["ja", "en"]);
        catalog.automatic.insert("de".into(), vec![CaptionTrack::default()]);

        let all: Vec<&str> = catalog.all_languages().into_iter().collect();
        assert_eq!(all, vec!["de", "en", "ja", "ko"]);
        assert!(catalog.contains("ja"));
        assert!(!catalog.contains("fr"));
    }

    #[test]
    fn test_outcome_category() {
        assert_eq!(FetchOutcome::Success.category(), OutcomeCategory::Completed);
        assert_eq!(
            FetchOutcome::PartialSuccess { succeeded: 0, total: 2 }.category(),
            OutcomeCategory::Completed
        );
        assert_eq!(
            FetchOutcome::Failure(FetchError::RateLimited).category(),
            OutcomeCategory::RateLimited
        );
        assert_eq!(
            FetchOutcome::Failure(FetchError::Unknown("x".into())).category(),
            OutcomeCategory::Failed
        );
        assert_eq!(FetchOutcome::Cancelled.category(), OutcomeCategory::Cancelled);
    }

    #[test]
    fn test_download_mode_serde() {
        let json = serde_json::to_string(&DownloadMode::VideoAndSubtitles).unwrap();
        assert_eq!(json, "\"video_and_subtitles\"");
        assert_eq!(FetchPlan::VideoOnly(Quality::Best).mode(), DownloadMode::VideoOnly);
    }
}
