use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::media::{DownloadMode, FetchOutcome, Quality};

/// Oldest records are dropped beyond this many entries.
pub const MAX_HISTORY_RECORDS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Failed,
    Cancelled,
}

impl From<&FetchOutcome> for HistoryStatus {
    fn from(outcome: &FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Success | FetchOutcome::PartialSuccess { .. } => Self::Success,
            FetchOutcome::Failure(_) => Self::Failed,
            FetchOutcome::Cancelled => Self::Cancelled,
        }
    }
}

impl FromStr for HistoryStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!(
                "unknown status `{other}`, expected success, failed or cancelled"
            )),
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub title: String,
    pub mode: DownloadMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_langs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub status: HistoryStatus,
}

impl HistoryRecord {
    pub fn new(url: &str, title: &str, mode: DownloadMode, outcome: &FetchOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            url: url.to_string(),
            title: title.to_string(),
            mode,
            quality: None,
            subtitle_langs: None,
            file_path: None,
            file_size: None,
            status: outcome.into(),
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_subtitle_langs(mut self, langs: Vec<String>) -> Self {
        self.subtitle_langs = Some(langs);
        self
    }

    pub fn with_file(mut self, path: PathBuf, size: u64) -> Self {
        self.file_path = Some(path);
        self.file_size = Some(size);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_size: u64,
}

/// Download history persisted as JSON, newest record first.
pub struct DownloadHistory {
    path: PathBuf,
    records: Vec<HistoryRecord>,
}

impl DownloadHistory {
    /// A missing or unreadable file yields an empty history.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let records = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<HistoryRecord>>(&contents) {
                Ok(records) => {
                    debug!("Loaded {} history records from {}", records.len(), path.display());
                    records
                }
                Err(e) => {
                    warn!("History file {} is corrupt, starting empty: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read history file {}: {}", path.display(), e);
                Vec::new()
            }
        };

        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.records).context("Failed to serialize history")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write history to {}", self.path.display()))
    }

    pub fn add(&mut self, record: HistoryRecord) -> Result<()> {
        info!("Recording {} download of {}", record.status, record.url);
        self.records.insert(0, record);
        self.records.truncate(MAX_HISTORY_RECORDS);
        self.save()
    }

    pub fn recent(&self, limit: usize) -> &[HistoryRecord] {
        &self.records[..limit.min(self.records.len())]
    }

    pub fn all(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn by_status(&self, status: HistoryStatus) -> Vec<&HistoryRecord> {
        self.records.iter().filter(|r| r.status == status).collect()
    }

    /// Case-insensitive substring match over title and URL.
    pub fn search(&self, query: &str) -> Vec<&HistoryRecord> {
        let query = query.to_lowercase();
        self.records
            .iter()
            .filter(|r| r.title.to_lowercase().contains(&query) || r.url.to_lowercase().contains(&query))
            .collect()
    }

    pub fn statistics(&self) -> HistoryStats {
        self.records.iter().fold(
            HistoryStats {
                total: self.records.len(),
                ..Default::default()
            },
            |mut stats, record| {
                match record.status {
                    HistoryStatus::Success => stats.success += 1,
                    HistoryStatus::Failed => stats.failed += 1,
                    HistoryStatus::Cancelled => stats.cancelled += 1,
                }
                stats.total_size += record.file_size.unwrap_or(0);
                stats
            },
        )
    }

    pub fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.save()
    }

    /// Remove the record at `index` (0 is the newest). Returns false when out of range.
    pub fn delete(&mut self, index: usize) -> Result<bool> {
        if index >= self.records.len() {
            return Ok(false);
        }

        self.records.remove(index);
        self.save()?;
        Ok(true)
    }
}

pub fn default_history_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("tubegate").join("history.json"))
        .unwrap_or_else(|| PathBuf::from("download_history.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FetchError;

    fn record(title: &str, outcome: FetchOutcome) -> HistoryRecord {
        HistoryRecord::new(
            &format!("https://youtu.be/{title}"),
            title,
            DownloadMode::VideoOnly,
            &outcome,
        )
    }

    #[test]
    fn test_status_from_outcome() {
        assert_eq!(HistoryStatus::from(&FetchOutcome::Success), HistoryStatus::Success);
        assert_eq!(
            HistoryStatus::from(&FetchOutcome::PartialSuccess { succeeded: 1, total: 3 }),
            HistoryStatus::Success
        );
        assert_eq!(
            HistoryStatus::from(&FetchOutcome::Failure(FetchError::RateLimited)),
            HistoryStatus::Failed
        );
        assert_eq!(HistoryStatus::from(&FetchOutcome::Cancelled), HistoryStatus::Cancelled);
        assert_eq!("Canceled".parse::<HistoryStatus>(), Ok(HistoryStatus::Cancelled));
        assert!("done".parse::<HistoryStatus>().is_err());
    }

    #[test]
    fn test_add_is_newest_first_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = DownloadHistory::load(dir.path().join("history.json"));

        for i in 0..MAX_HISTORY_RECORDS + 5 {
            history.add(record(&format!("video{i}"), FetchOutcome::Success)).unwrap();
        }

        assert_eq!(history.all().len(), MAX_HISTORY_RECORDS);
        assert_eq!(history.recent(1)[0].title, format!("video{}", MAX_HISTORY_RECORDS + 4));
        assert_eq!(history.all().last().unwrap().title, "video5");
        assert_eq!(history.recent(1000).len(), MAX_HISTORY_RECORDS);
    }

    #[test]
    fn test_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let mut history = DownloadHistory::load(&path);
        history
            .add(
                record("Rust Talk", FetchOutcome::Success)
                    .with_quality(Quality::P720)
                    .with_subtitle_langs(vec!["ko".into(), "en".into()])
                    .with_file(PathBuf::from("downloads/Rust Talk.mp4"), 2048),
            )
            .unwrap();

        let reloaded = DownloadHistory::load(&path);
        assert_eq!(reloaded.all(), history.all());
        assert_eq!(reloaded.all()[0].quality, Some(Quality::P720));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"status\": \"success\""));
        assert!(raw.contains("\"quality\": \"720p\""));
    }

    #[test]
    fn test_queries_and_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = DownloadHistory::load(dir.path().join("history.json"));

        history
            .add(record("Learning Rust", FetchOutcome::Success).with_file(PathBuf::from("a.mp4"), 100))
            .unwrap();
        history
            .add(record("Cooking Show", FetchOutcome::Failure(FetchError::RateLimited)))
            .unwrap();
        history.add(record("rust async", FetchOutcome::Cancelled)).unwrap();
        history
            .add(
                record("Music", FetchOutcome::PartialSuccess { succeeded: 1, total: 2 })
                    .with_file(PathBuf::from("b.mp4"), 50),
            )
            .unwrap();

        let titles: Vec<&str> = history.search("RUST").iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["rust async", "Learning Rust"]);
        assert_eq!(history.search("youtu.be/Music").len(), 1);
        assert_eq!(history.by_status(HistoryStatus::Success).len(), 2);

        assert_eq!(
            history.statistics(),
            HistoryStats {
                total: 4,
                success: 2,
                failed: 1,
                cancelled: 1,
                total_size: 150,
            }
        );
    }

    #[test]
    fn test_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = DownloadHistory::load(&path);
        history.add(record("first", FetchOutcome::Success)).unwrap();
        history.add(record("second", FetchOutcome::Success)).unwrap();

        assert!(!history.delete(5).unwrap());
        assert!(history.delete(0).unwrap());
        assert_eq!(DownloadHistory::load(&path).all()[0].title, "first");

        history.clear().unwrap();
        assert!(DownloadHistory::load(&path).all().is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{ not json").unwrap();

        let history = DownloadHistory::load(&path);
        assert!(history.all().is_empty());
        assert_eq!(history.statistics(), HistoryStats::default());
    }
}
