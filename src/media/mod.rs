mod engine;
mod orchestrator;
mod subtitles;
mod types;
mod ytdlp;

pub use engine::{FetchError, MetadataProvider};
pub use orchestrator::SequentialFetchOrchestrator;
pub use subtitles::{parse_language_list, SubtitleNegotiator};
pub use types::{
    DownloadMode, FetchEvent, FetchOutcome, FetchPlan, LanguageResolution, OutcomeCategory, Quality,
};
pub use ytdlp::{EngineOptions, YtDlpEngine};
