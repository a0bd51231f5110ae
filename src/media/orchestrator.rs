use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{FetchEngine, FetchError};
use super::types::{DownloadProgress, FetchEvent, FetchOutcome, FetchPlan, LanguageResolution, Quality};
use crate::audit::AuditLog;
use crate::security::SourceReference;

/// Pause between consecutive subtitle requests.
pub const DEFAULT_SUBTITLE_DELAY: Duration = Duration::from_secs(3);

/// Callback receiving [`FetchEvent`]s while a plan runs.
pub type EventSink<'a> = &'a (dyn Fn(FetchEvent) + Send + Sync);

/// Result of a subtitle sequence.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SubtitleTally {
    succeeded: usize,
    total: usize,
    rate_limited: usize,
    cancelled: bool,
    last_error: Option<FetchError>,
}

impl SubtitleTally {
    /// Languages that did not succeed, counting not-attempted ones as failed.
    fn failed(&self) -> usize {
        self.total - self.succeeded
    }

    fn into_outcome(self) -> FetchOutcome {
        if self.cancelled {
            FetchOutcome::Cancelled
        } else if self.succeeded == self.total {
            FetchOutcome::Success
        } else if self.succeeded > 0 {
            FetchOutcome::PartialSuccess {
                succeeded: self.succeeded,
                total: self.total,
            }
        } else if self.rate_limited == self.total {
            FetchOutcome::Failure(FetchError::RateLimited)
        } else {
            FetchOutcome::Failure(
                self.last_error
                    .unwrap_or_else(|| FetchError::Unknown("all subtitle downloads failed".into())),
            )
        }
    }
}

/// Runs fetch plans one request at a time against a [`FetchEngine`].
pub struct SequentialFetchOrchestrator {
    engine: Arc<dyn FetchEngine>,
    audit: Arc<dyn AuditLog>,
    subtitle_delay: Duration,
}

impl SequentialFetchOrchestrator {
    pub fn new(engine: Arc<dyn FetchEngine>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            engine,
            audit,
            subtitle_delay: DEFAULT_SUBTITLE_DELAY,
        }
    }

    pub fn with_subtitle_delay(mut self, delay: Duration) -> Self {
        self.subtitle_delay = delay;
        self
    }

    pub async fn run(
        &self,
        source: &SourceReference,
        plan: &FetchPlan,
        events: EventSink<'_>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        info!(
            "Starting {} for {} with {}",
            plan.mode(),
            source.video_id(),
            self.engine.name()
        );
        self.audit.record(
            "fetch_started",
            &[("url", source.raw().to_string()), ("mode", plan.mode().to_string())],
        );

        let outcome = match plan {
            FetchPlan::VideoOnly(quality) => self.run_video(source, *quality, events, cancel).await,
            FetchPlan::SubtitlesOnly(languages) => {
                if languages.is_empty() {
                    FetchOutcome::Failure(FetchError::SourceUnavailable(
                        "no subtitles available in the requested languages".into(),
                    ))
                } else {
                    let tally = self.run_subtitles(source, languages, events, cancel).await;
                    self.record_tally(source, &tally);
                    tally.into_outcome()
                }
            }
            FetchPlan::VideoAndSubtitles(quality, languages) => {
                match self.run_video(source, *quality, events, cancel).await {
                    FetchOutcome::Success => {
                        self.run_subtitles_after_video(source, languages, events, cancel)
                            .await
                    }
                    other => other,
                }
            }
        };

        self.record_outcome(source, plan, &outcome);
        outcome
    }

    async fn run_video(
        &self,
        source: &SourceReference,
        quality: Quality,
        events: EventSink<'_>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        if cancel.is_cancelled() {
            return FetchOutcome::Cancelled;
        }

        let selector = quality.format_selector();
        debug!("Using format selector {} for quality {}", selector, quality);

        let hook = |progress: DownloadProgress| {
            events(FetchEvent::Video(progress));
            if cancel.is_cancelled() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };

        let result = self.engine.fetch_video(source, selector, &hook, cancel).await;

        // Cancellation wins over whatever error the aborted download produced.
        if cancel.is_cancelled() {
            info!("Video download for {} cancelled", source.video_id());
            return FetchOutcome::Cancelled;
        }

        match result {
            Ok(()) => {
                info!("Video download for {} finished", source.video_id());
                FetchOutcome::Success
            }
            Err(FetchError::Cancelled) => FetchOutcome::Cancelled,
            Err(e) => {
                warn!("Video download for {} failed: {}", source.video_id(), e);
                FetchOutcome::Failure(e)
            }
        }
    }

    /// Subtitles are best-effort once the video is on disk.
    async fn run_subtitles_after_video(
        &self,
        source: &SourceReference,
        languages: &LanguageResolution,
        events: EventSink<'_>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        if languages.is_empty() {
            info!("No matching subtitles for {}, kept video only", source.video_id());
            return FetchOutcome::Success;
        }

        let tally = self.run_subtitles(source, languages, events, cancel).await;
        self.record_tally(source, &tally);

        if tally.cancelled {
            FetchOutcome::Cancelled
        } else if tally.succeeded == tally.total {
            FetchOutcome::Success
        } else {
            FetchOutcome::PartialSuccess {
                succeeded: tally.succeeded,
                total: tally.total,
            }
        }
    }

    async fn run_subtitles(
        &self,
        source: &SourceReference,
        languages: &LanguageResolution,
        events: EventSink<'_>,
        cancel: &CancellationToken,
    ) -> SubtitleTally {
        let mut tally = SubtitleTally {
            total: languages.len(),
            ..Default::default()
        };

        for (index, language) in languages.tags().iter().enumerate() {
            if index > 0 && !self.subtitle_delay.is_zero() {
                events(FetchEvent::Waiting {
                    seconds: self.subtitle_delay.as_secs(),
                });
                debug!("Waiting {:?} before the next subtitle request", self.subtitle_delay);

                tokio::select! {
                    _ = tokio::time::sleep(self.subtitle_delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }

            if cancel.is_cancelled() {
                info!(
                    "Subtitle download cancelled before {} ({} of {} not attempted)",
                    language,
                    tally.total - index,
                    tally.total
                );
                tally.cancelled = true;
                break;
            }

            events(FetchEvent::SubtitleStarted {
                language: language.clone(),
                position: index + 1,
                total: tally.total,
            });

            let result = self.engine.fetch_subtitle(source, language).await;
            let ok = result.is_ok();

            match result {
                Ok(()) => {
                    info!("Downloaded {} subtitles for {}", language, source.video_id());
                    tally.succeeded += 1;
                }
                Err(FetchError::Cancelled) => {
                    tally.cancelled = true;
                }
                Err(FetchError::RateLimited) => {
                    warn!("Rate limited while fetching {} subtitles, skipping", language);
                    tally.rate_limited += 1;
                    tally.last_error = Some(FetchError::RateLimited);
                }
                Err(e) => {
                    warn!("Failed to download {} subtitles: {}", language, e);
                    tally.last_error = Some(e);
                }
            }

            events(FetchEvent::SubtitleFinished {
                language: language.clone(),
                ok,
            });

            if tally.cancelled || cancel.is_cancelled() {
                tally.cancelled = true;
                break;
            }
        }

        tally
    }

    fn record_tally(&self, source: &SourceReference, tally: &SubtitleTally) {
        self.audit.record(
            "subtitles_finished",
            &[
                ("url", source.raw().to_string()),
                ("succeeded", tally.succeeded.to_string()),
                ("failed", tally.failed().to_string()),
                ("total", tally.total.to_string()),
                ("rate_limited", tally.rate_limited.to_string()),
                ("cancelled", tally.cancelled.to_string()),
            ],
        );
    }

    fn record_outcome(&self, source: &SourceReference, plan: &FetchPlan, outcome: &FetchOutcome) {
        let event = match outcome {
            FetchOutcome::Success | FetchOutcome::PartialSuccess { .. } => "fetch_succeeded",
            FetchOutcome::Failure(_) => "fetch_failed",
            FetchOutcome::Cancelled => "fetch_cancelled",
        };

        let mut fields = vec![
            ("url", source.raw().to_string()),
            ("mode", plan.mode().to_string()),
            ("outcome", outcome.to_string()),
        ];
        if let FetchOutcome::Failure(e) = outcome {
            fields.push(("error_kind", e.kind().to_string()));
        }

        self.audit.record(event, &fields);
    }
}
