use std::sync::Arc;

use tracing::{debug, info, warn};

use super::engine::{FetchError, MetadataProvider};
use super::types::{CaptionCatalog, LanguageResolution, ResolutionKind, VideoMetadata};
use crate::security::SourceReference;

/// Decides which subtitle languages to fetch for a video.
pub struct SubtitleNegotiator {
    provider: Arc<dyn MetadataProvider>,
}

impl SubtitleNegotiator {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self { provider }
    }

    /// Query the provider for a fresh catalog and resolve `requested` against it.
    pub async fn negotiate(
        &self,
        source: &SourceReference,
        requested: &[String],
    ) -> Result<(LanguageResolution, VideoMetadata), FetchError> {
        debug!("Fetching caption catalog with {} for {}", self.provider.name(), source);
        let metadata = self.provider.fetch_metadata(source).await?;

        info!(
            "Available subtitles for {}: manual={:?} automatic={} languages",
            source.video_id(),
            metadata.captions.manual.keys().collect::<Vec<_>>(),
            metadata.captions.automatic.len()
        );

        let resolution = Self::resolve(requested, &metadata.captions);
        Ok((resolution, metadata))
    }

    /// Exact matches win. Only when none of the requested tags exists does
    /// each tag fall back to the first catalog language it prefixes
    /// (`en` -> `en-US`).
    pub fn resolve(requested: &[String], catalog: &CaptionCatalog) -> LanguageResolution {
        let mut unique: Vec<&str> = Vec::new();
        for tag in requested.iter().map(|tag| tag.trim()) {
            if !tag.is_empty() && !unique.contains(&tag) {
                unique.push(tag);
            }
        }

        let found: Vec<String> = unique
            .iter()
            .filter(|tag| catalog.contains(tag))
            .map(|tag| tag.to_string())
            .collect();

        if !found.is_empty() {
            return LanguageResolution::new(found, ResolutionKind::Exact);
        }

        warn!("None of the requested subtitle languages {:?} are available", unique);

        let available = catalog.all_languages();
        let mut suggested: Vec<String> = Vec::new();
        for tag in unique {
            let variant = available
                .iter()
                .copied()
                .find(|lang| lang.starts_with(tag) && !suggested.iter().any(|s| s.as_str() == *lang));

            if let Some(variant) = variant {
                info!("Using subtitle language {} in place of {}", variant, tag);
                suggested.push(variant.to_string());
            }
        }

        LanguageResolution::new(suggested, ResolutionKind::Suggested)
    }
}

/// Split a comma or whitespace separated language list (`"ko, en"`).
pub fn parse_language_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_exact_match_skips_fallback() {
        let catalog = CaptionCatalog::from_languages(["ko"], ["ja"]);
        let resolution = SubtitleNegotiator::resolve(&tags(&["ko", "en"]), &catalog);

        assert_eq!(resolution.tags(), &["ko".to_string()]);
        assert_eq!(resolution.kind(), ResolutionKind::Exact);
    }

    #[test]
    fn test_exact_match_keeps_requested_order() {
        let catalog = CaptionCatalog::from_languages(["en"], ["ko", "ja"]);
        let resolution = SubtitleNegotiator::resolve(&tags(&["ja", "en", "ko"]), &catalog);
        assert_eq!(resolution.tags(), tags(&["ja", "en", "ko"]).as_slice());
    }

    #[test]
    fn test_prefix_fallback() {
        let catalog = CaptionCatalog::from_languages(Vec::<String>::new(), ["fr-FR"]);
        let resolution = SubtitleNegotiator::resolve(&tags(&["fr"]), &catalog);

        assert_eq!(resolution.tags(), &["fr-FR".to_string()]);
        assert!(resolution.is_suggested());
    }

    #[test]
    fn test_fallback_takes_one_variant_per_tag() {
        let catalog = CaptionCatalog::from_languages(["en-GB"], ["en-US", "pt-BR", "pt-PT"]);
        let resolution = SubtitleNegotiator::resolve(&tags(&["pt", "en"]), &catalog);
        assert_eq!(resolution.tags(), tags(&["pt-BR", "en-GB"]).as_slice());
    }

    #[test]
    fn test_no_match_and_no_variant() {
        let catalog = CaptionCatalog::from_languages(["ko"], ["ja"]);
        let resolution = SubtitleNegotiator::resolve(&tags(&["xx"]), &catalog);
        assert!(resolution.is_empty());
    }

    #[test]
    fn test_duplicates_are_removed() {
        let catalog = CaptionCatalog::from_languages(["ko"], ["ko"]);
        let resolution = SubtitleNegotiator::resolve(&tags(&["ko", "ko"]), &catalog);
        assert_eq!(resolution.tags(), &["ko".to_string()]);

        let catalog = CaptionCatalog::from_languages(Vec::<String>::new(), ["en-US", "en-GB"]);
        let resolution = SubtitleNegotiator::resolve(&tags(&["en", "en"]), &catalog);
        assert_eq!(resolution.tags(), &["en-GB".to_string()]);

        let resolution = SubtitleNegotiator::resolve(&tags(&["en", "en-"]), &catalog);
        assert_eq!(resolution.tags(), tags(&["en-GB", "en-US"]).as_slice());
    }

    #[test]
    fn test_resolution_never_fabricates() {
        let catalog = CaptionCatalog::from_languages(["de"], ["es-419"]);
        for requested in [tags(&["es"]), tags(&["de", "xx"]), tags(&["", " "]), tags(&["e"])] {
            let resolution = SubtitleNegotiator::resolve(&requested, &catalog);
            assert!(resolution.tags().iter().all(|tag| catalog.contains(tag)));
        }
    }

    #[test]
    fn test_parse_language_list() {
        assert_eq!(parse_language_list("ko, en ja,,"), tags(&["ko", "en", "ja"]));
        assert!(parse_language_list("  ").is_empty());
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn fetch_metadata(&self, source: &SourceReference) -> Result<VideoMetadata, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let automatic: Vec<String> = if call == 0 { vec![] } else { vec!["en".into()] };
            Ok(VideoMetadata {
                id: source.video_id().to_string(),
                title: "Test".into(),
                captions: CaptionCatalog::from_languages(["ko"], automatic),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_negotiate_queries_fresh_catalog_each_time() {
        let audit = Arc::new(crate::audit::testing::RecordingAuditLog::default());
        let source = crate::security::UrlValidator::new(audit)
            .validate("https://youtu.be/dQw4w9WgXcQ")
            .unwrap();
        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let negotiator = SubtitleNegotiator::new(provider.clone());

        let (first, metadata) = negotiator.negotiate(&source, &tags(&["en"])).await.unwrap();
        assert!(first.is_empty());
        assert_eq!(metadata.id, "dQw4w9WgXcQ");

        let (second, _) = negotiator.negotiate(&source, &tags(&["en"])).await.unwrap();
        assert_eq!(second.tags(), &["en".to_string()]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
