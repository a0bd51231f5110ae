use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::audit::AuditLog;

/// Hosts accepted as media sources. Matching is exact: look-alike domains and
/// subdomains outside this list are rejected.
pub const ALLOWED_HOSTS: [&str; 4] = ["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];

const SHORT_LINK_HOST: &str = "youtu.be";

/// Upper bound on filename length, in characters.
pub const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL is empty")]
    Empty,

    #[error("URL could not be parsed: {0}")]
    Malformed(String),

    #[error("scheme `{0}` is not allowed, only http and https are accepted")]
    BadScheme(String),

    #[error("host `{0}` is not an accepted media source")]
    DisallowedHost(String),

    #[error("URL does not point at a single video")]
    UnrecognizedShape,

    #[error("no video identifier found in URL")]
    NoIdentifier,
}

impl ValidationError {
    /// Short machine-friendly name used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Malformed(_) => "malformed",
            Self::BadScheme(_) => "bad_scheme",
            Self::DisallowedHost(_) => "disallowed_host",
            Self::UnrecognizedShape => "unrecognized_shape",
            Self::NoIdentifier => "no_identifier",
        }
    }
}

/// Accepted URL layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlShape {
    /// `youtube.com/watch?v=ID`
    Watch,
    /// `youtu.be/ID`
    ShortLink,
    /// `youtube.com/shorts/ID`
    Shorts,
    /// `youtube.com/embed/ID`
    Embed,
    /// `youtube.com/v/ID`
    LegacyV,
}

impl UrlShape {
    fn detect(host: &str, url: &Url) -> Option<Self> {
        if host == SHORT_LINK_HOST {
            return Some(Self::ShortLink);
        }

        let mut segments = url.path_segments()?;
        match (segments.next(), segments.next()) {
            (Some("watch"), None) | (Some("watch"), Some("")) => Some(Self::Watch),
            (Some("shorts"), Some(_)) => Some(Self::Shorts),
            (Some("embed"), Some(_)) => Some(Self::Embed),
            (Some("v"), Some(_)) => Some(Self::LegacyV),
            _ => None,
        }
    }

    fn extract_id(self, url: &Url) -> Option<String> {
        let candidate = match self {
            Self::Watch => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Self::ShortLink => url
                .path_segments()
                .and_then(|mut segments| segments.next())
                .map(str::to_string),
            Self::Shorts | Self::Embed | Self::LegacyV => url
                .path_segments()
                .and_then(|mut segments| segments.nth(1))
                .map(str::to_string),
        }?;

        is_valid_id(&candidate).then_some(candidate)
    }
}

impl fmt::Display for UrlShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Watch => "watch",
            Self::ShortLink => "short_link",
            Self::Shorts => "shorts",
            Self::Embed => "embed",
            Self::LegacyV => "legacy_v",
        };
        f.write_str(name)
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A URL that passed every validation layer. Only [`UrlValidator`] builds these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    raw: String,
    scheme: String,
    host: String,
    path: String,
    shape: UrlShape,
    video_id: String,
}

impl SourceReference {
    /// The trimmed input as supplied by the caller.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn shape(&self) -> UrlShape {
        self.shape
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Allow-list validator for untrusted URL input.
///
/// Each layer (scheme, host, path shape, identifier) fails closed, and every
/// decision is reported to the injected [`AuditLog`].
#[derive(Clone)]
pub struct UrlValidator {
    audit: Arc<dyn AuditLog>,
}

impl UrlValidator {
    pub fn new(audit: Arc<dyn AuditLog>) -> Self {
        Self { audit }
    }

    pub fn validate(&self, raw_url: &str) -> Result<SourceReference, ValidationError> {
        let trimmed = raw_url.trim();

        match Self::check(trimmed) {
            Ok(reference) => {
                self.audit.record(
                    "url_validated",
                    &[
                        ("url", reference.raw.clone()),
                        ("shape", reference.shape.to_string()),
                        ("video_id", reference.video_id.clone()),
                    ],
                );
                Ok(reference)
            }
            Err(e) => {
                self.audit.record(
                    "url_rejected",
                    &[
                        ("url", trimmed.to_string()),
                        ("reason", e.kind().to_string()),
                        ("detail", e.to_string()),
                    ],
                );
                Err(e)
            }
        }
    }

    fn check(url: &str) -> Result<SourceReference, ValidationError> {
        if url.is_empty() {
            return Err(ValidationError::Empty);
        }

        let parsed = Url::parse(url).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ValidationError::BadScheme(scheme.to_string()));
        }

        // Userinfo and explicit ports count as a different host.
        let host = parsed.host_str().unwrap_or_default().to_string();
        let has_userinfo = !parsed.username().is_empty() || parsed.password().is_some();
        if has_userinfo || parsed.port().is_some() || !ALLOWED_HOSTS.contains(&host.as_str()) {
            return Err(ValidationError::DisallowedHost(authority(&parsed)));
        }

        let shape = UrlShape::detect(&host, &parsed).ok_or(ValidationError::UnrecognizedShape)?;
        let video_id = shape.extract_id(&parsed).ok_or(ValidationError::NoIdentifier)?;

        Ok(SourceReference {
            raw: url.to_string(),
            scheme: scheme.to_string(),
            host,
            path: parsed.path().to_string(),
            shape,
            video_id,
        })
    }

    /// Identifier of an accepted URL, without auditing.
    pub fn extract_video_id(url: &str) -> Option<String> {
        Self::check(url.trim()).ok().map(|reference| reference.video_id)
    }
}

fn authority(url: &Url) -> String {
    let mut authority = String::new();
    if !url.username().is_empty() {
        authority.push_str(url.username());
        authority.push('@');
    }
    authority.push_str(url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        authority.push_str(&format!(":{port}"));
    }
    authority
}

fn is_dangerous(c: char) -> bool {
    (c as u32) < 0x20 || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

/// Replace characters that are unsafe in filenames with `_` and cap the
/// length at [`MAX_FILENAME_LEN`] characters, keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if is_dangerous(c) { '_' } else { c })
        .collect();

    let len = safe.chars().count();
    if len <= MAX_FILENAME_LEN {
        return safe;
    }

    let (stem, ext) = split_extension(&safe);
    let ext_len = ext.chars().count();
    if ext_len >= MAX_FILENAME_LEN {
        return safe.chars().take(MAX_FILENAME_LEN).collect();
    }

    let mut truncated: String = stem.chars().take(MAX_FILENAME_LEN - ext_len).collect();
    truncated.push_str(ext);
    truncated
}

/// Split at the last dot, ignoring leading dots (`.bashrc` has no extension).
fn split_extension(name: &str) -> (&str, &str) {
    let leading_dots = name.len() - name.trim_start_matches('.').len();
    match name[leading_dots..].rfind('.') {
        Some(idx) => name.split_at(leading_dots + idx),
        None => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::RecordingAuditLog;

    fn validator() -> (UrlValidator, Arc<RecordingAuditLog>) {
        let audit = Arc::new(RecordingAuditLog::default());
        (UrlValidator::new(audit.clone()), audit)
    }

    #[test]
    fn test_valid_urls() {
        let (validator, _) = validator();
        let urls = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "http://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "  https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s \n",
        ];

        for url in urls {
            let reference = validator.validate(url);
            assert!(reference.is_ok(), "{url} should be valid: {reference:?}");
            assert_eq!(reference.unwrap().video_id(), "dQw4w9WgXcQ");
        }
    }

    #[test]
    fn test_extract_video_id() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", UrlShape::Watch),
            ("https://youtu.be/dQw4w9WgXcQ", UrlShape::ShortLink),
            ("https://www.youtube.com/shorts/dQw4w9WgXcQ", UrlShape::Shorts),
            ("https://www.youtube.com/embed/dQw4w9WgXcQ", UrlShape::Embed),
            ("https://www.youtube.com/v/dQw4w9WgXcQ", UrlShape::LegacyV),
        ];

        let (validator, _) = validator();
        for (url, shape) in cases {
            assert_eq!(
                UrlValidator::extract_video_id(url).as_deref(),
                Some("dQw4w9WgXcQ")
            );
            assert_eq!(validator.validate(url).unwrap().shape(), shape);
        }
    }

    #[test]
    fn test_reference_parts() {
        let (validator, _) = validator();
        let reference = validator
            .validate(" https://www.youtube.com/embed/abc_-123 ")
            .unwrap();
        assert_eq!(reference.raw(), "https://www.youtube.com/embed/abc_-123");
        assert_eq!(reference.scheme(), "https");
        assert_eq!(reference.host(), "www.youtube.com");
        assert_eq!(reference.path(), "/embed/abc_-123");
        assert_eq!(reference.to_string(), reference.raw());
    }

    #[test]
    fn test_rejections() {
        let (validator, _) = validator();
        let cases = [
            ("", ValidationError::Empty),
            ("   ", ValidationError::Empty),
            ("ftp://youtube.com/watch?v=dQw4w9WgXcQ", ValidationError::BadScheme("ftp".into())),
            ("javascript:alert('xss')", ValidationError::BadScheme("javascript".into())),
            (
                "https://evil.com/watch?v=dQw4w9WgXcQ",
                ValidationError::DisallowedHost("evil.com".into()),
            ),
            (
                "https://youtube.com.evil.com/watch?v=dQw4w9WgXcQ",
                ValidationError::DisallowedHost("youtube.com.evil.com".into()),
            ),
            (
                "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
                ValidationError::DisallowedHost("music.youtube.com".into()),
            ),
            (
                "https://youtube.com:8443/watch?v=dQw4w9WgXcQ",
                ValidationError::DisallowedHost("youtube.com:8443".into()),
            ),
            (
                "https://user@youtube.com/watch?v=dQw4w9WgXcQ",
                ValidationError::DisallowedHost("user@youtube.com".into()),
            ),
            ("https://www.youtube.com/", ValidationError::UnrecognizedShape),
            ("https://www.youtube.com/channel/UCtest", ValidationError::UnrecognizedShape),
            ("https://www.youtube.com/watch?list=PL123", ValidationError::NoIdentifier),
            ("https://www.youtube.com/watch?v=", ValidationError::NoIdentifier),
            ("https://www.youtube.com/watch?v=%3Cscript%3E", ValidationError::NoIdentifier),
            ("https://youtu.be/", ValidationError::NoIdentifier),
            ("https://www.youtube.com/shorts/", ValidationError::NoIdentifier),
        ];

        for (url, expected) in cases {
            assert_eq!(validator.validate(url), Err(expected), "{url}");
        }
    }

    #[test]
    fn test_malformed() {
        let (validator, _) = validator();
        assert!(matches!(
            validator.validate("not a url"),
            Err(ValidationError::Malformed(_))
        ));
        assert!(matches!(
            validator.validate("https://"),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_audit_records() {
        let (validator, audit) = validator();
        let _ = validator.validate("https://youtu.be/dQw4w9WgXcQ");
        let _ = validator.validate("https://evil.com/watch?v=x");

        assert_eq!(audit.event_names(), vec!["url_validated", "url_rejected"]);
        assert_eq!(audit.field("url_validated", "video_id").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(audit.field("url_rejected", "reason").as_deref(), Some("disallowed_host"));
    }

    #[test]
    fn test_sanitize_filename() {
        let cases = [
            ("normal_file.mp4", "normal_file.mp4"),
            ("file<with>bad:chars.mp4", "file_with_bad_chars.mp4"),
            ("file/with\\slashes.mp4", "file_with_slashes.mp4"),
            ("file|with*wildcards?.mp4", "file_with_wildcards_.mp4"),
            ("tab\tand\nnewline\"q\".srt", "tab_and_newline_q_.srt"),
        ];

        for (original, expected) in cases {
            assert_eq!(sanitize_filename(original), expected);
        }
    }

    #[test]
    fn test_sanitize_filename_length() {
        let long = format!("{}.mp4", "a".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized, format!("{}.mp4", "a".repeat(251)));
        assert_eq!(sanitized.chars().count(), MAX_FILENAME_LEN);

        let multibyte = format!("{}.srt", "가".repeat(400));
        let sanitized = sanitize_filename(&multibyte);
        assert_eq!(sanitized.chars().count(), MAX_FILENAME_LEN);
        assert!(sanitized.ends_with(".srt"));

        let no_ext = "b".repeat(600);
        assert_eq!(sanitize_filename(&no_ext).chars().count(), MAX_FILENAME_LEN);

        let huge_ext = format!("x.{}", "e".repeat(400));
        assert_eq!(sanitize_filename(&huge_ext).chars().count(), MAX_FILENAME_LEN);
    }

    #[test]
    fn test_sanitize_filename_idempotent() {
        let inputs = [
            String::from("a<b>c"),
            String::from(".hidden"),
            String::from("con:trol\u{1}chars?.txt"),
            format!("{}.webm", "z/".repeat(200)),
            format!(".{}", "q".repeat(300)),
            String::new(),
        ];

        for input in inputs {
            let once = sanitize_filename(&input);
            assert_eq!(sanitize_filename(&once), once);
            assert!(once.chars().count() <= MAX_FILENAME_LEN);
        }
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("video.mp4"), ("video", ".mp4"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
        assert_eq!(split_extension("noext"), ("noext", ""));
    }
}
