use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

const UNIX_PROTECTED: [&str; 7] = ["/bin", "/sbin", "/usr/bin", "/usr/sbin", "/etc", "/sys", "/proc"];

const WINDOWS_PROTECTED: [&str; 4] = [
    r"C:\Windows",
    r"C:\Program Files",
    r"C:\Program Files (x86)",
    r"C:\System32",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("download path is empty")]
    Empty,

    #[error("parent directory references are not allowed: {0}")]
    Traversal(String),

    #[error("cannot save into protected system directory {0}")]
    ProtectedDirectory(String),
}

/// A destination directory that passed [`PathGuard`] policy checks.
///
/// Existence and writability are not checked here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPath(PathBuf);

impl DestinationPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathStyle {
    Unix,
    Windows,
}

/// Policy check for download destinations.
#[derive(Debug, Clone)]
pub struct PathGuard {
    style: PathStyle,
    protected: Vec<String>,
}

impl PathGuard {
    pub fn unix() -> Self {
        Self {
            style: PathStyle::Unix,
            protected: UNIX_PROTECTED.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn windows() -> Self {
        Self {
            style: PathStyle::Windows,
            protected: WINDOWS_PROTECTED.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Guard configured for the platform the binary was built for.
    pub fn for_current_os() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else {
            Self::unix()
        }
    }

    pub fn validate(&self, path: &str) -> Result<DestinationPath, PathError> {
        let path = path.trim();

        if path.is_empty() {
            return Err(PathError::Empty);
        }

        if path.contains("..") {
            warn!("Rejected download path with traversal: {}", path);
            return Err(PathError::Traversal(path.to_string()));
        }

        if self.is_absolute(path) {
            if let Some(protected) = self.protected_root(path) {
                warn!("Rejected download path inside {}: {}", protected, path);
                return Err(PathError::ProtectedDirectory(protected.to_string()));
            }
        }

        Ok(DestinationPath(PathBuf::from(path)))
    }

    fn is_absolute(&self, path: &str) -> bool {
        match self.style {
            PathStyle::Unix => path.starts_with('/'),
            PathStyle::Windows => {
                let bytes = path.as_bytes();
                let has_drive = bytes.len() >= 3
                    && bytes[0].is_ascii_alphabetic()
                    && bytes[1] == b':'
                    && (bytes[2] == b'\\' || bytes[2] == b'/');
                has_drive || path.starts_with('\\') || path.starts_with('/')
            }
        }
    }

    /// Protected directory that `path` equals or is nested under.
    fn protected_root(&self, path: &str) -> Option<&str> {
        let candidate = self.normalize(path);
        let separator = self.separator();

        self.protected
            .iter()
            .find(|root| {
                let root = self.normalize(root);
                candidate == root
                    || candidate
                        .strip_prefix(&root)
                        .is_some_and(|rest| rest.starts_with(separator))
            })
            .map(String::as_str)
    }

    fn separator(&self) -> char {
        match self.style {
            PathStyle::Unix => '/',
            PathStyle::Windows => '\\',
        }
    }

    /// Lexical form used for comparison: repeated separators collapse and
    /// `.` segments drop out. Windows paths are lowercased with `/` as `\`.
    fn normalize(&self, path: &str) -> String {
        let separator = self.separator();
        let path = match self.style {
            PathStyle::Unix => path.to_string(),
            PathStyle::Windows => path.replace('/', "\\").to_lowercase(),
        };

        let segments: Vec<&str> = path
            .split(separator)
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();
        let joined = segments.join(&separator.to_string());

        if path.starts_with(separator) {
            format!("{separator}{joined}")
        } else {
            joined
        }
    }
}

impl Default for PathGuard {
    fn default() -> Self {
        Self::for_current_os()
    }
}
