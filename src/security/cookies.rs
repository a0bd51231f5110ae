use std::fmt;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Cookie files larger than this are suspicious.
const MAX_COOKIE_FILE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieWarning {
    WorldReadable,
    GroupReadable,
    Oversized(u64),
}

impl fmt::Display for CookieWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorldReadable => write!(f, "cookie file is readable by other users"),
            Self::GroupReadable => write!(f, "cookie file is readable by its group"),
            Self::Oversized(size) => write!(f, "cookie file is unusually large ({size} bytes)"),
        }
    }
}

/// Inspect a cookie file's permissions and size. A missing file yields no
/// warnings.
pub fn audit_cookies_file(path: &Path) -> Vec<CookieWarning> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return Vec::new(),
    };

    let mut warnings = Vec::new();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = metadata.permissions().mode();
        if mode & 0o004 != 0 {
            warnings.push(CookieWarning::WorldReadable);
        }
        if mode & 0o040 != 0 {
            warnings.push(CookieWarning::GroupReadable);
        }
    }

    if metadata.len() > MAX_COOKIE_FILE_BYTES {
        warnings.push(CookieWarning::Oversized(metadata.len()));
    }

    for warning in &warnings {
        warn!("Cookie file {}: {}", path.display(), warning);
    }

    warnings
}

/// Look for `cookies.txt` in the working directory, then the home directory.
pub fn discover_cookies_file() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from("cookies.txt")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("cookies.txt"));
    }

    candidates.into_iter().find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_has_no_warnings() {
        let dir = tempfile::tempdir().unwrap();
        assert!(audit_cookies_file(&dir.path().join("nope.txt")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_warnings() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# Netscape HTTP Cookie File").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(audit_cookies_file(&path).is_empty());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(
            audit_cookies_file(&path),
            vec![CookieWarning::WorldReadable, CookieWarning::GroupReadable]
        );

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();
        assert_eq!(audit_cookies_file(&path), vec![CookieWarning::GroupReadable]);
    }

    #[test]
    fn test_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_COOKIE_FILE_BYTES + 1).unwrap();

        let warnings = audit_cookies_file(&path);
        assert!(warnings.contains(&CookieWarning::Oversized(MAX_COOKIE_FILE_BYTES + 1)));
    }
}
