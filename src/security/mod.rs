mod cookies;
mod path;
mod source;

pub use cookies::{audit_cookies_file, discover_cookies_file};
pub use path::PathGuard;
pub use source::{sanitize_filename, SourceReference, UrlValidator, MAX_FILENAME_LEN};
