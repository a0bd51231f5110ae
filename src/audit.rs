use tracing::{info, warn};

/// Sink for security and download audit events.
///
/// Recording is fire-and-forget: implementations must never fail in a way
/// that affects the caller's control flow.
pub trait AuditLog: Send + Sync {
    fn record(&self, event: &str, fields: &[(&str, String)]);
}

/// Events whose name ends in one of these suffixes are logged at warn level.
const WARN_SUFFIXES: [&str; 3] = ["_rejected", "_failed", "_cancelled"];

/// Emits audit events through `tracing` under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, event: &str, fields: &[(&str, String)]) {
        let fields = render_fields(fields);

        if WARN_SUFFIXES.iter().any(|suffix| event.ends_with(suffix)) {
            warn!(target: "audit", event, "{}", fields);
        } else {
            info!(target: "audit", event, "{}", fields);
        }
    }
}

fn render_fields(fields: &[(&str, String)]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value:?}"))
        .collect::<Vec<_>>()
        .join(" ")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fields() {
        let rendered = render_fields(&[("url", "https://youtu.be/x".to_string()), ("id", "x".into())]);
        assert_eq!(rendered, "url=\"https://youtu.be/x\" id=\"x\"");
    }

    #[test]
    fn test_render_no_fields() {
        assert_eq!(render_fields(&[]), "");
    }
}
