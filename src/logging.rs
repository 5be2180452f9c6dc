//! Tracing subscriber setup for hosts embedding the analyzer.
//!
//! The library itself only emits events. Hosts (and the integration tests)
//! call [`init_tracing`] once to install a subscriber.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (default: `sepolicy_analysis=info`)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "sepolicy_analysis=info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

impl LogFormat {
    /// Parse a format from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// Format selected by `LOG_FORMAT`, JSON when unset or unknown.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|v| Self::from_str(&v))
            .unwrap_or(Self::Json)
    }
}

/// Install a global subscriber with the format from `LOG_FORMAT`.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing() -> bool {
    init_tracing_with(LogFormat::from_env())
}

/// Install a global subscriber with an explicit format.
pub fn init_tracing_with(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let installed = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(LogFormat::from_str("PRETTY"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::from_str("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::from_str("xml"), None);
    }

    #[test]
    fn test_second_init_is_refused() {
        init_tracing_with(LogFormat::Pretty);
        assert!(!init_tracing_with(LogFormat::Json));
    }
}
