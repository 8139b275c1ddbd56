//! Tracing subscriber setup for binaries and tests embedding lambdaform.
//!
//! Library code only uses the `tracing` macros; installing a subscriber is
//! left to the embedding process through [`init_tracing`].

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Returns the filter directive used when `RUST_LOG` is unset.
#[must_use]
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "lambdaform=debug,info"
    } else {
        "lambdaform=info,warn"
    }
}

/// Installs a global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `verbose`. Fails if a subscriber is
/// already installed.
pub fn init_tracing(
    format: LogFormat,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(verbose)
                    .with_thread_ids(false)
                    .compact(),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(true), "lambdaform=debug,info");
        assert_eq!(default_directive(false), "lambdaform=info,warn");
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_tracing(LogFormat::Compact, false);
        assert!(init_tracing(LogFormat::Json, true).is_err());
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }
}
