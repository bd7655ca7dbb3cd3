//! Logging setup
//!
//! Logs always go to stderr so a streamed reply on stdout stays clean.

use crate::config::LoggingConfig;
use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for the configured level
///
/// A bare level applies to this crate only; anything containing `=` or `,`
/// is taken as a full directive.
///
/// # Examples
///
/// ```
/// use chatline::logging::filter_directive;
///
/// assert_eq!(filter_directive("debug"), "chatline=debug");
/// assert_eq!(filter_directive("chatline=trace,reqwest=debug"), "chatline=trace,reqwest=debug");
/// ```
pub fn filter_directive(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("chatline={}", level)
    }
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
///
/// Returns error if the level is not a valid filter directive or a
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(&config.level)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr);
        registry.with(layer).try_init()?;
    } else {
        let layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr);
        registry.with(layer).try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_scoped_to_crate() {
        assert_eq!(filter_directive("info"), "chatline=info");
        assert_eq!(filter_directive(" warn "), "chatline=warn");
    }

    #[test]
    fn test_full_directive_kept() {
        assert_eq!(filter_directive("reqwest=debug"), "reqwest=debug");
    }

    #[test]
    fn test_directives_parse() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(EnvFilter::try_new(filter_directive(level)).is_ok());
        }
    }
}
