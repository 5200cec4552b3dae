//! Structured logging setup.
//!
//! Logs go to stderr so command output on stdout stays parseable.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `RUST_LOG` | Filter directives, default `grounded=info,grounded_core=info` |
//! | `LOG_FORMAT` | `json` for one JSON object per line, anything else for text |
//! | `LOG_ANSI` | `true`/`1` or `false`/`0` to force colors on or off |

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "grounded=info,grounded_core=info";

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or_else(|| atty::is(atty::Stream::Stderr));

    let registry = tracing_subscriber::registry().with(env_filter);
    // try_init: a subscriber may already be installed by a test harness.
    if json {
        let _ = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init();
    } else {
        let _ = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_writer(std::io::stderr),
            )
            .try_init();
    }
}
