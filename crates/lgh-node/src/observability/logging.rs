//! Structured logging initialization.

use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{
        self,
        format::{Format, Pretty},
        MakeWriter,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Parse log format from string, defaulting to pretty.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`.
///
/// ```rust,no_run
/// use lgh_node::observability::{init_logging, LogFormat};
///
/// init_logging("info", LogFormat::Pretty);
/// ```
pub fn init_logging(level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lgh={level},tower_http=debug", level = level).into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(pretty_layer(std::io::stderr))
            .init(),
    }

    tracing::debug!(level = %level, format = ?format, "logging initialized");
}

/// Multi-line human-readable output.
fn pretty_layer<S, W>(writer: W) -> fmt::Layer<S, Pretty, Format<Pretty>, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer().pretty().with_writer(writer)
}
