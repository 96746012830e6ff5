//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Honour `RUST_LOG` over the configured level
//! - JSON format for machine consumption, pretty format for terminals
//!
//! Both formats write to stderr; stdout carries command output only.

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::ObservabilityConfig;

/// Build the filter: `RUST_LOG` wins, otherwise the configured level for this crate.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("ten_session_keys={},warn", config.log_level).into())
}

/// Formatting layer for the configured format, writing through `writer`.
pub fn fmt_layer<W>(config: &ObservabilityConfig, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    if config.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_writer(writer).boxed()
    }
}

/// Install the global subscriber. Subsequent calls are no-ops.
pub fn init(config: &ObservabilityConfig) {
    let result = tracing_subscriber::registry()
        .with(fmt_layer(config, std::io::stderr))
        .with(env_filter(config))
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
