//! Tracing bootstrap, driven by [`LoggingConfig`]
//!
//! Engine events carry their context as structured fields (`symbol`, `pair`,
//! `group`, `ticket`), so the console format stays compact and drops targets
//! entirely - the fields are the context. The JSON mode flattens those same
//! fields to the top level of each event so a collector can index them
//! without unwrapping a `fields` object. `RUST_LOG` always wins over the
//! configured level.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logger(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    }
}
