//! Configuration, wire DTOs and log setup shared by the kitstream client and CLI.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod helpers;
pub mod protocol;

pub use config::{GfnConfig, LocalConfig, SourceMode, StreamConfig, StreamServers};
pub use error::{Error, Result};
pub use protocol::*;

/// Env var consulted before `RUST_LOG` for the log filter.
pub const LOG_ENV: &str = "KITSTREAM_LOG";

/// Install the stderr log subscriber at `info` unless `KITSTREAM_LOG` or
/// `RUST_LOG` says otherwise. Stdout carries the streaming client's JSON lines.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Like [`init_tracing`] with a different fallback filter. A second call is a no-op.
pub fn init_tracing_with_default(default_directive: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
