//! Quill Runtime - host layer for the Quill module kernel.
//!
//! This crate provides:
//! - Layered configuration loading (`quill.toml`, `quill.yaml`, `QUILL_*`
//!   environment variables) with a per-module `[modules]` table
//! - Logging setup driven by that configuration
//! - [`QuillRuntime`], which owns a configured [`Kernel`](quill_framework::Kernel)
//!   and drives its startup and shutdown
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [modules.journal]
//! enabled = false
//!
//! [modules."core.concealer".config]
//! preset = "varied"
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, ModuleSettings, QuillConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{QuillRuntime, RuntimeBuilder};

// Re-export tracing for use by modules
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
