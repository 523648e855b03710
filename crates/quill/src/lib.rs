//! # Quill
//!
//! The module kernel of an extensible note-taking editor.
//!
//! ## Overview
//!
//! Everything in Quill is a module: a named unit that declares what it
//! requires, what configuration it accepts, which events it defines and
//! listens to, and what it exposes to its dependents. The kernel registers
//! modules, loads them in dependency order, merges their configuration, and
//! routes events between them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────────────────────────────────────┐
//! │ QuillRuntime │────▶│ Kernel                                         │
//! │ (config,     │     │  registry ─▶ resolver ─▶ load / post_load      │
//! │  logging)    │     │  event bus (define, broadcast, send)           │
//! └──────────────┘     │  await queue (run when a module is loaded)     │
//!                      └────────────────────────────────────────────────┘
//! ```
//!
//! - **quill-core**: errors, events, config merging, public tables
//! - **quill-framework**: the `Module` contract, builders, and the kernel
//! - **quill-runtime**: configuration files, logging, and the runtime
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quill::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let runtime = QuillRuntime::new();
//!
//!     runtime.register(
//!         ModuleDefinition::builder("journal")
//!             .requires(["core.dirman"])
//!             .config(json!({ "folder": "journal" }))
//!             .on_load(|ctx| {
//!                 info!(folder = %ctx.config()["folder"], "journal ready");
//!                 Ok(())
//!             })
//!             .build(),
//!     )?;
//!     runtime.register(ModuleDefinition::builder("core.dirman").build())?;
//!
//!     let report = runtime.start()?;
//!     assert!(report.is_ok());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: load `quill.toml` (default)
//! - `yaml-config`: load `quill.yaml`
//! - `json-log`: JSON log output

pub use quill_core as core;
pub use quill_framework as framework;
pub use quill_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use quill::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use quill_runtime::{QuillConfig, QuillRuntime};

    // Modules and the kernel
    pub use quill_framework::{
        Awaited, KERNEL_NAMESPACE, Kernel, KernelOptions, LoadContext, LoadReport, Module,
        ModuleBuilder, ModuleContext, ModuleDefinition, ModuleHandle, STARTED_EVENT,
    };

    // Events, config, and shared data
    pub use quill_core::{
        BoxError, ContentKind, Event, EventContext, EventSpec, EventType, KernelError,
        KernelResult, LoadState, PublicTable, SetupData,
    };

    pub use serde_json::{Value, json};

    // Logging macros
    pub use quill_runtime::prelude::*;
}
