//! # Quill Framework
//!
//! The module kernel of the Quill note-taking environment.
//!
//! This layer provides:
//! - The [`Module`] contract and the closure-based [`ModuleDefinition`]
//!   builder, including explicit composition of partial definitions
//! - The [`Kernel`]: registry, dependency resolver, lifecycle driver, event
//!   bus, and await queue
//! - The capability objects modules receive ([`LoadContext`],
//!   [`ModuleContext`], [`ModuleHandle`])
//!
//! Configuration files and logging setup live in `quill-runtime`; everything
//! here is synchronous and host-agnostic.

pub mod context;
pub mod kernel;
pub mod module;

pub use context::{LoadContext, ModuleContext, ModuleHandle};
pub use kernel::{Awaited, KERNEL_NAMESPACE, Kernel, KernelOptions, LoadReport, STARTED_EVENT};
pub use module::{Module, ModuleBuilder, ModuleDefinition};
