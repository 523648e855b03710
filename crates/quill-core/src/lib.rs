//! # Quill Core
//!
//! Foundation types shared by every layer of the Quill module kernel:
//!
//! - **Errors**: the kernel's failure taxonomy ([`KernelError`]).
//! - **Events**: identities, definitions, host context, and instances
//!   ([`EventType`], [`EventSpec`], [`Event`]).
//! - **Configuration**: layered, deterministic config merging ([`ConfigSpec`],
//!   [`effective_config`]).
//! - **Public tables**: shared capability tables handed to dependents
//!   ([`PublicTable`]).
//! - **Module data**: setup results, load states, metadata, subscriptions.
//!
//! The kernel itself lives in `quill-framework`.

pub mod config;
pub mod error;
pub mod event;
pub mod module;
pub mod public;

pub use config::{ConfigSpec, PRESET_KEY, deep_merge, effective_config, merge_disjoint};
pub use error::{BoxError, KernelError, KernelResult};
pub use event::{ContentKind, Event, EventContext, EventSpec, EventType};
pub use module::{
    EventDeclarations, LoadState, ModuleMetadata, SetupData, Subscriptions, import_name,
    is_valid_module_name,
};
pub use public::{PublicArc, PublicTable};
