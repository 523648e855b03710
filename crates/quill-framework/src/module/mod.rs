//! The module contract.
//!
//! # Architecture
//!
//! A module is the unit every feature is built from. Each one implements
//! [`Module`], which bundles:
//!
//! - A **two-phase startup**: [`setup`](Module::setup) declares needs without
//!   side effects, [`load`](Module::load) performs initialization once every
//!   requirement is loaded.
//! - An **event handler** ([`on_event`](Module::on_event)) invoked for the
//!   events the module subscribed to.
//! - A **public table** shared by reference with dependents, and declared
//!   **configuration** merged with the user's overrides before `load`.
//!
//! Modules either implement the trait on their own type, or are assembled from
//! closures with [`ModuleDefinition::builder`].
//!
//! # Quick start
//!
//! ```rust,ignore
//! use quill::prelude::*;
//!
//! let journal = ModuleDefinition::builder("core.journal")
//!     .requires(["core.dirman"])
//!     .config(json!({ "strategy": "nested" }))
//!     .define_event(EventSpec::new("entry_created").content(ContentKind::String))
//!     .on_load(|ctx| {
//!         let dirman = ctx.required("core.dirman").expect("required");
//!         info!(strategy = %ctx.config()["strategy"], "journal ready");
//!         Ok(())
//!     })
//!     .build();
//!
//! kernel.register(journal)?;
//! ```
//!
//! # Interior mutability
//!
//! Every hook takes `&self`. Keep private state behind a lock
//! (`parking_lot::Mutex<T>` or similar); the kernel never exposes it.

pub mod definition;

use std::sync::Arc;

use quill_core::{
    BoxError, ConfigSpec, Event, EventDeclarations, ModuleMetadata, PublicTable, SetupData,
};

use crate::context::{LoadContext, ModuleContext};

pub use definition::{ModuleBuilder, ModuleDefinition};

/// The capability interface every module implements.
///
/// The kernel reads [`public`](Self::public), [`config`](Self::config),
/// [`events`](Self::events), and [`metadata`](Self::metadata) once, at
/// registration. The public table it receives is the live one: the module
/// should keep a clone and insert into it whenever it wants to expose more.
pub trait Module: Send + Sync {
    /// Unique dot-namespaced name, e.g. `"core.keybinds"`.
    fn name(&self) -> &str;

    /// Declares requirements. Must not perform side effects.
    fn setup(&self) -> SetupData {
        SetupData::ok()
    }

    /// Runs once every requirement is loaded.
    ///
    /// Returning `Err` marks the module failed, along with everything that
    /// requires it.
    fn load(&self, _ctx: &LoadContext) -> Result<(), BoxError> {
        Ok(())
    }

    /// Receives every event this module is subscribed to.
    fn on_event(&self, _ctx: &ModuleContext, _event: &Event) {}

    /// Runs once after the whole startup graph has settled.
    fn post_load(&self, _ctx: &ModuleContext) {}

    /// Runs at kernel shutdown, in reverse load order.
    fn unload(&self) {}

    /// The table shared with dependents.
    fn public(&self) -> PublicTable {
        PublicTable::new()
    }

    /// Declared configuration defaults and presets.
    fn config(&self) -> ConfigSpec {
        ConfigSpec::default()
    }

    /// Events this module defines and listens to.
    fn events(&self) -> EventDeclarations {
        EventDeclarations::default()
    }

    /// Descriptive metadata.
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::default()
    }
}

impl<M: Module + ?Sized> Module for Arc<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn setup(&self) -> SetupData {
        (**self).setup()
    }

    fn load(&self, ctx: &LoadContext) -> Result<(), BoxError> {
        (**self).load(ctx)
    }

    fn on_event(&self, ctx: &ModuleContext, event: &Event) {
        (**self).on_event(ctx, event)
    }

    fn post_load(&self, ctx: &ModuleContext) {
        (**self).post_load(ctx)
    }

    fn unload(&self) {
        (**self).unload()
    }

    fn public(&self) -> PublicTable {
        (**self).public()
    }

    fn config(&self) -> ConfigSpec {
        (**self).config()
    }

    fn events(&self) -> EventDeclarations {
        (**self).events()
    }

    fn metadata(&self) -> ModuleMetadata {
        (**self).metadata()
    }
}
