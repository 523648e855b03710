//! Context types handed to modules.
//!
//! Modules never see the [`Kernel`] directly. They receive narrow capability
//! objects instead:
//!
//! - [`ModuleHandle`]: the **shared** view of a loaded module that dependents
//!   and await continuations receive. It holds the live public table (the same
//!   reference for every holder), the effective config, and metadata.
//!
//! - [`ModuleContext`]: a **per-module** capability onto the kernel, passed to
//!   `on_event` and `post_load` and freely cloneable into closures. It holds a
//!   weak reference, so a context that outlives its kernel fails with
//!   [`KernelError::KernelUnavailable`] instead of keeping the kernel alive.
//!
//! - [`LoadContext`]: what `load` receives. It derefs to [`ModuleContext`] and
//!   adds the dependency handles and the merged configuration.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;

use quill_core::{
    Event, EventContext, EventType, KernelError, KernelResult, ModuleMetadata, PublicTable,
    import_name,
};

use crate::kernel::{Awaited, Kernel};

// =============================================================================
// ModuleHandle — shared view of a loaded module
// =============================================================================

/// The shared view of a loaded module.
#[derive(Debug, Clone)]
pub struct ModuleHandle {
    name: String,
    public: PublicTable,
    config: Arc<Value>,
    metadata: ModuleMetadata,
}

impl ModuleHandle {
    pub(crate) fn new(
        name: String,
        public: PublicTable,
        config: Arc<Value>,
        metadata: ModuleMetadata,
    ) -> Self {
        Self {
            name,
            public,
            config,
            metadata,
        }
    }

    /// The module's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module's live public table.
    pub fn public(&self) -> &PublicTable {
        &self.public
    }

    /// Shortcut for `public().get(key)`.
    pub fn get<T: std::any::Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.public.get(key)
    }

    /// The module's effective configuration.
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Deserialises the effective configuration into `T`.
    pub fn config_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(self.config.as_ref())
    }

    /// The module's metadata.
    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }
}

// =============================================================================
// ModuleContext — per-module capability onto the kernel
// =============================================================================

/// A module's capability onto the kernel.
///
/// Every call is made on behalf of the module this context belongs to: events
/// created through it carry that module as referrer, and subscription edits
/// apply to that module's table.
#[derive(Clone)]
pub struct ModuleContext {
    kernel: Weak<Kernel>,
    module: String,
}

impl ModuleContext {
    pub(crate) fn new(kernel: Weak<Kernel>, module: impl Into<String>) -> Self {
        Self {
            kernel,
            module: module.into(),
        }
    }

    fn kernel(&self) -> KernelResult<Arc<Kernel>> {
        self.kernel.upgrade().ok_or(KernelError::KernelUnavailable)
    }

    /// Name of the module this context belongs to.
    pub fn name(&self) -> &str {
        &self.module
    }

    /// Creates an event with this module as referrer.
    pub fn create_event(
        &self,
        event_type: &EventType,
        content: Value,
        context: EventContext,
    ) -> KernelResult<Event> {
        self.kernel()?
            .create_event(&self.module, event_type, content, context)
    }

    /// Creates one of this module's own events with an empty host context.
    pub fn event(&self, local: &str, content: Value) -> KernelResult<Event> {
        self.create_event(
            &EventType::new(&self.module, local),
            content,
            EventContext::default(),
        )
    }

    /// Broadcasts `event` to every subscribed loaded module.
    ///
    /// Returns the number of modules it was delivered to.
    pub fn broadcast(&self, event: &Event) -> KernelResult<usize> {
        self.kernel()?.broadcast(event)
    }

    /// Delivers `event` to `recipient` only.
    pub fn send(&self, recipient: &str, event: &Event) -> KernelResult<bool> {
        self.kernel()?.send(recipient, event)
    }

    /// Runs `continuation` once `target` is loaded.
    pub fn await_module<F>(&self, target: &str, continuation: F) -> KernelResult<Awaited>
    where
        F: FnOnce(ModuleHandle) + Send + 'static,
    {
        Ok(self.kernel()?.await_module(target, continuation))
    }

    /// Subscribes this module to events owned by `owner`.
    pub fn subscribe<I, S>(&self, owner: &str, locals: I) -> KernelResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kernel()?
            .set_subscriptions(&self.module, owner, locals, true)
    }

    /// Removes subscriptions of this module.
    pub fn unsubscribe<I, S>(&self, owner: &str, locals: I) -> KernelResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kernel()?
            .set_subscriptions(&self.module, owner, locals, false)
    }

    /// Handle of a loaded module.
    pub fn handle(&self, name: &str) -> Option<ModuleHandle> {
        self.kernel().ok()?.handle(name)
    }

    /// Returns `true` if `name` is loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.kernel().is_ok_and(|kernel| kernel.is_loaded(name))
    }

    /// This module's effective configuration.
    pub fn config(&self) -> KernelResult<Arc<Value>> {
        self.kernel()?
            .module_config(&self.module)
            .ok_or_else(|| KernelError::UnknownModule(self.module.clone()))
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module)
            .field("kernel_alive", &(self.kernel.strong_count() > 0))
            .finish()
    }
}

// =============================================================================
// LoadContext — what `load` receives
// =============================================================================

/// Context passed to a module's `load` hook.
#[derive(Debug, Clone)]
pub struct LoadContext {
    base: ModuleContext,
    required: BTreeMap<String, ModuleHandle>,
    imported: BTreeMap<String, ModuleHandle>,
    config: Arc<Value>,
    private: Arc<Value>,
}

impl LoadContext {
    pub(crate) fn new(
        base: ModuleContext,
        required: BTreeMap<String, ModuleHandle>,
        imported: BTreeMap<String, ModuleHandle>,
        config: Arc<Value>,
        private: Arc<Value>,
    ) -> Self {
        Self {
            base,
            required,
            imported,
            config,
            private,
        }
    }

    /// Handle of a required (or wanted) module, by full name.
    pub fn required(&self, name: &str) -> Option<&ModuleHandle> {
        self.required.get(name)
    }

    /// Names of every required and wanted module.
    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.required.keys().map(String::as_str)
    }

    /// Handle of an imported module, by relative or full name.
    pub fn imported(&self, name: &str) -> Option<&ModuleHandle> {
        self.imported
            .get(name)
            .or_else(|| self.imported.get(&import_name(self.base.name(), name)))
    }

    /// The effective (merged) configuration.
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Deserialises the effective configuration into `T`.
    pub fn config_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(self.config.as_ref())
    }

    /// The module's private configuration.
    pub fn private_config(&self) -> &Value {
        &self.private
    }

    /// The underlying [`ModuleContext`], for storing past `load`.
    pub fn module_context(&self) -> &ModuleContext {
        &self.base
    }
}

impl Deref for LoadContext {
    type Target = ModuleContext;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Width {
        width: u32,
    }

    fn handle(name: &str, config: Value) -> ModuleHandle {
        ModuleHandle::new(
            name.to_string(),
            PublicTable::new(),
            Arc::new(config),
            ModuleMetadata::default(),
        )
    }

    #[test]
    fn test_dead_kernel_is_unavailable() {
        let ctx = ModuleContext::new(Weak::new(), "m");
        assert_eq!(ctx.name(), "m");
        assert!(matches!(
            ctx.event("ping", Value::Null),
            Err(KernelError::KernelUnavailable)
        ));
        assert!(ctx.handle("m").is_none());
        assert!(!ctx.is_loaded("m"));
        assert!(matches!(
            ctx.await_module("x", |_| {}),
            Err(KernelError::KernelUnavailable)
        ));
    }

    #[test]
    fn test_load_context_lookups() {
        let mut required = BTreeMap::new();
        required.insert("core.dirman".to_string(), handle("core.dirman", json!({})));
        let mut imported = BTreeMap::new();
        imported.insert("ui".to_string(), handle("core.concealer.ui", json!({})));

        let ctx = LoadContext::new(
            ModuleContext::new(Weak::new(), "core.concealer"),
            required,
            imported,
            Arc::new(json!({ "width": 80 })),
            Arc::new(json!({ "secret": true })),
        );

        assert!(ctx.required("core.dirman").is_some());
        assert!(ctx.required("core.other").is_none());
        assert_eq!(ctx.imported("ui").unwrap().name(), "core.concealer.ui");
        assert_eq!(ctx.config_as::<Width>().unwrap(), Width { width: 80 });
        assert_eq!(ctx.private_config()["secret"], json!(true));
        // Deref to ModuleContext.
        assert_eq!(ctx.name(), "core.concealer");
    }

    #[test]
    fn test_handle_shares_public_table() {
        let h = handle("m", json!({ "width": 100 }));
        let copy = h.clone();
        h.public().insert("api", 7u8);
        assert_eq!(*copy.get::<u8>("api").unwrap(), 7);
        assert_eq!(copy.config_as::<Width>().unwrap().width, 100);
    }
}
