//! The module kernel.
//!
//! [`Kernel`] is the central owner of every registered module. It:
//!
//! - Accepts [`Module`]s through [`register`](Kernel::register), snapshots
//!   their declarations, and stores them in state
//!   [`LoadState::SetupPending`].
//! - Resolves requirements depth-first and loads modules in dependency order
//!   ([`load_all`](Kernel::load_all), [`load_module`](Kernel::load_module)).
//!   A module whose requirement fails is marked [`LoadState::Failed`] with a
//!   chained [`KernelError`] and never retried.
//! - Owns the event bus: event definitions, the subscription index, and
//!   synchronous delivery ([`broadcast`](Kernel::broadcast),
//!   [`send`](Kernel::send)).
//! - Holds deferred continuations ([`await_module`](Kernel::await_module))
//!   and runs them the instant their target becomes loaded.
//!
//! All state sits behind one `parking_lot::Mutex`. The lock is never held
//! while module code runs, so every hook may re-enter the kernel.
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_framework::{Kernel, ModuleDefinition};
//!
//! let kernel = Kernel::new();
//! kernel.register(ModuleDefinition::builder("core.dirman").build())?;
//! kernel.register(
//!     ModuleDefinition::builder("core.journal")
//!         .requires(["core.dirman"])
//!         .build(),
//! )?;
//! let report = kernel.load_all();
//! assert!(report.is_ok());
//! // …later…
//! kernel.shutdown();
//! ```

mod await_queue;
mod bus;
mod resolver;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, span};

use quill_core::{
    ConfigSpec, ContentKind, EventSpec, EventType, KernelError, KernelResult, LoadState,
    ModuleMetadata, PublicTable, SetupData, Subscriptions, is_valid_module_name,
};

use crate::context::{ModuleContext, ModuleHandle};
use crate::module::Module;

pub use await_queue::Awaited;

/// Owner name of the events the kernel itself defines.
pub const KERNEL_NAMESPACE: &str = "quill";

/// Local name of the event broadcast once [`Kernel::load_all`] has finished.
///
/// Content: `{ "loaded": [names], "failed": [names] }`.
pub const STARTED_EVENT: &str = "started";

type Continuation = Box<dyn FnOnce(ModuleHandle) + Send>;

// =============================================================================
// KernelOptions
// =============================================================================

/// Host-supplied settings for a [`Kernel`].
#[derive(Debug, Clone, Default)]
pub struct KernelOptions {
    /// The user's custom config section per module name.
    pub module_configs: BTreeMap<String, Value>,
    /// Modules not loaded as roots by [`Kernel::load_all`]. They still load
    /// when another module requires them.
    pub disabled: BTreeSet<String>,
}

impl KernelOptions {
    /// Sets the custom config section of `module`.
    pub fn module_config(mut self, module: impl Into<String>, config: Value) -> Self {
        self.module_configs.insert(module.into(), config);
        self
    }

    /// Excludes `module` from the startup roots.
    pub fn disable(mut self, module: impl Into<String>) -> Self {
        self.disabled.insert(module.into());
        self
    }
}

// =============================================================================
// LoadReport
// =============================================================================

/// Outcome of [`Kernel::load_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Loaded modules, in load order.
    pub loaded: Vec<String>,
    /// Failed modules with their reasons, in registration order.
    pub failed: Vec<(String, KernelError)>,
}

impl LoadReport {
    /// `true` if no module failed.
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }

    /// Names of the failed modules.
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|(name, _)| name.as_str()).collect()
    }
}

// =============================================================================
// Internal state
// =============================================================================

struct ModuleEntry {
    module: Arc<dyn Module>,
    name: String,
    state: LoadState,
    failure: Option<KernelError>,
    public: PublicTable,
    config_spec: ConfigSpec,
    subscriptions: Subscriptions,
    config: Arc<Value>,
    metadata: ModuleMetadata,
    /// `setup` result recorded before resolution reaches the module.
    setup: Option<SetupData>,
    post_loaded: bool,
}

impl ModuleEntry {
    fn handle(&self) -> ModuleHandle {
        ModuleHandle::new(
            self.name.clone(),
            self.public.clone(),
            Arc::clone(&self.config),
            self.metadata.clone(),
        )
    }
}

struct KernelState {
    /// Registration order.
    entries: Vec<ModuleEntry>,
    index: HashMap<String, usize>,
    events: HashMap<EventType, EventSpec>,
    /// `(owner, local)` → subscriber indices, sorted ascending.
    subscribers: HashMap<EventType, Vec<usize>>,
    waiting: HashMap<String, VecDeque<Continuation>>,
    /// Modules currently on the resolution stack.
    resolving: Vec<String>,
    /// Imported module → importer.
    import_parents: HashMap<String, String>,
    load_order: Vec<usize>,
    /// Nesting depth of `load_all` calls; `post_load` is deferred while > 0.
    batch_depth: usize,
    started: bool,
    shut_down: bool,
}

impl KernelState {
    fn new() -> Self {
        let mut events = HashMap::new();
        events.insert(
            EventType::new(KERNEL_NAMESPACE, STARTED_EVENT),
            EventSpec::new(STARTED_EVENT)
                .content(ContentKind::Object)
                .description("Startup finished"),
        );
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            events,
            subscribers: HashMap::new(),
            waiting: HashMap::new(),
            resolving: Vec::new(),
            import_parents: HashMap::new(),
            load_order: Vec::new(),
            batch_depth: 0,
            started: false,
            shut_down: false,
        }
    }

    fn entry(&self, name: &str) -> Option<&ModuleEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut ModuleEntry> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.entries[i]),
            None => None,
        }
    }
}

// =============================================================================
// Kernel
// =============================================================================

/// Owner of all modules, the event bus, and the await queue.
///
/// Always used behind an `Arc`: module contexts hold a weak reference back to
/// it.
pub struct Kernel {
    self_ref: Weak<Kernel>,
    options: KernelOptions,
    state: Mutex<KernelState>,
}

impl Kernel {
    /// Creates a kernel with no user configuration.
    pub fn new() -> Arc<Self> {
        Self::with_options(KernelOptions::default())
    }

    /// Creates a kernel with the given host settings.
    pub fn with_options(options: KernelOptions) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            options,
            state: Mutex::new(KernelState::new()),
        })
    }

    /// The host settings this kernel was created with.
    pub fn options(&self) -> &KernelOptions {
        &self.options
    }

    /// A context acting on behalf of `module`.
    pub fn context(&self, module: &str) -> ModuleContext {
        ModuleContext::new(self.self_ref.clone(), module)
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers a module.
    ///
    /// The module is stored with state [`LoadState::SetupPending`]. It is
    /// **not** set up or loaded until [`load_all`](Self::load_all) or
    /// [`load_module`](Self::load_module) reaches it. Its declared events are
    /// defined immediately; if any of them clashes with an existing
    /// definition nothing is registered.
    pub fn register<M: Module + 'static>(&self, module: M) -> KernelResult<()> {
        let module: Arc<dyn Module> = Arc::new(module);
        let name = module.name().to_string();
        if !is_valid_module_name(&name) || name == KERNEL_NAMESPACE {
            return Err(KernelError::InvalidModuleName(name));
        }

        let public = module.public();
        let config_spec = module.config();
        let declarations = module.events();
        let metadata = module.metadata();

        let mut state = self.state.lock();
        if state.shut_down {
            return Err(KernelError::ShutDown);
        }
        if state.index.contains_key(&name) {
            return Err(KernelError::DuplicateModule(name));
        }

        let mut staged: Vec<(EventType, EventSpec)> = Vec::new();
        for spec in declarations.defined {
            let ty = EventType::new(&name, spec.local());
            let existing = state
                .events
                .get(&ty)
                .or_else(|| staged.iter().find(|(t, _)| *t == ty).map(|(_, s)| s));
            match existing {
                Some(existing) if existing.is_compatible(&spec) => {}
                Some(_) => return Err(KernelError::DuplicateDefinition(ty.to_string())),
                None => staged.push((ty, spec)),
            }
        }
        let defined = staged.len();
        state.events.extend(staged);

        let index = state.entries.len();
        state.index.insert(name.clone(), index);
        state.entries.push(ModuleEntry {
            module,
            name: name.clone(),
            state: LoadState::SetupPending,
            failure: None,
            public,
            config_spec,
            subscriptions: declarations.subscribed,
            config: Arc::new(Value::Object(Map::new())),
            metadata: metadata.clone(),
            setup: None,
            post_loaded: false,
        });
        drop(state);

        info!(
            module = %name,
            version = %metadata.version,
            events = defined,
            "Module registered"
        );
        Ok(())
    }

    /// Registers every module, then runs [`load_all`](Self::load_all).
    ///
    /// Registration errors abort before anything is loaded.
    pub fn register_and_load_all<I>(&self, modules: I) -> KernelResult<LoadReport>
    where
        I: IntoIterator<Item = Arc<dyn Module>>,
    {
        for module in modules {
            self.register(module)?;
        }
        Ok(self.load_all())
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// Load state of `name`.
    pub fn state(&self, name: &str) -> LoadState {
        self.state
            .lock()
            .entry(name)
            .map_or(LoadState::Unregistered, |entry| entry.state)
    }

    /// Returns `true` if `name` is loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.state(name) == LoadState::Loaded
    }

    /// Handle of `name` if it is loaded.
    pub fn handle(&self, name: &str) -> Option<ModuleHandle> {
        self.state
            .lock()
            .entry(name)
            .filter(|entry| entry.state == LoadState::Loaded)
            .map(ModuleEntry::handle)
    }

    /// Why `name` failed, if it did.
    pub fn failure(&self, name: &str) -> Option<KernelError> {
        self.state
            .lock()
            .entry(name)
            .and_then(|entry| entry.failure.clone())
    }

    /// Effective config of `name` (empty until it loads).
    pub fn module_config(&self, name: &str) -> Option<Arc<Value>> {
        self.state
            .lock()
            .entry(name)
            .map(|entry| Arc::clone(&entry.config))
    }

    /// Loaded modules, in load order.
    pub fn loaded_modules(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .load_order
            .iter()
            .map(|&i| state.entries[i].name.clone())
            .collect()
    }

    /// Registered modules, in registration order.
    pub fn registered_modules(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Number of registered modules (in any state).
    pub fn module_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` once [`load_all`](Self::load_all) has finished.
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Unloads every loaded module in reverse load order.
    ///
    /// Pending continuations and all subscriptions are dropped; afterwards
    /// the kernel refuses to register, load, or deliver. Calling it twice is
    /// a no-op.
    pub fn shutdown(&self) {
        let (to_unload, dropped) = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.subscribers.clear();
            let dropped: Vec<Continuation> = state
                .waiting
                .drain()
                .flat_map(|(_, queue)| queue)
                .collect();
            let to_unload: Vec<(String, Arc<dyn Module>)> = state
                .load_order
                .iter()
                .rev()
                .map(|&i| {
                    let entry = &state.entries[i];
                    (entry.name.clone(), Arc::clone(&entry.module))
                })
                .collect();
            (to_unload, dropped)
        };

        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Dropping pending await continuations");
        }
        drop(dropped);

        for (name, module) in to_unload {
            let span = span!(tracing::Level::DEBUG, "unload", module = %name);
            let _enter = span.enter();
            module.unload();
            info!(module = %name, "Module unloaded");
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Kernel")
            .field("modules", &state.entries.len())
            .field("loaded", &state.load_order.len())
            .field("events", &state.events.len())
            .field("started", &state.started)
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleDefinition;
    use quill_core::EventSpec;

    #[test]
    fn test_register_rejects_duplicates_and_bad_names() {
        let kernel = Kernel::new();
        kernel.register(ModuleDefinition::builder("a").build()).unwrap();
        assert_eq!(
            kernel.register(ModuleDefinition::builder("a").build()),
            Err(KernelError::DuplicateModule("a".into()))
        );
        assert_eq!(
            kernel.register(ModuleDefinition::builder("a..b").build()),
            Err(KernelError::InvalidModuleName("a..b".into()))
        );
        assert_eq!(
            kernel.register(ModuleDefinition::builder(KERNEL_NAMESPACE).build()),
            Err(KernelError::InvalidModuleName(KERNEL_NAMESPACE.into()))
        );
        assert_eq!(kernel.module_count(), 1);
        assert_eq!(kernel.state("a"), LoadState::SetupPending);
        assert_eq!(kernel.state("zzz"), LoadState::Unregistered);
    }

    #[test]
    fn test_register_defines_events_atomically() {
        let kernel = Kernel::new();
        let bad = ModuleDefinition::builder("m")
            .define_event(EventSpec::new("ping"))
            .define_event(EventSpec::new("ping").content(ContentKind::String))
            .build();
        assert_eq!(
            kernel.register(bad),
            Err(KernelError::DuplicateDefinition("m.events.ping".into()))
        );
        assert_eq!(kernel.module_count(), 0);
        assert!(!kernel.is_event_defined(&EventType::new("m", "ping")));

        let good = ModuleDefinition::builder("m")
            .define_event(EventSpec::new("ping"))
            .define_event(EventSpec::new("ping"))
            .build();
        kernel.register(good).unwrap();
        assert!(kernel.is_event_defined(&EventType::new("m", "ping")));
    }

    #[test]
    fn test_shutdown_refuses_further_work() {
        let kernel = Kernel::new();
        kernel.register(ModuleDefinition::builder("a").build()).unwrap();
        kernel.load_all();
        kernel.shutdown();
        kernel.shutdown();
        assert!(kernel.is_shut_down());
        assert_eq!(
            kernel.register(ModuleDefinition::builder("b").build()),
            Err(KernelError::ShutDown)
        );
        assert_eq!(kernel.load_module("a").err(), Some(KernelError::ShutDown));
    }
}
