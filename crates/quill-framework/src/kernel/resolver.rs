//! Dependency resolution and the load lifecycle.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, info, span, trace, warn};

use quill_core::{
    EventContext, EventType, KernelError, KernelResult, LoadState, SetupData, effective_config,
    import_name,
};

use super::{Continuation, KERNEL_NAMESPACE, Kernel, KernelState, LoadReport, STARTED_EVENT};
use crate::context::{LoadContext, ModuleHandle};
use crate::module::Module;

impl Kernel {
    /// Resolves and loads `name`, loading its requirements first.
    ///
    /// Already loaded modules return immediately; failed ones return their
    /// stored error.
    pub fn resolve(&self, name: &str) -> KernelResult<()> {
        self.resolve_handle(name).map(|_| ())
    }

    /// Loads one module after startup.
    ///
    /// Its `post_load` runs as soon as it is loaded when startup has already
    /// finished and no [`load_all`](Self::load_all) is in progress.
    pub fn load_module(&self, name: &str) -> KernelResult<ModuleHandle> {
        if self.state.lock().shut_down {
            return Err(KernelError::ShutDown);
        }
        self.prepare_setups();
        self.resolve_handle(name)
    }

    /// Loads every registered, not yet loaded module.
    ///
    /// `setup` runs first for every pending module, so imports are known
    /// before anything resolves. Roots are then taken in registration order,
    /// skipping those disabled in [`KernelOptions`](super::KernelOptions).
    /// Once the graph has settled, `post_load` runs once per newly loaded
    /// module (again in registration order) and the kernel's `started` event
    /// is broadcast.
    pub fn load_all(&self) -> LoadReport {
        {
            let mut state = self.state.lock();
            if state.shut_down {
                warn!("load_all called after shutdown; ignoring");
                return LoadReport::default();
            }
            state.batch_depth += 1;
        }

        self.prepare_setups();
        let roots: Vec<String> = self
            .state
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.state == LoadState::SetupPending)
            .filter(|entry| !self.options.disabled.contains(&entry.name))
            .map(|entry| entry.name.clone())
            .collect();

        info!(roots = roots.len(), "Loading modules");
        for name in &roots {
            // Failures are recorded on the entry and collected below.
            let _ = self.resolve_handle(name);
        }

        let (post_load, report) = {
            let mut state = self.state.lock();
            state.batch_depth = state.batch_depth.saturating_sub(1);
            state.started = true;
            let mut post_load = Vec::new();
            // A nested call leaves the hooks to the outermost one.
            if state.batch_depth == 0 {
                for entry in state.entries.iter_mut() {
                    if entry.state == LoadState::Loaded && !entry.post_loaded {
                        entry.post_loaded = true;
                        post_load.push((entry.name.clone(), Arc::clone(&entry.module)));
                    }
                }
            }
            (post_load, Self::report(&state))
        };

        for (name, module) in post_load {
            let span = span!(tracing::Level::DEBUG, "post_load", module = %name);
            let _enter = span.enter();
            module.post_load(&self.context(&name));
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Startup finished"
        );

        let content = json!({
            "loaded": report.loaded,
            "failed": report.failed_names(),
        });
        let started = EventType::new(KERNEL_NAMESPACE, STARTED_EVENT);
        match self
            .create_event(KERNEL_NAMESPACE, &started, content, EventContext::default())
            .and_then(|event| self.broadcast(&event))
        {
            Ok(delivered) => debug!(delivered, "Broadcast started event"),
            Err(e) => warn!(error = %e, "Could not broadcast started event"),
        }

        report
    }

    fn report(state: &KernelState) -> LoadReport {
        LoadReport {
            loaded: state
                .load_order
                .iter()
                .map(|&i| state.entries[i].name.clone())
                .collect(),
            failed: state
                .entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .failure
                        .as_ref()
                        .map(|failure| (entry.name.clone(), failure.clone()))
                })
                .collect(),
        }
    }

    // ─── Resolution ──────────────────────────────────────────────────────────

    fn resolve_handle(&self, name: &str) -> KernelResult<ModuleHandle> {
        let (module, recorded) = {
            let mut state = self.state.lock();
            let KernelState {
                entries,
                index,
                resolving,
                shut_down,
                ..
            } = &mut *state;
            let Some(&i) = index.get(name) else {
                return Err(KernelError::UnknownModule(name.to_string()));
            };
            let entry = &mut entries[i];
            match entry.state {
                LoadState::Loaded => return Ok(entry.handle()),
                LoadState::Failed => {
                    return Err(entry
                        .failure
                        .clone()
                        .unwrap_or_else(|| KernelError::SetupFailure(name.to_string())));
                }
                LoadState::Resolving => {
                    let start = resolving.iter().position(|n| n == name).unwrap_or(0);
                    let mut cycle: Vec<&str> =
                        resolving[start..].iter().map(String::as_str).collect();
                    cycle.push(name);
                    return Err(KernelError::CyclicDependency {
                        cycle: cycle.join(" -> "),
                    });
                }
                LoadState::Unregistered => {
                    return Err(KernelError::UnknownModule(name.to_string()));
                }
                LoadState::SetupPending => {}
            }
            if *shut_down {
                return Err(KernelError::ShutDown);
            }
            // Resolving covers the `setup` check too, so a module reached
            // again from its own setup or requirements is seen as a cycle.
            entry.state = LoadState::Resolving;
            resolving.push(name.to_string());
            (Arc::clone(&entry.module), entry.setup.take())
        };

        debug!(module = %name, "Resolving module");
        let setup = match recorded {
            Some(setup) => setup,
            None => self.run_setup(name, module.as_ref()),
        };
        if !setup.success {
            return Err(self.fail(name, KernelError::SetupFailure(name.to_string())));
        }

        let mut required = BTreeMap::new();
        for dependency in &setup.requires {
            trace!(module = %name, dependency = %dependency, "Resolving requirement");
            match self.resolve_handle(dependency) {
                Ok(handle) => {
                    required.insert(dependency.clone(), handle);
                }
                Err(e) => {
                    return Err(self.fail(
                        name,
                        KernelError::dependency_failed(name, dependency, e),
                    ));
                }
            }
        }

        let mut imported = BTreeMap::new();
        for import in &setup.imports {
            let full = import_name(name, import);
            trace!(module = %name, import = %full, "Resolving import");
            match self.resolve_handle(&full) {
                Ok(handle) => {
                    imported.insert(import.clone(), handle);
                }
                Err(e) => {
                    return Err(self.fail(name, KernelError::dependency_failed(name, &full, e)));
                }
            }
        }

        for wanted in &setup.wants {
            let outcome = {
                let state = self.state.lock();
                match state.entry(wanted) {
                    None => Err(KernelError::dependency_failed(
                        name,
                        wanted,
                        KernelError::UnknownModule(wanted.clone()),
                    )),
                    Some(entry) if entry.state == LoadState::Loaded => Ok(entry.handle()),
                    Some(_) => Err(KernelError::WantedModuleNotLoaded {
                        module: name.to_string(),
                        wanted: wanted.clone(),
                    }),
                }
            };
            match outcome {
                Ok(handle) => {
                    required.insert(wanted.clone(), handle);
                }
                Err(e) => return Err(self.fail(name, e)),
            }
        }

        let (config, private) = {
            let mut state = self.state.lock();
            let custom = self.custom_config(&state, name);
            let import_defaults: Vec<Value> = setup
                .imports
                .iter()
                .filter_map(|import| imported.get(import))
                .filter_map(|handle: &ModuleHandle| state.entry(handle.name()))
                .map(|entry| entry.config_spec.public.clone())
                .collect();
            let Some(entry) = state.entry_mut(name) else {
                return Err(KernelError::UnknownModule(name.to_string()));
            };
            let layers: Vec<&Value> = import_defaults.iter().collect();
            let merged = Arc::new(effective_config(
                name,
                &entry.config_spec,
                &layers,
                &custom,
            ));
            entry.config = Arc::clone(&merged);
            (merged, Arc::new(entry.config_spec.private.clone()))
        };

        let ctx = LoadContext::new(self.context(name), required, imported, config, private);
        let loaded = {
            let span = span!(tracing::Level::DEBUG, "load", module = %name);
            let _enter = span.enter();
            panic::catch_unwind(AssertUnwindSafe(|| module.load(&ctx)))
        };
        match loaded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fail(name, KernelError::load_failure(name, e))),
            Err(payload) => {
                let reason = format!("panicked: {}", panic_message(payload.as_ref()));
                return Err(self.fail(name, KernelError::load_failure(name, reason)));
            }
        }

        self.finish_load(name)
    }

    /// Marks `name` loaded, then runs its await continuations and, after
    /// startup, its `post_load`.
    fn finish_load(&self, name: &str) -> KernelResult<ModuleHandle> {
        let (handle, waiting, post_load) = {
            let mut state = self.state.lock();
            let Some(&i) = state.index.get(name) else {
                return Err(KernelError::UnknownModule(name.to_string()));
            };
            let immediate = state.started && state.batch_depth == 0;
            let entry = &mut state.entries[i];
            entry.state = LoadState::Loaded;
            let post_load = immediate.then(|| {
                entry.post_loaded = true;
                Arc::clone(&entry.module)
            });
            let handle = entry.handle();
            let interests: Vec<EventType> = entry
                .subscriptions
                .interests()
                .map(|(owner, local)| EventType::new(owner, local))
                .collect();

            for ty in interests {
                let subscribers = state.subscribers.entry(ty).or_default();
                if let Err(pos) = subscribers.binary_search(&i) {
                    subscribers.insert(pos, i);
                }
            }
            if let Some(pos) = state.resolving.iter().rposition(|n| n == name) {
                state.resolving.remove(pos);
            }
            state.load_order.push(i);
            let waiting = state.waiting.remove(name).unwrap_or_default();
            (handle, waiting, post_load)
        };

        info!(module = %name, version = %handle.metadata().version, "Module loaded");

        if !waiting.is_empty() {
            debug!(module = %name, count = waiting.len(), "Running await continuations");
        }
        for continuation in waiting {
            let handle = handle.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(move || continuation(handle)));
            if let Err(payload) = outcome {
                error!(
                    module = %name,
                    panic = %panic_message(payload.as_ref()),
                    "Await continuation panicked"
                );
            }
        }

        if let Some(module) = post_load {
            module.post_load(&self.context(name));
        }

        Ok(handle)
    }

    /// Runs `setup` for every pending module that has not run it yet.
    ///
    /// Import parents are then known before anything resolves, whatever the
    /// registration order.
    fn prepare_setups(&self) {
        let pending: Vec<(String, Arc<dyn Module>)> = self
            .state
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.state == LoadState::SetupPending && entry.setup.is_none())
            .map(|entry| (entry.name.clone(), Arc::clone(&entry.module)))
            .collect();

        for (name, module) in pending {
            let setup = self.run_setup(&name, module.as_ref());
            let mut state = self.state.lock();
            if let Some(entry) = state.entry_mut(&name)
                && entry.state == LoadState::SetupPending
            {
                entry.setup = Some(setup);
            }
        }
    }

    /// Runs `setup` for `name` and records its imports' parent.
    ///
    /// A panicking `setup` counts as a reported failure.
    fn run_setup(&self, name: &str, module: &dyn Module) -> SetupData {
        let setup = match panic::catch_unwind(AssertUnwindSafe(|| module.setup())) {
            Ok(setup) => setup,
            Err(payload) => {
                error!(
                    module = %name,
                    panic = %panic_message(payload.as_ref()),
                    "Module setup panicked"
                );
                SetupData::failed()
            }
        };

        let mut state = self.state.lock();
        for import in &setup.imports {
            state
                .import_parents
                .insert(import_name(name, import), name.to_string());
        }
        setup
    }

    /// Marks `name` failed and returns `err` for propagation.
    fn fail(&self, name: &str, err: KernelError) -> KernelError {
        let dropped: Option<std::collections::VecDeque<Continuation>> = {
            let mut state = self.state.lock();
            if let Some(pos) = state.resolving.iter().rposition(|n| n == name) {
                state.resolving.remove(pos);
            }
            if let Some(entry) = state.entry_mut(name) {
                entry.state = LoadState::Failed;
                entry.failure = Some(err.clone());
            }
            state.waiting.remove(name)
        };

        error!(module = %name, error = %err, "Module failed to load");
        if let Some(dropped) = dropped {
            debug!(module = %name, count = dropped.len(), "Discarding await continuations");
        }
        err
    }

    /// The user's custom section for `name`.
    ///
    /// An imported module without a section of its own shares its importer's.
    fn custom_config(&self, state: &KernelState, name: &str) -> Value {
        let mut current = name;
        loop {
            if let Some(custom) = self.options.module_configs.get(current) {
                return custom.clone();
            }
            match state.import_parents.get(current) {
                Some(parent) if parent != name => current = parent,
                _ => return Value::Null,
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Awaited, KernelOptions};
    use crate::module::ModuleDefinition;
    use parking_lot::Mutex;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>) -> ModuleDefinition {
        let log = Arc::clone(log);
        let label = name.to_string();
        ModuleDefinition::builder(name)
            .on_load(move |_| {
                log.lock().push(label.clone());
                Ok(())
            })
            .build()
    }

    #[test]
    fn test_cycle_fails_both_modules() {
        let kernel = Kernel::new();
        kernel
            .register(ModuleDefinition::builder("a").requires(["b"]).build())
            .unwrap();
        kernel
            .register(ModuleDefinition::builder("b").requires(["a"]).build())
            .unwrap();

        let report = kernel.load_all();
        assert!(report.loaded.is_empty());
        assert_eq!(report.failed_names(), vec!["a", "b"]);
        assert_eq!(
            kernel.failure("a").unwrap().root_cause(),
            &KernelError::CyclicDependency {
                cycle: "a -> b -> a".into()
            }
        );
        assert_eq!(kernel.state("b"), LoadState::Failed);
    }

    #[test]
    fn test_setup_failure_is_terminal() {
        let kernel = Kernel::new();
        kernel
            .register(ModuleDefinition::builder("a").setup(SetupData::failed).build())
            .unwrap();
        assert_eq!(
            kernel.resolve("a"),
            Err(KernelError::SetupFailure("a".into()))
        );
        assert_eq!(
            kernel.resolve("a"),
            Err(KernelError::SetupFailure("a".into()))
        );
    }

    #[test]
    fn test_load_error_becomes_load_failure() {
        let kernel = Kernel::new();
        kernel
            .register(
                ModuleDefinition::builder("a")
                    .on_load(|_| Err("disk full".into()))
                    .build(),
            )
            .unwrap();
        assert_eq!(
            kernel.resolve("a"),
            Err(KernelError::load_failure("a", "disk full"))
        );
    }

    #[test]
    fn test_imports_share_config_and_load_first() {
        let log = recorder();
        let kernel = Kernel::with_options(
            KernelOptions::default().module_config("core.concealer", json!({ "width": 100 })),
        );
        let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_load = Arc::clone(&seen);
        let main_log = Arc::clone(&log);
        kernel
            .register(
                ModuleDefinition::builder("core.concealer")
                    .imports(["ui"])
                    .config(json!({ "width": 80, "icons": true }))
                    .on_load(move |ctx| {
                        main_log.lock().push("core.concealer".into());
                        let ui = ctx.imported("ui").unwrap();
                        seen_in_load.lock().push(ui.config().clone());
                        seen_in_load.lock().push(ctx.config().clone());
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        kernel
            .register(
                ModuleDefinition::builder("core.concealer.ui")
                    .config(json!({ "border": "round" }))
                    .build(),
            )
            .unwrap();
        kernel.register(recording("other", &log)).unwrap();

        let report = kernel.load_all();
        assert!(report.is_ok());
        assert_eq!(
            report.loaded,
            vec!["core.concealer.ui", "core.concealer", "other"]
        );
        let seen = seen.lock();
        // The import received the importer's custom section.
        assert_eq!(seen[0], json!({ "border": "round", "width": 100 }));
        assert_eq!(
            seen[1],
            json!({ "border": "round", "icons": true, "width": 100 })
        );
    }

    #[test]
    fn test_wants_require_already_loaded_module() {
        let kernel = Kernel::new();
        kernel
            .register(ModuleDefinition::builder("early").wants(["late"]).build())
            .unwrap();
        kernel.register(ModuleDefinition::builder("late").build()).unwrap();
        kernel
            .register(ModuleDefinition::builder("ok").wants(["late"]).build())
            .unwrap();
        kernel
            .register(ModuleDefinition::builder("lost").wants(["ghost"]).build())
            .unwrap();

        let report = kernel.load_all();
        assert_eq!(report.loaded, vec!["late", "ok"]);
        assert_eq!(
            kernel.failure("early"),
            Some(KernelError::WantedModuleNotLoaded {
                module: "early".into(),
                wanted: "late".into()
            })
        );
        assert_eq!(
            kernel.failure("lost").unwrap().root_cause(),
            &KernelError::UnknownModule("ghost".into())
        );
    }

    #[test]
    fn test_disabled_roots_still_load_as_dependencies() {
        let log = recorder();
        let kernel = Kernel::with_options(KernelOptions::default().disable("lib").disable("idle"));
        kernel.register(recording("lib", &log)).unwrap();
        kernel.register(recording("idle", &log)).unwrap();
        kernel
            .register(ModuleDefinition::builder("app").requires(["lib"]).build())
            .unwrap();

        let report = kernel.load_all();
        assert_eq!(report.loaded, vec!["lib", "app"]);
        assert_eq!(kernel.state("idle"), LoadState::SetupPending);
        assert_eq!(*log.lock(), vec!["lib"]);
    }

    #[test]
    fn test_post_load_runs_once_in_registration_order() {
        let log = recorder();
        let kernel = Kernel::new();
        for name in ["b", "a"] {
            let log = Arc::clone(&log);
            let label = name.to_string();
            kernel
                .register(
                    ModuleDefinition::builder(name)
                        .post_load(move |_| log.lock().push(label.clone()))
                        .build(),
                )
                .unwrap();
        }
        kernel.load_all();
        kernel.load_all();
        assert_eq!(*log.lock(), vec!["b", "a"]);

        let late_log = Arc::clone(&log);
        kernel
            .register(
                ModuleDefinition::builder("late")
                    .post_load(move |_| late_log.lock().push("late".into()))
                    .build(),
            )
            .unwrap();
        kernel.load_module("late").unwrap();
        assert_eq!(*log.lock(), vec!["b", "a", "late"]);
    }

    #[test]
    fn test_import_registered_first_still_shares_importer_config() {
        let kernel = Kernel::with_options(
            KernelOptions::default().module_config("core.concealer", json!({ "width": 100 })),
        );
        let seen = Arc::new(Mutex::new(Value::Null));
        let sink = Arc::clone(&seen);
        kernel
            .register(
                ModuleDefinition::builder("core.concealer.ui")
                    .config(json!({ "border": "round", "width": 80 }))
                    .on_load(move |ctx| {
                        *sink.lock() = ctx.config().clone();
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        kernel
            .register(
                ModuleDefinition::builder("core.concealer")
                    .imports(["ui"])
                    .build(),
            )
            .unwrap();

        assert!(kernel.load_all().is_ok());
        assert_eq!(*seen.lock(), json!({ "border": "round", "width": 100 }));
    }

    #[test]
    fn test_import_defaults_merge_in_declaration_order() {
        let kernel = Kernel::new();
        let seen = Arc::new(Mutex::new(Value::Null));
        let sink = Arc::clone(&seen);
        kernel
            .register(
                ModuleDefinition::builder("notes")
                    .imports(["z", "a"])
                    .on_load(move |ctx| {
                        *sink.lock() = ctx.config().clone();
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        for name in ["z", "a"] {
            kernel
                .register(
                    ModuleDefinition::builder(format!("notes.{name}"))
                        .config(json!({ "w": name }))
                        .build(),
                )
                .unwrap();
        }

        assert!(kernel.load_all().is_ok());
        assert_eq!(*seen.lock(), json!({ "w": "a" }));
    }

    #[test]
    fn test_panicking_load_is_a_load_failure() {
        let kernel = Kernel::new();
        kernel
            .register(
                ModuleDefinition::builder("bad")
                    .on_load(|_| panic!("index out of range"))
                    .build(),
            )
            .unwrap();
        kernel.register(ModuleDefinition::builder("good").build()).unwrap();

        let report = kernel.load_all();
        assert_eq!(report.loaded, vec!["good"]);
        let expected = KernelError::load_failure("bad", "panicked: index out of range");
        assert_eq!(kernel.failure("bad"), Some(expected.clone()));
        assert_eq!(kernel.state("bad"), LoadState::Failed);
        assert_eq!(kernel.resolve("bad"), Err(expected));
    }

    #[test]
    fn test_panicking_setup_is_a_setup_failure() {
        let kernel = Kernel::new();
        kernel
            .register(
                ModuleDefinition::builder("bad")
                    .setup(|| panic!("no setup today"))
                    .build(),
            )
            .unwrap();
        kernel
            .register(ModuleDefinition::builder("app").requires(["bad"]).build())
            .unwrap();

        let report = kernel.load_all();
        assert!(report.loaded.is_empty());
        assert_eq!(
            kernel.failure("bad"),
            Some(KernelError::SetupFailure("bad".into()))
        );
        assert_eq!(
            kernel.failure("app").unwrap().root_cause(),
            &KernelError::SetupFailure("bad".into())
        );
    }

    #[test]
    fn test_panicking_continuation_does_not_block_target() {
        let kernel = Kernel::new();
        kernel.register(ModuleDefinition::builder("late").build()).unwrap();
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);

        assert_eq!(
            kernel.await_module("late", |_| panic!("bad continuation")),
            Awaited::Queued
        );
        assert_eq!(
            kernel.await_module("late", move |_| *flag.lock() = true),
            Awaited::Queued
        );

        assert!(kernel.load_module("late").is_ok());
        assert_eq!(kernel.state("late"), LoadState::Loaded);
        assert!(*ran.lock());
    }

    #[test]
    fn test_second_load_all_defers_post_load_to_batch_end() {
        let kernel = Kernel::new();
        kernel.register(ModuleDefinition::builder("first").build()).unwrap();
        kernel.load_all();

        let saw_y = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&saw_y);
        kernel
            .register(
                ModuleDefinition::builder("x")
                    .post_load(move |ctx| *sink.lock() = Some(ctx.is_loaded("y")))
                    .build(),
            )
            .unwrap();
        kernel.register(ModuleDefinition::builder("y").build()).unwrap();

        let report = kernel.load_all();
        assert_eq!(report.loaded, vec!["first", "x", "y"]);
        assert_eq!(*saw_y.lock(), Some(true));
    }
}
