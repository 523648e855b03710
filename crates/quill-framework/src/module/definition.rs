//! Closure-based module definitions and their composition.
//!
//! [`ModuleBuilder`] assembles a [`ModuleDefinition`] piece by piece. One
//! logical module may be split over several builders (for instance one per
//! source file) and joined with [`ModuleBuilder::extend`], which merges the
//! parts deterministically and rejects any key both parts define differently.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use quill_core::{
    BoxError, ConfigSpec, Event, EventDeclarations, EventSpec, EventType, KernelError,
    KernelResult, ModuleMetadata, PublicTable, SetupData, merge_disjoint,
};

use super::Module;
use crate::context::{LoadContext, ModuleContext};

type SetupFn = Arc<dyn Fn() -> SetupData + Send + Sync>;
type LoadFn = Arc<dyn Fn(&LoadContext) -> Result<(), BoxError> + Send + Sync>;
type EventFn = Arc<dyn Fn(&ModuleContext, &Event) + Send + Sync>;
type HookFn = Arc<dyn Fn(&ModuleContext) + Send + Sync>;
type UnloadFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
struct Hooks {
    setup: Vec<SetupFn>,
    load: Vec<LoadFn>,
    on_event: Vec<EventFn>,
    post_load: Vec<HookFn>,
    unload: Vec<UnloadFn>,
}

impl Hooks {
    fn append(&mut self, other: Hooks) {
        self.setup.extend(other.setup);
        self.load.extend(other.load);
        self.on_event.extend(other.on_event);
        self.post_load.extend(other.post_load);
        self.unload.extend(other.unload);
    }
}

// ─── ModuleBuilder ────────────────────────────────────────────────────────────

/// Builder for a [`ModuleDefinition`].
///
/// ```rust,ignore
/// let base = ModuleDefinition::builder("core.concealer")
///     .config(json!({ "icons": { "heading": "*" } }))
///     .on_load(|_| Ok(()));
///
/// let ui = ModuleDefinition::builder("core.concealer")
///     .config(json!({ "width": 80 }))
///     .expose("render", Renderer::default());
///
/// let concealer = base.extend(ui)?.build();
/// ```
pub struct ModuleBuilder {
    name: String,
    requires: Vec<String>,
    imports: Vec<String>,
    wants: Vec<String>,
    hooks: Hooks,
    public: PublicTable,
    config: ConfigSpec,
    events: EventDeclarations,
    metadata: Option<ModuleMetadata>,
}

impl ModuleBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            imports: Vec::new(),
            wants: Vec::new(),
            hooks: Hooks::default(),
            public: PublicTable::new(),
            config: ConfigSpec::default(),
            events: EventDeclarations::default(),
            metadata: None,
        }
    }

    /// Adds hard requirements.
    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.requires, names.into_iter().map(Into::into));
        self
    }

    /// Adds imports (names relative to this module).
    pub fn imports<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.imports, names.into_iter().map(Into::into));
        self
    }

    /// Adds modules that must already be loaded.
    pub fn wants<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.wants, names.into_iter().map(Into::into));
        self
    }

    /// Adds a custom setup function.
    ///
    /// Its lists are joined with the ones declared on the builder, and a
    /// `success: false` from any setup function fails the module.
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn() -> SetupData + Send + Sync + 'static,
    {
        self.hooks.setup.push(Arc::new(f));
        self
    }

    /// Adds a load hook.
    pub fn on_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&LoadContext) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hooks.load.push(Arc::new(f));
        self
    }

    /// Adds an event handler.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ModuleContext, &Event) + Send + Sync + 'static,
    {
        self.hooks.on_event.push(Arc::new(f));
        self
    }

    /// Adds a post-load hook.
    pub fn post_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&ModuleContext) + Send + Sync + 'static,
    {
        self.hooks.post_load.push(Arc::new(f));
        self
    }

    /// Adds an unload hook.
    pub fn on_unload<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.unload.push(Arc::new(f));
        self
    }

    /// Uses `table` as the public table (replacing any entries exposed so far).
    pub fn public(mut self, table: PublicTable) -> Self {
        self.public = table;
        self
    }

    /// Exposes one capability in the public table.
    pub fn expose<T: Any + Send + Sync>(self, key: impl Into<String>, value: T) -> Self {
        self.public.insert(key, value);
        self
    }

    /// Sets the public config defaults.
    pub fn config(mut self, defaults: Value) -> Self {
        self.config.public = defaults;
        self
    }

    /// Sets the private config.
    pub fn private_config(mut self, private: Value) -> Self {
        self.config.private = private;
        self
    }

    /// Declares a preset.
    pub fn preset(mut self, name: impl Into<String>, fragment: Value) -> Self {
        self.config.presets.insert(name.into(), fragment);
        self
    }

    /// Declares an owned event.
    pub fn define_event(mut self, spec: EventSpec) -> Self {
        self.events.defined.push(spec);
        self
    }

    /// Subscribes to events owned by `owner`.
    pub fn subscribe<I, S>(mut self, owner: impl Into<String>, locals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events.subscribed.set_all(owner, locals, true);
        self
    }

    /// Sets the version string.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.get_or_insert_with(ModuleMetadata::default).version = version.into();
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(ModuleMetadata::default)
            .description = description.into();
        self
    }

    /// Merges another partial definition of the same module into this one.
    ///
    /// Requirement lists are unioned in order and lifecycle hooks run in part
    /// order. Public keys, presets, config leaves, subscription flags, and
    /// metadata defined by both parts must agree; otherwise this fails with
    /// [`KernelError::ConflictingDefinition`] (or
    /// [`KernelError::DuplicateDefinition`] for incompatible event
    /// definitions).
    pub fn extend(mut self, other: ModuleBuilder) -> KernelResult<Self> {
        let name = self.name.clone();
        if other.name != name {
            return Err(KernelError::conflict(name, "name"));
        }

        self.config.public = merge_disjoint(&name, &self.config.public, &other.config.public)?;
        self.config.private =
            merge_disjoint(&name, &self.config.private, &other.config.private)?;
        for (preset, fragment) in other.config.presets {
            match self.config.presets.get(&preset) {
                Some(existing) if *existing != fragment => {
                    return Err(KernelError::conflict(&name, format!("presets.{preset}")));
                }
                Some(_) => {}
                None => {
                    self.config.presets.insert(preset, fragment);
                }
            }
        }

        for spec in other.events.defined {
            match self
                .events
                .defined
                .iter()
                .find(|existing| existing.local() == spec.local())
            {
                Some(existing) if existing.is_compatible(&spec) => {}
                Some(_) => {
                    return Err(KernelError::DuplicateDefinition(
                        EventType::new(&name, spec.local()).to_string(),
                    ));
                }
                None => self.events.defined.push(spec),
            }
        }

        for (owner, local, flag) in other.events.subscribed.entries() {
            let ours = self
                .events
                .subscribed
                .entries()
                .find(|(o, l, _)| *o == owner && *l == local)
                .map(|(_, _, f)| f);
            match ours {
                Some(existing) if existing != flag => {
                    return Err(KernelError::conflict(
                        &name,
                        format!("subscribed.{owner}.{local}"),
                    ));
                }
                Some(_) => {}
                None => self.events.subscribed.set(owner, local, flag),
            }
        }

        self.metadata = match (self.metadata, other.metadata) {
            (Some(ours), Some(theirs)) if ours != theirs => {
                return Err(KernelError::conflict(&name, "metadata"));
            }
            (ours, theirs) => ours.or(theirs),
        };

        self.public
            .absorb(&other.public)
            .map_err(|key| KernelError::conflict(&name, format!("public.{key}")))?;

        extend_unique(&mut self.requires, other.requires);
        extend_unique(&mut self.imports, other.imports);
        extend_unique(&mut self.wants, other.wants);
        self.hooks.append(other.hooks);

        Ok(self)
    }

    /// Finishes the definition.
    pub fn build(self) -> ModuleDefinition {
        ModuleDefinition {
            name: self.name,
            requires: self.requires,
            imports: self.imports,
            wants: self.wants,
            hooks: self.hooks,
            public: self.public,
            config: self.config,
            events: self.events,
            metadata: self.metadata.unwrap_or_default(),
        }
    }
}

fn extend_unique(target: &mut Vec<String>, names: impl IntoIterator<Item = String>) {
    for name in names {
        if !target.contains(&name) {
            target.push(name);
        }
    }
}

// ─── ModuleDefinition ─────────────────────────────────────────────────────────

/// A module assembled from closures by [`ModuleBuilder`].
#[derive(Clone)]
pub struct ModuleDefinition {
    name: String,
    requires: Vec<String>,
    imports: Vec<String>,
    wants: Vec<String>,
    hooks: Hooks,
    public: PublicTable,
    config: ConfigSpec,
    events: EventDeclarations,
    metadata: ModuleMetadata,
}

impl ModuleDefinition {
    /// Starts a definition for `name`.
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder::new(name)
    }

    /// The live public table (the same one the kernel hands to dependents).
    pub fn public_table(&self) -> &PublicTable {
        &self.public
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("requires", &self.requires)
            .field("imports", &self.imports)
            .field("wants", &self.wants)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl Module for ModuleDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&self) -> SetupData {
        let mut data = SetupData::ok()
            .requires(self.requires.iter().cloned())
            .imports(self.imports.iter().cloned())
            .wants(self.wants.iter().cloned());
        for setup in &self.hooks.setup {
            let custom = setup();
            data.success &= custom.success;
            extend_unique(&mut data.requires, custom.requires);
            extend_unique(&mut data.imports, custom.imports);
            extend_unique(&mut data.wants, custom.wants);
        }
        data
    }

    fn load(&self, ctx: &LoadContext) -> Result<(), BoxError> {
        for load in &self.hooks.load {
            load(ctx)?;
        }
        Ok(())
    }

    fn on_event(&self, ctx: &ModuleContext, event: &Event) {
        for handler in &self.hooks.on_event {
            handler(ctx, event);
        }
    }

    fn post_load(&self, ctx: &ModuleContext) {
        for hook in &self.hooks.post_load {
            hook(ctx);
        }
    }

    fn unload(&self) {
        for hook in &self.hooks.unload {
            hook();
        }
    }

    fn public(&self) -> PublicTable {
        self.public.clone()
    }

    fn config(&self) -> ConfigSpec {
        self.config.clone()
    }

    fn events(&self) -> EventDeclarations {
        self.events.clone()
    }

    fn metadata(&self) -> ModuleMetadata {
        self.metadata.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::ContentKind;
    use serde_json::json;

    #[test]
    fn test_setup_joins_custom_setup() {
        let def = ModuleDefinition::builder("a")
            .requires(["b"])
            .setup(|| SetupData::ok().requires(["c", "b"]).imports(["ui"]))
            .build();
        let data = def.setup();
        assert!(data.success);
        assert_eq!(data.requires, vec!["b", "c"]);
        assert_eq!(data.imports, vec!["ui"]);

        let failing = ModuleDefinition::builder("a")
            .setup(SetupData::failed)
            .build();
        assert!(!failing.setup().success);
    }

    #[test]
    fn test_extend_merges_disjoint_parts() {
        let base = ModuleDefinition::builder("core.concealer")
            .requires(["core.highlights"])
            .config(json!({ "icons": { "heading": "*" } }))
            .preset("varied", json!({ "icons": { "heading": "◉" } }))
            .define_event(EventSpec::new("toggled").content(ContentKind::Bool))
            .expose("render", 1u8);
        let ui = ModuleDefinition::builder("core.concealer")
            .requires(["core.highlights", "core.autocommands"])
            .config(json!({ "icons": { "list": "-" }, "width": 80 }))
            .define_event(EventSpec::new("toggled").content(ContentKind::Bool))
            .subscribe("core.autocommands", ["bufenter"])
            .expose("width", 80usize)
            .version("1.2.0");

        let def = base.extend(ui).unwrap().build();
        assert_eq!(
            def.config().public,
            json!({ "icons": { "heading": "*", "list": "-" }, "width": 80 })
        );
        assert_eq!(
            def.setup().requires,
            vec!["core.highlights", "core.autocommands"]
        );
        assert_eq!(def.events().defined.len(), 1);
        assert!(
            def.events()
                .subscribed
                .is_subscribed("core.autocommands", "bufenter")
        );
        assert_eq!(def.public().keys(), vec!["render", "width"]);
        assert_eq!(def.metadata().version, "1.2.0");
    }

    #[test]
    fn test_extend_rejects_conflicts() {
        let conflict = |a: ModuleBuilder, b: ModuleBuilder| a.extend(b).err();

        assert_eq!(
            conflict(
                ModuleDefinition::builder("m").config(json!({ "width": 80 })),
                ModuleDefinition::builder("m").config(json!({ "width": 100 })),
            ),
            Some(KernelError::conflict("m", "width"))
        );
        assert_eq!(
            conflict(
                ModuleDefinition::builder("m").expose("api", 1u8),
                ModuleDefinition::builder("m").expose("api", 2u8),
            ),
            Some(KernelError::conflict("m", "public.api"))
        );
        assert_eq!(
            conflict(
                ModuleDefinition::builder("m").preset("p", json!({ "a": 1 })),
                ModuleDefinition::builder("m").preset("p", json!({ "a": 2 })),
            ),
            Some(KernelError::conflict("m", "presets.p"))
        );
        assert_eq!(
            conflict(
                ModuleDefinition::builder("m").define_event(EventSpec::new("e")),
                ModuleDefinition::builder("m")
                    .define_event(EventSpec::new("e").content(ContentKind::Null)),
            ),
            Some(KernelError::DuplicateDefinition("m.events.e".into()))
        );
        assert_eq!(
            conflict(
                ModuleDefinition::builder("m"),
                ModuleDefinition::builder("n"),
            ),
            Some(KernelError::conflict("m", "name"))
        );
        assert_eq!(
            conflict(
                ModuleDefinition::builder("m").version("1.0.0"),
                ModuleDefinition::builder("m").version("2.0.0"),
            ),
            Some(KernelError::conflict("m", "metadata"))
        );
    }
}
