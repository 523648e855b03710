//! Declarative module data: setup results, load states, metadata, and event
//! declarations.

use std::collections::BTreeMap;
use std::fmt;

use crate::event::EventSpec;

// ─── SetupData ───────────────────────────────────────────────────────────────

/// What a module's `setup` declares.
///
/// `setup` is pure declaration: it may only report success and list its
/// needs. Side effects belong in `load`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupData {
    /// `false` fails the module before anything else runs.
    pub success: bool,
    /// Modules that must be loaded before this one.
    pub requires: Vec<String>,
    /// Sub-modules (relative to this module's name) that are loaded first and
    /// share this module's configuration.
    pub imports: Vec<String>,
    /// Modules that must already be loaded; never loaded on our behalf.
    pub wants: Vec<String>,
}

impl Default for SetupData {
    fn default() -> Self {
        Self::ok()
    }
}

impl SetupData {
    /// Successful setup with no needs.
    pub fn ok() -> Self {
        Self {
            success: true,
            requires: Vec::new(),
            imports: Vec::new(),
            wants: Vec::new(),
        }
    }

    /// Failed setup.
    pub fn failed() -> Self {
        Self {
            success: false,
            ..Self::ok()
        }
    }

    /// Adds requirements.
    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds imports.
    pub fn imports<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.imports.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds wants.
    pub fn wants<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wants.extend(names.into_iter().map(Into::into));
        self
    }
}

/// Full name of an import declared by `importer`.
pub fn import_name(importer: &str, import: &str) -> String {
    format!("{importer}.{import}")
}

// ─── LoadState ───────────────────────────────────────────────────────────────

/// Tracks the lifecycle of one module inside the kernel.
///
/// ```text
/// register()          ──► SetupPending
/// resolution reaches  ──► Resolving
/// deps + load() ok    ──► Loaded
/// any failure         ──► Failed   (terminal)
/// ```
///
/// A module becomes `Resolving` before its `setup` result is checked, so a
/// failed `setup` goes from `Resolving` to `Failed`. `load_all` may already
/// have run `setup` while the module was still `SetupPending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// No module of that name is known.
    Unregistered,
    /// Registered; not yet reached by resolution.
    SetupPending,
    /// Dependencies are being resolved (the module is on the active stack).
    Resolving,
    /// `load` completed.
    Loaded,
    /// Permanently failed for this kernel's lifetime.
    Failed,
}

impl LoadState {
    /// `Loaded` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Loaded | Self::Failed)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unregistered => "unregistered",
            Self::SetupPending => "setup-pending",
            Self::Resolving => "resolving",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
        })
    }
}

// ─── ModuleMetadata ──────────────────────────────────────────────────────────

/// Descriptive metadata attached to every module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    /// Semver version string.
    pub version: String,
    /// One-line description shown in logs.
    pub description: String,
}

impl Default for ModuleMetadata {
    fn default() -> Self {
        Self {
            version: "0.0.0".to_string(),
            description: String::new(),
        }
    }
}

// ─── Event declarations ──────────────────────────────────────────────────────

/// Subscription allow-list: owner → local event name → interest.
///
/// Only an explicit `true` delivers; a missing entry and `false` both mean no.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    table: BTreeMap<String, BTreeMap<String, bool>>,
}

impl Subscriptions {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks interest in each of `locals` owned by `owner`.
    pub fn subscribe<I, S>(mut self, owner: impl Into<String>, locals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_all(owner, locals, true);
        self
    }

    /// Sets the interest flag for each of `locals`.
    pub fn set_all<I, S>(&mut self, owner: impl Into<String>, locals: I, interested: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.table.entry(owner.into()).or_default();
        for local in locals {
            entry.insert(local.into(), interested);
        }
    }

    /// Sets one interest flag.
    pub fn set(&mut self, owner: impl Into<String>, local: impl Into<String>, interested: bool) {
        self.table
            .entry(owner.into())
            .or_default()
            .insert(local.into(), interested);
    }

    /// Returns `true` only for an explicit `true` entry.
    pub fn is_subscribed(&self, owner: &str, local: &str) -> bool {
        self.table
            .get(owner)
            .and_then(|locals| locals.get(local))
            .copied()
            .unwrap_or(false)
    }

    /// Every `(owner, local)` pair marked `true`.
    pub fn interests(&self) -> impl Iterator<Item = (&str, &str)> {
        self.table.iter().flat_map(|(owner, locals)| {
            locals
                .iter()
                .filter(|(_, interested)| **interested)
                .map(move |(local, _)| (owner.as_str(), local.as_str()))
        })
    }

    /// Every `(owner, local, flag)` entry, including explicit `false`s.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, bool)> {
        self.table.iter().flat_map(|(owner, locals)| {
            locals
                .iter()
                .map(move |(local, flag)| (owner.as_str(), local.as_str(), *flag))
        })
    }
}

/// Events a module defines and the events it listens to.
#[derive(Debug, Clone, Default)]
pub struct EventDeclarations {
    /// Events owned by the module, by local name.
    pub defined: Vec<EventSpec>,
    /// Events the module wants delivered.
    pub subscribed: Subscriptions,
}

// ─── Name validation ─────────────────────────────────────────────────────────

/// Returns `true` for a well-formed dot-namespaced module name.
///
/// Segments must be non-empty and free of whitespace.
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|segment| !segment.is_empty() && !segment.chars().any(char::is_whitespace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_builder() {
        let data = SetupData::ok().requires(["a", "b"]).imports(["ui"]);
        assert!(data.success);
        assert_eq!(data.requires, vec!["a", "b"]);
        assert_eq!(import_name("core.concealer", "ui"), "core.concealer.ui");
        assert!(!SetupData::failed().success);
    }

    #[test]
    fn test_subscriptions_are_an_allow_list() {
        let mut subs = Subscriptions::new().subscribe("m", ["ping", "pong"]);
        subs.set("m", "pong", false);
        assert!(subs.is_subscribed("m", "ping"));
        assert!(!subs.is_subscribed("m", "pong"));
        assert!(!subs.is_subscribed("m", "other"));
        assert!(!subs.is_subscribed("x", "ping"));
        assert_eq!(subs.interests().collect::<Vec<_>>(), vec![("m", "ping")]);
        assert_eq!(subs.entries().count(), 2);
    }

    #[test]
    fn test_module_names() {
        assert!(is_valid_module_name("core.keybinds"));
        assert!(is_valid_module_name("journal"));
        assert!(!is_valid_module_name(""));
        assert!(!is_valid_module_name("core..x"));
        assert!(!is_valid_module_name(".core"));
        assert!(!is_valid_module_name("core. x"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(LoadState::Loaded.is_terminal());
        assert!(LoadState::Failed.is_terminal());
        assert!(!LoadState::Resolving.is_terminal());
        assert_eq!(LoadState::SetupPending.to_string(), "setup-pending");
    }
}
