//! Error types for the Quill kernel.

use thiserror::Error;

/// Error type returned by a module's `load` hook.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by module registration, resolution, loading, and the event bus.
///
/// Resolution failures are stored on the failed module and handed back on
/// every later lookup, so the type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// A required module was never registered.
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    /// The requirement graph loops back onto a module that is still resolving.
    #[error("cyclic dependency: {cycle}")]
    CyclicDependency {
        /// The offending chain, e.g. `a -> b -> a`.
        cycle: String,
    },

    /// The module's own `setup` reported failure.
    #[error("setup of module '{0}' reported failure")]
    SetupFailure(String),

    /// The module's `load` hook returned an error.
    #[error("module '{module}' failed to load: {reason}")]
    LoadFailure {
        /// Module whose `load` failed.
        module: String,
        /// Display form of the error returned by `load`.
        reason: String,
    },

    /// A dependency of `module` failed; `source` explains why.
    #[error("module '{module}' cannot load because dependency '{dependency}' failed: {source}")]
    DependencyFailed {
        /// The module that could not load.
        module: String,
        /// The broken link in the chain.
        dependency: String,
        /// Why the dependency failed.
        source: Box<KernelError>,
    },

    /// A wanted module is registered but was not loaded when it was needed.
    #[error("module '{module}' wants '{wanted}', which is not loaded")]
    WantedModuleNotLoaded {
        /// The wanting module.
        module: String,
        /// The module it wanted.
        wanted: String,
    },

    /// A module with the same name is already registered.
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    /// A module name is not a well-formed dot-namespaced identifier.
    #[error("invalid module name '{0}'")]
    InvalidModuleName(String),

    /// An event identity was defined twice with conflicting shapes.
    #[error("event '{0}' is already defined")]
    DuplicateDefinition(String),

    /// Two partial definitions of one module disagree on a key.
    #[error("conflicting definitions for '{key}' in module '{module}'")]
    ConflictingDefinition {
        /// The logical module being composed.
        module: String,
        /// The conflicting key (dotted path for config leaves).
        key: String,
    },

    /// An event identity was used before being defined.
    #[error("event '{0}' is not defined")]
    UndefinedEvent(String),

    /// A string could not be parsed as `<owner>.events.<local>`.
    #[error("invalid event type '{0}'")]
    InvalidEventType(String),

    /// Event content does not have the shape its definition declares.
    #[error("event '{event}' expects {expected} content, got {got}")]
    ContentMismatch {
        /// The event identity.
        event: String,
        /// The declared content kind.
        expected: &'static str,
        /// The kind actually supplied.
        got: &'static str,
    },

    /// A configuration selected a preset the module does not declare.
    ///
    /// Non-fatal: the merger logs it and falls back to the defaults.
    #[error("module '{module}' has no preset named '{preset}'")]
    UnknownPreset {
        /// Module whose config was being merged.
        module: String,
        /// The requested preset name.
        preset: String,
    },

    /// A module context outlived the kernel it points at.
    #[error("the kernel is no longer available")]
    KernelUnavailable,

    /// The kernel has been shut down and accepts no further loads.
    #[error("the kernel has been shut down")]
    ShutDown,
}

impl KernelError {
    /// Wraps `source` as the reason `dependency` broke for `module`.
    pub fn dependency_failed(
        module: impl Into<String>,
        dependency: impl Into<String>,
        source: KernelError,
    ) -> Self {
        Self::DependencyFailed {
            module: module.into(),
            dependency: dependency.into(),
            source: Box::new(source),
        }
    }

    /// Creates a load failure from any displayable error.
    pub fn load_failure(module: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::LoadFailure {
            module: module.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a conflicting-definition error.
    pub fn conflict(module: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ConflictingDefinition {
            module: module.into(),
            key: key.into(),
        }
    }

    /// Follows `DependencyFailed` links down to the error that started the chain.
    pub fn root_cause(&self) -> &KernelError {
        let mut current = self;
        while let Self::DependencyFailed { source, .. } = current {
            current = source;
        }
        current
    }

    /// Module names along the failure chain, outermost first.
    pub fn chain(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = self;
        while let Self::DependencyFailed {
            module,
            dependency,
            source,
        } = current
        {
            if names.last() != Some(&module.as_str()) {
                names.push(module.as_str());
            }
            names.push(dependency.as_str());
            current = source;
        }
        names
    }
}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_follows_chain() {
        let err = KernelError::dependency_failed(
            "c",
            "b",
            KernelError::dependency_failed("b", "y", KernelError::UnknownModule("y".into())),
        );
        assert_eq!(err.root_cause(), &KernelError::UnknownModule("y".into()));
        assert_eq!(err.chain(), vec!["c", "b", "y"]);
    }

    #[test]
    fn test_chained_message_names_the_broken_link() {
        let err = KernelError::dependency_failed("x", "y", KernelError::UnknownModule("y".into()));
        let msg = err.to_string();
        assert!(msg.contains("'x'"));
        assert!(msg.contains("dependency 'y'"));
        assert!(msg.contains("unknown module 'y'"));
    }

    #[test]
    fn test_root_cause_of_plain_error_is_itself() {
        let err = KernelError::SetupFailure("a".into());
        assert_eq!(err.root_cause(), &err);
        assert!(err.chain().is_empty());
    }
}
