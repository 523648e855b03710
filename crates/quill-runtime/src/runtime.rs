//! The runtime: configuration, logging, and one kernel.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use quill_runtime::QuillRuntime;
//!
//! // Auto-loads quill.toml from the current directory
//! let runtime = QuillRuntime::new();
//!
//! // Custom configuration path
//! let runtime = QuillRuntime::builder()
//!     .config_file("config/quill.toml")
//!     .build()?;
//!
//! runtime.register(journal())?;
//! let report = runtime.start()?;
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use quill_core::KernelResult;
use quill_framework::{Kernel, LoadReport, Module, ModuleContext, ModuleHandle};

use crate::config::{ConfigLoader, ConfigResult, QuillConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Owns a [`Kernel`] configured from a [`QuillConfig`].
///
/// The `[modules]` table feeds the kernel: `config` sections become the
/// modules' custom config, and `enabled = false` keeps a module out of the
/// startup roots. Dropping a started runtime shuts the kernel down.
pub struct QuillRuntime {
    config: QuillConfig,
    kernel: Arc<Kernel>,
    phase: Mutex<Phase>,
}

impl QuillRuntime {
    /// Creates a runtime from `quill.toml` in the current directory or the
    /// user config directory, falling back to defaults.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .with_user_config_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                QuillConfig::default()
            });

        Self::from_config(&config)
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// Installs the global subscriber unless one is already set.
    pub fn from_config(config: &QuillConfig) -> Self {
        logging::init_from_config(&config.logging);

        let kernel = Kernel::with_options(config.kernel_options());

        info!(
            log_level = %config.logging.level,
            configured_modules = config.modules.len(),
            disabled = kernel.options().disabled.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            kernel,
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn config(&self) -> &QuillConfig {
        &self.config
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Registers a module with the kernel.
    pub fn register<M: Module + 'static>(&self, module: M) -> RuntimeResult<()> {
        self.kernel.register(module)?;
        Ok(())
    }

    /// Registers several modules, stopping at the first error.
    pub fn register_all<I>(&self, modules: I) -> RuntimeResult<()>
    where
        I: IntoIterator<Item = Arc<dyn Module>>,
    {
        for module in modules {
            self.kernel.register(module)?;
        }
        Ok(())
    }

    /// Loads every enabled module and broadcasts the started event.
    ///
    /// Per-module failures are reported, not returned; the error cases are a
    /// second `start` and a runtime that was already shut down.
    pub fn start(&self) -> RuntimeResult<LoadReport> {
        {
            let mut phase = self.phase.lock();
            match *phase {
                Phase::Idle => *phase = Phase::Running,
                Phase::Running => return Err(RuntimeError::AlreadyStarted),
                Phase::Stopped => return Err(quill_core::KernelError::ShutDown.into()),
            }
        }

        info!(modules = self.kernel.module_count(), "Starting Quill runtime");
        let report = self.kernel.load_all();

        for (name, error) in &report.failed {
            warn!(module = %name, error = %error, "Module did not load");
        }
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Runtime started"
        );
        Ok(report)
    }

    /// Loads one module (and its dependencies) on demand.
    pub fn load_module(&self, name: &str) -> KernelResult<ModuleHandle> {
        self.kernel.load_module(name)
    }

    /// A context acting on behalf of `module`, for host code.
    pub fn context(&self, module: &str) -> ModuleContext {
        self.kernel.context(module)
    }

    pub fn is_running(&self) -> bool {
        *self.phase.lock() == Phase::Running
    }

    /// Unloads every module. Later calls do nothing.
    pub fn shutdown(&self) {
        {
            let mut phase = self.phase.lock();
            if *phase == Phase::Stopped {
                return;
            }
            *phase = Phase::Stopped;
        }

        info!("Stopping Quill runtime");
        self.kernel.shutdown();
        info!("Runtime stopped");
    }
}

impl Default for QuillRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for QuillRuntime {
    fn drop(&mut self) {
        if *self.phase.get_mut() == Phase::Running {
            debug!("Runtime dropped while running");
            self.shutdown();
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`QuillRuntime`] with custom configuration.
///
/// ```rust,ignore
/// let runtime = QuillRuntime::builder()
///     .config_file("config/quill.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: QuillConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<QuillRuntime> {
        let config = self.config_loader.load()?;
        Ok(QuillRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
