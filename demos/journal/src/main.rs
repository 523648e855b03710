//! Journal Example
//!
//! Loads a small note-taking setup on the Quill kernel:
//!
//! ```text
//! journal ──requires──▶ core.dirman
//! core.concealer ──imports──▶ core.concealer.ui
//! ```
//!
//! - `core.dirman` exposes a workspace registry and owns the
//!   `workspace_changed` event
//! - `journal` reads the registry at load time and follows workspace changes
//! - `core.concealer` picks its icons from a preset and waits for `journal`
//!   after startup
//!
//! # Usage
//!
//! ```bash
//! cargo run --package quill-journal -- --preset varied --workspace work
//! ```
//!
//! A `quill.toml` in the current directory is picked up automatically:
//!
//! ```toml
//! [modules."core.dirman".config.workspaces]
//! work = "~/work/notes"
//!
//! [modules."core.concealer".config]
//! border = "single"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use parking_lot::RwLock;
use quill::core::PRESET_KEY;
use quill::prelude::*;
use quill::runtime::ConfigLoader;
use serde::Deserialize;

const DIRMAN: &str = "core.dirman";
const CONCEALER: &str = "core.concealer";
const JOURNAL: &str = "journal";

#[derive(Parser, Debug)]
#[command(version, about = "Load a journal setup on the Quill kernel")]
struct Args {
    /// Configuration file (defaults to quill.toml in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace to switch to once everything is loaded
    #[arg(short, long)]
    workspace: Option<String>,

    /// Icon preset for the concealer
    #[arg(long)]
    preset: Option<String>,

    /// Keep a module out of startup (repeatable)
    #[arg(long, value_name = "MODULE")]
    disable: Vec<String>,
}

// ============================================================================
// core.dirman
// ============================================================================

#[derive(Debug, Deserialize)]
struct DirmanConfig {
    workspaces: BTreeMap<String, PathBuf>,
    default_workspace: String,
}

/// The workspace registry `core.dirman` exposes as `"workspaces"`.
struct Workspaces {
    known: BTreeMap<String, PathBuf>,
    current: RwLock<String>,
}

impl Workspaces {
    fn current(&self) -> (String, PathBuf) {
        let name = self.current.read().clone();
        let path = self.known.get(&name).cloned().unwrap_or_default();
        (name, path)
    }

    /// Switches workspace and broadcasts `workspace_changed` as `core.dirman`.
    fn switch(&self, ctx: &ModuleContext, name: &str) -> Result<usize> {
        let Some(path) = self.known.get(name) else {
            bail!("unknown workspace '{name}'");
        };
        let old = std::mem::replace(&mut *self.current.write(), name.to_string());

        let event = ctx.event(
            "workspace_changed",
            json!({ "old": old, "new": name, "path": path }),
        )?;
        Ok(ctx.broadcast(&event)?)
    }
}

fn dirman() -> ModuleDefinition {
    let public = PublicTable::new();
    let exposed = public.clone();

    ModuleDefinition::builder(DIRMAN)
        .version("0.3.0")
        .description("Workspace directories")
        .config(json!({
            "workspaces": { "default": "~/notes" },
            "default_workspace": "default",
        }))
        .define_event(
            EventSpec::new("workspace_changed")
                .content(ContentKind::Object)
                .description("The current workspace changed"),
        )
        .public(public)
        .on_load(move |ctx| {
            let config: DirmanConfig = ctx.config_as()?;
            if !config.workspaces.contains_key(&config.default_workspace) {
                return Err(format!(
                    "default workspace '{}' is not configured",
                    config.default_workspace
                )
                .into());
            }

            info!(
                workspaces = config.workspaces.len(),
                default = %config.default_workspace,
                "Workspaces ready"
            );
            exposed.insert(
                "workspaces",
                Workspaces {
                    known: config.workspaces,
                    current: RwLock::new(config.default_workspace),
                },
            );
            Ok(())
        })
        .build()
}

// ============================================================================
// journal
// ============================================================================

#[derive(Debug, Deserialize)]
struct JournalConfig {
    folder: String,
    strategy: String,
}

fn journal() -> ModuleDefinition {
    ModuleDefinition::builder(JOURNAL)
        .version("0.2.0")
        .requires([DIRMAN])
        .config(json!({ "folder": "journal", "strategy": "nested" }))
        .subscribe(DIRMAN, ["workspace_changed"])
        .subscribe(KERNEL_NAMESPACE, [STARTED_EVENT])
        .on_load(|ctx| {
            let config: JournalConfig = ctx.config_as()?;
            let workspaces = ctx
                .required(DIRMAN)
                .and_then(|dirman| dirman.get::<Workspaces>("workspaces"))
                .ok_or("core.dirman exposes no workspace registry")?;

            let (workspace, root) = workspaces.current();
            info!(
                workspace = %workspace,
                path = %root.join(&config.folder).display(),
                strategy = %config.strategy,
                "Journal ready"
            );
            Ok(())
        })
        .on_event(|ctx, event| match event.split_type() {
            (DIRMAN, "workspace_changed") => {
                let content = event.content();
                info!(
                    from = %content["old"],
                    to = %content["new"],
                    "Journal follows workspace"
                );
            }
            (KERNEL_NAMESPACE, STARTED_EVENT) => {
                let loaded = event.content()["loaded"].as_array().map_or(0, Vec::len);
                debug!(module = ctx.name(), loaded, "Startup complete");
            }
            _ => {}
        })
        .build()
}

// ============================================================================
// core.concealer
// ============================================================================

fn concealer_ui() -> ModuleDefinition {
    ModuleDefinition::builder("core.concealer.ui")
        .config(json!({ "border": "rounded", "width": 80 }))
        .build()
}

fn concealer() -> ModuleDefinition {
    ModuleDefinition::builder(CONCEALER)
        .imports(["ui"])
        .config(json!({
            "icons": { "heading": "◉", "list": "•" },
            "conceal_links": true,
        }))
        .preset("basic", json!({ "icons": { "heading": "#", "list": "-" } }))
        .preset(
            "varied",
            json!({ "icons": { "heading": "◈", "list": "‣" }, "conceal_links": false }),
        )
        .on_load(|ctx| {
            let ui = ctx.imported("ui").ok_or("concealer ui was not imported")?;
            info!(
                icons = %ctx.config()["icons"],
                border = %ui.config()["border"],
                "Concealer ready"
            );
            Ok(())
        })
        .post_load(|ctx| {
            let outcome = ctx.await_module(JOURNAL, |journal| {
                info!(folder = %journal.config()["folder"], "Concealing journal entries");
            });
            match outcome {
                Ok(Awaited::Queued) => debug!("Waiting for journal"),
                Ok(Awaited::Dropped) | Err(_) => debug!("Journal unavailable"),
                Ok(Awaited::Ran) => {}
            }
        })
        .build()
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_current_dir();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let mut config = loader.load().context("failed to load configuration")?;

    for name in &args.disable {
        config.modules.entry(name.clone()).or_default().enabled = false;
    }
    if let Some(preset) = &args.preset {
        let settings = config.modules.entry(CONCEALER.to_string()).or_default();
        if !settings.config.is_object() {
            settings.config = json!({});
        }
        settings.config[PRESET_KEY] = json!(preset);
    }

    let runtime = QuillRuntime::from_config(&config);
    runtime.register(dirman())?;
    runtime.register(journal())?;
    runtime.register(concealer_ui())?;
    runtime.register(concealer())?;

    let report = runtime.start()?;

    if let Some(workspace) = &args.workspace {
        let ctx = runtime.context(DIRMAN);
        let workspaces = ctx
            .handle(DIRMAN)
            .and_then(|dirman| dirman.get::<Workspaces>("workspaces"))
            .context("core.dirman is not loaded")?;
        let delivered = workspaces.switch(&ctx, workspace)?;
        info!(workspace = %workspace, delivered, "Workspace switched");
    }

    runtime.shutdown();

    if !report.is_ok() {
        bail!("modules failed to load: {}", report.failed_names().join(", "));
    }
    Ok(())
}
