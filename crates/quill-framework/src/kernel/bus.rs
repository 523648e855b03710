//! The event bus: definitions, subscriptions, and synchronous delivery.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, span, trace};

use quill_core::{
    Event, EventContext, EventSpec, EventType, KernelError, KernelResult, LoadState,
};

use super::{KERNEL_NAMESPACE, Kernel};
use crate::module::Module;

impl Kernel {
    /// Defines an event owned by `owner`.
    ///
    /// Defining the same identity again with the same content kind is a
    /// no-op; a different kind fails with
    /// [`KernelError::DuplicateDefinition`].
    pub fn define_event(&self, owner: &str, spec: EventSpec) -> KernelResult<EventType> {
        let ty = EventType::new(owner, spec.local());
        let mut state = self.state.lock();
        if owner != KERNEL_NAMESPACE && !state.index.contains_key(owner) {
            return Err(KernelError::UnknownModule(owner.to_string()));
        }
        match state.events.get(&ty) {
            Some(existing) if existing.is_compatible(&spec) => return Ok(ty),
            Some(_) => return Err(KernelError::DuplicateDefinition(ty.to_string())),
            None => {}
        }
        debug!(event = %ty, content = spec.content_kind().as_str(), "Event defined");
        state.events.insert(ty.clone(), spec);
        Ok(ty)
    }

    /// Returns `true` if `event_type` has been defined.
    pub fn is_event_defined(&self, event_type: &EventType) -> bool {
        self.state.lock().events.contains_key(event_type)
    }

    /// The definition of `event_type`.
    pub fn event_spec(&self, event_type: &EventType) -> Option<EventSpec> {
        self.state.lock().events.get(event_type).cloned()
    }

    /// Creates an event instance after checking its definition.
    pub fn create_event(
        &self,
        referrer: &str,
        event_type: &EventType,
        content: Value,
        context: EventContext,
    ) -> KernelResult<Event> {
        let state = self.state.lock();
        let spec = state
            .events
            .get(event_type)
            .ok_or_else(|| KernelError::UndefinedEvent(event_type.to_string()))?;
        spec.check_content(event_type, &content)?;
        Ok(Event::__new(event_type.clone(), referrer, content, context))
    }

    /// Delivers `event` to every loaded subscriber, in registration order.
    ///
    /// Handlers run synchronously on the caller's thread and may re-enter the
    /// kernel. Returns the number of modules the event was delivered to.
    pub fn broadcast(&self, event: &Event) -> KernelResult<usize> {
        let ty = event.event_type();
        let recipients: Vec<(String, Arc<dyn Module>)> = {
            let state = self.state.lock();
            if state.shut_down {
                return Err(KernelError::ShutDown);
            }
            if !state.events.contains_key(ty) {
                return Err(KernelError::UndefinedEvent(ty.to_string()));
            }
            state
                .subscribers
                .get(ty)
                .into_iter()
                .flatten()
                .map(|&i| &state.entries[i])
                .filter(|entry| entry.state == LoadState::Loaded)
                .map(|entry| (entry.name.clone(), Arc::clone(&entry.module)))
                .collect()
        };

        let span = span!(
            tracing::Level::DEBUG,
            "dispatch",
            event = %ty,
            referrer = %event.referrer()
        );
        let _enter = span.enter();

        let delivered = event.__delivered_as(true);
        for (name, module) in &recipients {
            trace!(module = %name, "Delivering event");
            module.on_event(&self.context(name), &delivered);
        }
        Ok(recipients.len())
    }

    /// Delivers `event` to `recipient` alone.
    ///
    /// Returns `false` when the recipient is not loaded or not subscribed to
    /// the event.
    pub fn send(&self, recipient: &str, event: &Event) -> KernelResult<bool> {
        let ty = event.event_type();
        let module = {
            let state = self.state.lock();
            if state.shut_down {
                return Err(KernelError::ShutDown);
            }
            if !state.events.contains_key(ty) {
                return Err(KernelError::UndefinedEvent(ty.to_string()));
            }
            let entry = state
                .entry(recipient)
                .ok_or_else(|| KernelError::UnknownModule(recipient.to_string()))?;
            let (owner, local) = ty.split();
            (entry.state == LoadState::Loaded && entry.subscriptions.is_subscribed(owner, local))
                .then(|| Arc::clone(&entry.module))
        };

        let Some(module) = module else {
            trace!(event = %ty, module = %recipient, "Recipient not subscribed; dropping event");
            return Ok(false);
        };

        let span = span!(
            tracing::Level::DEBUG,
            "dispatch",
            event = %ty,
            referrer = %event.referrer()
        );
        let _enter = span.enter();
        module.on_event(&self.context(recipient), &event.__delivered_as(false));
        Ok(true)
    }

    /// Sets `module`'s interest in the given events of `owner`.
    ///
    /// Takes effect immediately for a loaded module, and at load time
    /// otherwise.
    pub fn set_subscriptions<I, S>(
        &self,
        module: &str,
        owner: &str,
        locals: I,
        interested: bool,
    ) -> KernelResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(KernelError::ShutDown);
        }
        let Some(&i) = state.index.get(module) else {
            return Err(KernelError::UnknownModule(module.to_string()));
        };
        let locals: Vec<String> = locals.into_iter().map(Into::into).collect();
        let entry = &mut state.entries[i];
        entry
            .subscriptions
            .set_all(owner, locals.iter().cloned(), interested);
        if entry.state != LoadState::Loaded {
            return Ok(());
        }

        for local in locals {
            let ty = EventType::new(owner, local);
            let subscribers = state.subscribers.entry(ty).or_default();
            match (subscribers.binary_search(&i), interested) {
                (Err(pos), true) => subscribers.insert(pos, i),
                (Ok(pos), false) => {
                    subscribers.remove(pos);
                }
                _ => {}
            }
        }
        debug!(module = %module, owner = %owner, interested, "Subscriptions updated");
        Ok(())
    }

    /// Loaded subscribers of `event_type`, in registration order.
    pub fn subscribers(&self, event_type: &EventType) -> Vec<String> {
        let state = self.state.lock();
        state
            .subscribers
            .get(event_type)
            .into_iter()
            .flatten()
            .map(|&i| state.entries[i].name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleDefinition;
    use parking_lot::Mutex;
    use quill_core::ContentKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(name: &str, counter: &Arc<AtomicUsize>) -> ModuleDefinition {
        let counter = Arc::clone(counter);
        ModuleDefinition::builder(name)
            .on_event(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
    }

    #[test]
    fn test_define_event_is_idempotent() {
        let kernel = Kernel::new();
        kernel.register(ModuleDefinition::builder("m").build()).unwrap();
        let spec = EventSpec::new("ping").content(ContentKind::String);
        let ty = kernel.define_event("m", spec.clone()).unwrap();
        assert_eq!(ty.to_string(), "m.events.ping");
        assert_eq!(kernel.define_event("m", spec), Ok(ty.clone()));
        assert_eq!(
            kernel.define_event("m", EventSpec::new("ping").content(ContentKind::Number)),
            Err(KernelError::DuplicateDefinition("m.events.ping".into()))
        );
        assert_eq!(
            kernel.define_event("ghost", EventSpec::new("ping")),
            Err(KernelError::UnknownModule("ghost".into()))
        );
    }

    #[test]
    fn test_create_event_checks_definition() {
        let kernel = Kernel::new();
        kernel
            .register(
                ModuleDefinition::builder("m")
                    .define_event(EventSpec::new("count").content(ContentKind::Number))
                    .build(),
            )
            .unwrap();
        let ty = EventType::new("m", "count");
        assert!(
            kernel
                .create_event("m", &ty, json!(3), EventContext::default())
                .is_ok()
        );
        assert_eq!(
            kernel
                .create_event("m", &ty, json!("three"), EventContext::default())
                .err(),
            Some(KernelError::ContentMismatch {
                event: "m.events.count".into(),
                expected: "number",
                got: "string",
            })
        );
        assert_eq!(
            kernel
                .create_event("m", &EventType::new("m", "nope"), json!(null), EventContext::default())
                .err(),
            Some(KernelError::UndefinedEvent("m.events.nope".into()))
        );
    }

    #[test]
    fn test_broadcast_respects_allow_list() {
        let kernel = Kernel::new();
        let listener = Arc::new(AtomicUsize::new(0));
        let explicit_false = Arc::new(AtomicUsize::new(0));
        let unrelated = Arc::new(AtomicUsize::new(0));

        kernel
            .register(
                ModuleDefinition::builder("m")
                    .define_event(EventSpec::new("ping"))
                    .build(),
            )
            .unwrap();
        for (name, counter) in [("listener", &listener), ("muted", &explicit_false)] {
            let counter = Arc::clone(counter);
            kernel
                .register(
                    ModuleDefinition::builder(name)
                        .subscribe("m", ["ping"])
                        .on_event(move |_, _| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                        .build(),
                )
                .unwrap();
        }
        kernel.register(counting("unrelated", &unrelated)).unwrap();
        kernel.load_all();

        kernel
            .context("muted")
            .unsubscribe("m", ["ping"])
            .unwrap();

        let event = kernel.context("m").event("ping", Value::Null).unwrap();
        assert_eq!(kernel.broadcast(&event), Ok(1));
        assert_eq!(listener.load(Ordering::SeqCst), 1);
        assert_eq!(explicit_false.load(Ordering::SeqCst), 0);
        assert_eq!(unrelated.load(Ordering::SeqCst), 0);
        assert_eq!(kernel.subscribers(event.event_type()), vec!["listener"]);
    }

    #[test]
    fn test_send_targets_one_subscriber() {
        let kernel = Kernel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = Arc::clone(&seen);
        kernel
            .register(
                ModuleDefinition::builder("m")
                    .define_event(EventSpec::new("ping"))
                    .build(),
            )
            .unwrap();
        kernel
            .register(
                ModuleDefinition::builder("n")
                    .subscribe("m", ["ping"])
                    .on_event(move |_, event| seen_in_handler.lock().push(event.is_broadcast()))
                    .build(),
            )
            .unwrap();
        kernel.load_all();

        let event = kernel.context("m").event("ping", Value::Null).unwrap();
        assert_eq!(kernel.send("n", &event), Ok(true));
        assert_eq!(kernel.send("m", &event), Ok(false));
        assert_eq!(
            kernel.send("ghost", &event),
            Err(KernelError::UnknownModule("ghost".into()))
        );
        assert_eq!(kernel.broadcast(&event), Ok(1));
        assert_eq!(*seen.lock(), vec![false, true]);
    }

    #[test]
    fn test_handlers_may_reenter_the_kernel() {
        let kernel = Kernel::new();
        let relayed = Arc::new(AtomicUsize::new(0));
        kernel
            .register(
                ModuleDefinition::builder("src")
                    .define_event(EventSpec::new("ping"))
                    .build(),
            )
            .unwrap();
        kernel
            .register(
                ModuleDefinition::builder("relay")
                    .define_event(EventSpec::new("pong"))
                    .subscribe("src", ["ping"])
                    .on_event(|ctx, _| {
                        let pong = ctx.event("pong", Value::Null).unwrap();
                        ctx.broadcast(&pong).unwrap();
                    })
                    .build(),
            )
            .unwrap();
        kernel.register(counting("sink", &relayed)).unwrap();
        kernel
            .set_subscriptions("sink", "relay", ["pong"], true)
            .unwrap();
        kernel.load_all();

        let ping = kernel.context("src").event("ping", Value::Null).unwrap();
        assert_eq!(kernel.broadcast(&ping), Ok(1));
        assert_eq!(relayed.load(Ordering::SeqCst), 1);
    }
}
