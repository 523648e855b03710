//! Event identities, definitions, and instances.
//!
//! Every event belongs to exactly one owning module. Its identity is the flat
//! string `<owner>.events.<local>`, and every instance carries the parsed
//! `(owner, local)` pair as its [`split_type`](Event::split_type) so receivers
//! can route on it without re-parsing:
//!
//! ```rust,ignore
//! fn on_event(&self, _ctx: &ModuleContext, event: &Event) {
//!     match event.split_type() {
//!         ("core.promo", "promote") => self.promote(event.content()),
//!         ("core.promo", "demote") => self.demote(event.content()),
//!         _ => {}
//!     }
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KernelError, KernelResult};

/// Separator between the owner namespace and the local name.
pub const EVENTS_SEPARATOR: &str = ".events.";

// ============================================================================
// Event Identity
// ============================================================================

/// The fully-qualified identity of an event: `<owner>.events.<local>`.
///
/// Local names may themselves contain dots, so
/// `core.keybinds.events.core.promo.promote` splits into
/// `("core.keybinds", "core.promo.promote")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType {
    owner: String,
    local: String,
}

impl EventType {
    /// Builds an identity from its parts.
    pub fn new(owner: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            local: local.into(),
        }
    }

    /// The owning module's namespace.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The name local to the owner.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// The `(owner, local)` pair.
    pub fn split(&self) -> (&str, &str) {
        (&self.owner, &self.local)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.owner, EVENTS_SEPARATOR, self.local)
    }
}

impl FromStr for EventType {
    type Err = KernelError;

    fn from_str(s: &str) -> KernelResult<Self> {
        match s.split_once(EVENTS_SEPARATOR) {
            Some((owner, local)) if !owner.is_empty() && !local.is_empty() => {
                Ok(Self::new(owner, local))
            }
            _ => Err(KernelError::InvalidEventType(s.to_string())),
        }
    }
}

// ============================================================================
// Content Kinds
// ============================================================================

/// The shape of content an event definition accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Any JSON value.
    #[default]
    Any,
    /// No payload.
    Null,
    /// A boolean.
    Bool,
    /// A number.
    Number,
    /// A string.
    String,
    /// An array.
    Array,
    /// An object.
    Object,
}

impl ContentKind {
    /// The kind of a concrete value (never [`ContentKind::Any`]).
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Returns `true` if `value` satisfies this kind.
    pub fn accepts(self, value: &Value) -> bool {
        self == Self::Any || self == Self::of(value)
    }

    /// Lowercase name used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

// ============================================================================
// Event Definitions
// ============================================================================

/// Declaration of one event a module owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    local: String,
    content: ContentKind,
    description: Option<String>,
}

impl EventSpec {
    /// Declares an event with the given local name and [`ContentKind::Any`] content.
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            content: ContentKind::Any,
            description: None,
        }
    }

    /// Restricts the content this event carries.
    pub fn content(mut self, kind: ContentKind) -> Self {
        self.content = kind;
        self
    }

    /// Attaches a human-readable description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// The local name.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// The declared content kind.
    pub fn content_kind(&self) -> ContentKind {
        self.content
    }

    /// The description, if any.
    pub fn describe(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Two specs describe the same identity shape when their content kinds agree.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.local == other.local && self.content == other.content
    }

    /// Checks `content` against the declared kind.
    pub fn check_content(&self, event: &EventType, content: &Value) -> KernelResult<()> {
        if self.content.accepts(content) {
            Ok(())
        } else {
            Err(KernelError::ContentMismatch {
                event: event.to_string(),
                expected: self.content.as_str(),
                got: ContentKind::of(content).as_str(),
            })
        }
    }
}

// ============================================================================
// Host Context
// ============================================================================

/// Where in the host editor an event happened.
///
/// Filled in by whichever module adapts host signals into events; the kernel
/// never inspects it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    /// Host buffer handle.
    pub buffer: Option<u64>,
    /// Host window handle.
    pub window: Option<u64>,
    /// File backing the buffer.
    pub filename: Option<PathBuf>,
    /// `(line, column)` of the cursor.
    pub cursor: Option<(usize, usize)>,
    /// Text of the cursor line.
    pub line_content: Option<String>,
    /// Host editing mode (`"n"`, `"i"`, ...).
    pub mode: Option<String>,
}

impl EventContext {
    /// Context bound to a buffer.
    pub fn for_buffer(buffer: u64) -> Self {
        Self {
            buffer: Some(buffer),
            ..Default::default()
        }
    }

    /// Sets the window handle.
    pub fn window(mut self, window: u64) -> Self {
        self.window = Some(window);
        self
    }

    /// Sets the file name.
    pub fn filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.filename = Some(path.into());
        self
    }

    /// Sets the cursor position.
    pub fn cursor(mut self, line: usize, column: usize) -> Self {
        self.cursor = Some((line, column));
        self
    }

    /// Sets the cursor line text.
    pub fn line_content(mut self, text: impl Into<String>) -> Self {
        self.line_content = Some(text.into());
        self
    }

    /// Sets the editing mode.
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

// ============================================================================
// Event Instances
// ============================================================================

/// One event instance travelling over the bus.
///
/// Instances are created by the kernel (which validates the identity and the
/// content shape), never assembled by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: EventType,
    referrer: String,
    content: Value,
    context: EventContext,
    broadcast: bool,
}

impl Event {
    /// The fully-qualified identity.
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// The `(owner, local)` pair receivers match on.
    pub fn split_type(&self) -> (&str, &str) {
        self.event_type.split()
    }

    /// The module that created the event.
    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    /// The payload.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Deserialises the payload into `T`.
    pub fn content_as<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.content)
    }

    /// The host context.
    pub fn context(&self) -> &EventContext {
        &self.context
    }

    /// `true` when delivered by a broadcast, `false` when sent to one recipient.
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }
}

// ─── Internal constructors (used by the kernel) ──────────────────────────────

impl Event {
    /// Creates an event directly. Only called by the kernel after validation.
    #[doc(hidden)]
    pub fn __new(
        event_type: EventType,
        referrer: impl Into<String>,
        content: Value,
        context: EventContext,
    ) -> Self {
        Event {
            event_type,
            referrer: referrer.into(),
            content,
            context,
            broadcast: true,
        }
    }

    /// Returns a copy marked as broadcast or directly sent.
    #[doc(hidden)]
    pub fn __delivered_as(&self, broadcast: bool) -> Self {
        Event {
            broadcast,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_display_and_parse() {
        let ty = EventType::new("core.keybinds", "core.promo.promote");
        let flat = ty.to_string();
        assert_eq!(flat, "core.keybinds.events.core.promo.promote");
        assert_eq!(flat.parse::<EventType>().unwrap(), ty);
        assert_eq!(ty.split(), ("core.keybinds", "core.promo.promote"));
    }

    #[test]
    fn test_event_type_rejects_malformed() {
        assert!("core.keybinds".parse::<EventType>().is_err());
        assert!(".events.ping".parse::<EventType>().is_err());
        assert!("core.events.".parse::<EventType>().is_err());
    }

    #[test]
    fn test_content_kind_accepts() {
        assert!(ContentKind::Any.accepts(&json!([1, 2])));
        assert!(ContentKind::Object.accepts(&json!({"a": 1})));
        assert!(!ContentKind::Object.accepts(&json!("a")));
        assert_eq!(ContentKind::of(&Value::Null), ContentKind::Null);
    }

    #[test]
    fn test_spec_checks_content() {
        let ty = EventType::new("m", "ping");
        let spec = EventSpec::new("ping").content(ContentKind::Number);
        assert!(spec.check_content(&ty, &json!(3)).is_ok());
        let err = spec.check_content(&ty, &json!("x")).unwrap_err();
        assert!(matches!(
            err,
            KernelError::ContentMismatch {
                expected: "number",
                got: "string",
                ..
            }
        ));
    }

    #[test]
    fn test_spec_compatibility_ignores_description() {
        let a = EventSpec::new("ping").description("first");
        let b = EventSpec::new("ping").description("second");
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&EventSpec::new("ping").content(ContentKind::Null)));
    }

    #[test]
    fn test_event_accessors() {
        let event = Event::__new(
            EventType::new("m", "ping"),
            "n",
            json!({"count": 2}),
            EventContext::for_buffer(4).cursor(1, 0),
        );
        assert_eq!(event.split_type(), ("m", "ping"));
        assert_eq!(event.referrer(), "n");
        assert_eq!(event.context().buffer, Some(4));
        assert!(event.is_broadcast());
        assert!(!event.__delivered_as(false).is_broadcast());

        #[derive(serde::Deserialize)]
        struct Payload {
            count: u32,
        }
        assert_eq!(event.content_as::<Payload>().unwrap().count, 2);
    }
}
