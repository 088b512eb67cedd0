//! Named options with global and session-local values.
//!
//! Options are declared with a type (through their default value), an
//! optional abbreviation and a scope. Global listeners fire after a global
//! value actually changes, outside the store's lock, so a listener may read
//! or write options itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::session::SessionId;

/// Option value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OptionValue {
    Toggle(bool),
    Number(i64),
    String(String),
}

impl OptionValue {
    fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Toggle(_) => "toggle",
            OptionValue::Number(_) => "number",
            OptionValue::String(_) => "string",
        }
    }

    fn same_type(&self, other: &OptionValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Toggle(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            OptionValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Toggle(b) => write!(f, "{}", b),
            OptionValue::Number(n) => write!(f, "{}", n),
            OptionValue::String(s) => f.write_str(s),
        }
    }
}

/// Where an option's value may live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptionScope {
    /// One value for every session
    Global,
    /// Sessions may override the global value
    Local,
}

/// Which value to read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    /// The session's own value if it has one, else the global value
    Effective(SessionId),
}

/// Declaration of one option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDef {
    pub name: String,
    pub abbrev: Option<String>,
    pub scope: OptionScope,
    pub default: OptionValue,
}

impl OptionDef {
    pub fn new(name: impl Into<String>, scope: OptionScope, default: OptionValue) -> Self {
        Self {
            name: name.into(),
            abbrev: None,
            scope,
            default,
        }
    }

    pub fn with_abbrev(mut self, abbrev: impl Into<String>) -> Self {
        let abbrev = abbrev.into();
        if abbrev != self.name {
            self.abbrev = Some(abbrev);
        }
        self
    }
}

/// A change delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionChange {
    pub name: String,
    pub old: OptionValue,
    pub new: OptionValue,
}

pub type OptionListener = Arc<dyn Fn(&OptionChange) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    #[error("unknown option: {0}")]
    Unknown(String),

    #[error("option {name} expects a {expected} value")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("option {0} is already defined")]
    AlreadyDefined(String),
}

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
struct StoreInner {
    defs: HashMap<String, OptionDef>,
    abbrevs: HashMap<String, String>,
    global: HashMap<String, OptionValue>,
    local: HashMap<(SessionId, String), OptionValue>,
    listeners: HashMap<String, Vec<OptionListener>>,
}

impl StoreInner {
    fn canonical(&self, name: &str) -> Option<String> {
        if self.defs.contains_key(name) {
            return Some(name.to_string());
        }
        self.abbrevs.get(name).cloned()
    }

    fn def(&self, name: &str) -> Result<&OptionDef, OptionError> {
        self.canonical(name)
            .and_then(|canonical| self.defs.get(&canonical))
            .ok_or_else(|| OptionError::Unknown(name.to_string()))
    }
}

/// Thread-safe option storage shared by every session of an engine
#[derive(Default)]
pub struct OptionStore {
    inner: RwLock<StoreInner>,
}

impl fmt::Debug for OptionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("OptionStore")
            .field("defs", &inner.defs.len())
            .field("global", &inner.global)
            .finish()
    }
}

impl OptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the engine's builtin options declared
    pub fn with_builtins() -> Self {
        let store = Self::new();
        let builtins = [
            OptionDef::new("timeout", OptionScope::Global, OptionValue::Toggle(true))
                .with_abbrev("to"),
            OptionDef::new("timeoutlen", OptionScope::Global, OptionValue::Number(1000))
                .with_abbrev("tm"),
            OptionDef::new("maxmapdepth", OptionScope::Global, OptionValue::Number(1000))
                .with_abbrev("mmd"),
            OptionDef::new("wrapscan", OptionScope::Local, OptionValue::Toggle(true))
                .with_abbrev("ws"),
            OptionDef::new("ignorecase", OptionScope::Local, OptionValue::Toggle(false))
                .with_abbrev("ic"),
        ];
        for def in builtins {
            // Fresh store, names are unique
            let _ = store.define(def);
        }
        store
    }

    pub fn define(&self, def: OptionDef) -> Result<(), OptionError> {
        let mut inner = self.inner.write();
        if inner.canonical(&def.name).is_some() {
            return Err(OptionError::AlreadyDefined(def.name));
        }
        if let Some(abbrev) = &def.abbrev {
            if inner.canonical(abbrev).is_some() {
                return Err(OptionError::AlreadyDefined(abbrev.clone()));
            }
            inner.abbrevs.insert(abbrev.clone(), def.name.clone());
        }
        debug!(name = %def.name, "defined option");
        inner.defs.insert(def.name.clone(), def);
        Ok(())
    }

    /// Remove an option with its values and listeners
    pub fn undefine(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(canonical) = inner.canonical(name) else {
            return false;
        };
        inner.defs.remove(&canonical);
        inner.abbrevs.retain(|_, full| full != &canonical);
        inner.global.remove(&canonical);
        inner.local.retain(|(_, n), _| n != &canonical);
        inner.listeners.remove(&canonical);
        true
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.inner.read().canonical(name).is_some()
    }

    /// Full name for a name or abbreviation
    pub fn canonical_name(&self, name: &str) -> Option<String> {
        self.inner.read().canonical(name)
    }

    pub fn get(&self, name: &str, scope: Scope) -> Result<OptionValue, OptionError> {
        let inner = self.inner.read();
        let def = inner.def(name)?;
        if let Scope::Effective(session) = scope {
            if let Some(value) = inner.local.get(&(session, def.name.clone())) {
                return Ok(value.clone());
            }
        }
        Ok(inner
            .global
            .get(&def.name)
            .cloned()
            .unwrap_or_else(|| def.default.clone()))
    }

    /// Set a value. A session-scoped write to a global option writes the
    /// global value.
    pub fn set(&self, name: &str, value: OptionValue, scope: Scope) -> Result<(), OptionError> {
        let notify = {
            let mut inner = self.inner.write();
            let def = inner.def(name)?;
            if !def.default.same_type(&value) {
                return Err(OptionError::TypeMismatch {
                    name: def.name.clone(),
                    expected: def.default.type_name(),
                });
            }
            let canonical = def.name.clone();
            let default = def.default.clone();
            let declared = def.scope;

            match (scope, declared) {
                (Scope::Effective(session), OptionScope::Local) => {
                    inner.local.insert((session, canonical), value);
                    None
                }
                _ => {
                    let old = inner
                        .global
                        .insert(canonical.clone(), value.clone())
                        .unwrap_or(default);
                    if old == value {
                        None
                    } else {
                        let listeners = inner.listeners.get(&canonical).cloned().unwrap_or_default();
                        Some((
                            OptionChange {
                                name: canonical,
                                old,
                                new: value,
                            },
                            listeners,
                        ))
                    }
                }
            }
        };

        if let Some((change, listeners)) = notify {
            debug!(name = %change.name, old = %change.old, new = %change.new, "option changed");
            for listener in listeners {
                listener(&change);
            }
        }
        Ok(())
    }

    /// Restore the default value
    pub fn reset(&self, name: &str, scope: Scope) -> Result<(), OptionError> {
        let default = self.inner.read().def(name)?.default.clone();
        if let Scope::Effective(session) = scope {
            let mut inner = self.inner.write();
            let canonical = inner.def(name)?.name.clone();
            if inner.local.remove(&(session, canonical)).is_some() {
                return Ok(());
            }
        }
        self.set(name, default, Scope::Global)
    }

    /// Invert a toggle option, returning the new value
    pub fn invert(&self, name: &str, scope: Scope) -> Result<bool, OptionError> {
        let current = self.get(name, scope)?;
        let Some(current) = current.as_bool() else {
            return Err(OptionError::TypeMismatch {
                name: name.to_string(),
                expected: "toggle",
            });
        };
        self.set(name, OptionValue::Toggle(!current), scope)?;
        Ok(!current)
    }

    /// Value of a toggle option, false when unknown
    pub fn is_set(&self, name: &str, scope: Scope) -> bool {
        self.get(name, scope)
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn number(&self, name: &str, scope: Scope) -> Option<i64> {
        self.get(name, scope).ok().and_then(|v| v.as_number())
    }

    /// Parse `raw` as a value for `name` (`:set name=raw`)
    pub fn parse_value(&self, name: &str, raw: &str) -> Result<OptionValue, OptionError> {
        let inner = self.inner.read();
        let def = inner.def(name)?;
        let invalid = || OptionError::InvalidValue {
            name: def.name.clone(),
            value: raw.to_string(),
        };
        match def.default {
            OptionValue::Toggle(_) => Err(OptionError::TypeMismatch {
                name: def.name.clone(),
                expected: "toggle",
            }),
            OptionValue::Number(_) => raw
                .trim()
                .parse::<i64>()
                .map(OptionValue::Number)
                .map_err(|_| invalid()),
            OptionValue::String(_) => Ok(OptionValue::String(raw.to_string())),
        }
    }

    /// Call `listener` after every change of the option's global value
    pub fn add_global_listener(&self, name: &str, listener: OptionListener) -> Result<(), OptionError> {
        let mut inner = self.inner.write();
        let canonical = inner
            .canonical(name)
            .ok_or_else(|| OptionError::Unknown(name.to_string()))?;
        inner.listeners.entry(canonical).or_default().push(listener);
        Ok(())
    }

    /// Drop every session-local value of `session`
    pub fn clear_session(&self, session: SessionId) {
        self.inner.write().local.retain(|(id, _), _| *id != session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_builtin_defaults_and_abbrevs() {
        let store = OptionStore::with_builtins();
        assert_eq!(store.number("timeoutlen", Scope::Global), Some(1000));
        assert_eq!(store.number("tm", Scope::Global), Some(1000));
        assert!(store.is_set("ws", Scope::Global));
        assert!(!store.is_set("ignorecase", Scope::Global));
        assert_eq!(store.canonical_name("mmd").as_deref(), Some("maxmapdepth"));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let store = OptionStore::with_builtins();
        let err = store
            .set("timeout", OptionValue::Number(3), Scope::Global)
            .unwrap_err();
        assert!(matches!(err, OptionError::TypeMismatch { .. }));
    }

    #[test]
    fn test_unknown_option() {
        let store = OptionStore::with_builtins();
        assert_eq!(
            store.get("nosuch", Scope::Global),
            Err(OptionError::Unknown("nosuch".into()))
        );
    }

    #[test]
    fn test_local_value_overrides_global() {
        let store = OptionStore::with_builtins();
        let session = SessionId::new();
        store
            .set("ignorecase", OptionValue::Toggle(true), Scope::Effective(session))
            .unwrap();
        assert!(store.is_set("ic", Scope::Effective(session)));
        assert!(!store.is_set("ic", Scope::Global));
        assert!(!store.is_set("ic", Scope::Effective(SessionId::new())));

        store.clear_session(session);
        assert!(!store.is_set("ic", Scope::Effective(session)));
    }

    #[test]
    fn test_listener_fires_only_on_change() {
        let store = OptionStore::new();
        store
            .define(OptionDef::new("demo", OptionScope::Global, OptionValue::Toggle(false)))
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        store
            .add_global_listener(
                "demo",
                Arc::new(move |_change: &OptionChange| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        store.set("demo", OptionValue::Toggle(false), Scope::Global).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        store.set("demo", OptionValue::Toggle(true), Scope::Global).unwrap();
        store.set("demo", OptionValue::Toggle(true), Scope::Global).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!store.invert("demo", Scope::Global).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_may_reenter_store() {
        let store = Arc::new(OptionStore::new());
        store
            .define(OptionDef::new("a", OptionScope::Global, OptionValue::Toggle(false)))
            .unwrap();
        store
            .define(OptionDef::new("b", OptionScope::Global, OptionValue::Toggle(false)))
            .unwrap();
        let weak = Arc::downgrade(&store);
        store
            .add_global_listener(
                "a",
                Arc::new(move |change: &OptionChange| {
                    if let Some(store) = weak.upgrade() {
                        store.set("b", change.new.clone(), Scope::Global).unwrap();
                    }
                }),
            )
            .unwrap();
        store.set("a", OptionValue::Toggle(true), Scope::Global).unwrap();
        assert!(store.is_set("b", Scope::Global));
    }

    #[test]
    fn test_undefine_removes_everything() {
        let store = OptionStore::new();
        store
            .define(
                OptionDef::new("NERDTree", OptionScope::Global, OptionValue::Toggle(false))
                    .with_abbrev("nerdtree"),
            )
            .unwrap();
        assert!(store.is_defined("nerdtree"));
        assert!(store.undefine("nerdtree"));
        assert!(!store.is_defined("NERDTree"));
        assert!(!store.undefine("NERDTree"));
    }

    #[test]
    fn test_parse_value() {
        let store = OptionStore::with_builtins();
        assert_eq!(store.parse_value("tm", "250"), Ok(OptionValue::Number(250)));
        assert!(matches!(
            store.parse_value("tm", "soon"),
            Err(OptionError::InvalidValue { .. })
        ));
    }
}
