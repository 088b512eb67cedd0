//! Shared engine state.
//!
//! One [`EngineContext`] backs any number of sessions: the mapping table,
//! command registry, options, variables and extension registry live here.
//! Cloning the context is cheap.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::command::CommandRegistry;
use crate::extension::{ExtensionDescriptor, ExtensionRegistrar};
use crate::mapping::{MappingOwner, MappingTable};
use crate::options::OptionStore;
use crate::session::Session;

/// Script variable value (`let g:name = ...`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(i64),
    String(String),
}

impl Value {
    /// Script truthiness: non-zero numbers and strings that parse as
    /// non-zero numbers
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0,
            Value::String(s) => s.trim().parse::<i64>().map(|n| n != 0).unwrap_or(false),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
        }
    }
}

pub(crate) struct ContextInner {
    mappings: RwLock<MappingTable>,
    commands: RwLock<CommandRegistry>,
    options: OptionStore,
    variables: RwLock<HashMap<String, Value>>,
    extensions: ExtensionRegistrar,
    config_depth: AtomicUsize,
}

/// Handle to the shared engine state
#[derive(Clone)]
pub struct EngineContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("options", &self.inner.options)
            .field("config_depth", &self.inner.config_depth.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope-qualified variable name; bare names are global
fn qualified(name: &str) -> String {
    if name.len() > 1 && name.as_bytes()[1] == b':' {
        name.to_string()
    } else {
        format!("g:{}", name)
    }
}

impl EngineContext {
    /// Context with the builtin commands and options
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                mappings: RwLock::new(MappingTable::new()),
                commands: RwLock::new(CommandRegistry::with_defaults()),
                options: OptionStore::with_builtins(),
                variables: RwLock::new(HashMap::new()),
                extensions: ExtensionRegistrar::default(),
                config_depth: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ContextInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn extensions(&self) -> &ExtensionRegistrar {
        &self.inner.extensions
    }

    /// New session on this engine
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    // ========================================================================
    // Tables
    // ========================================================================

    pub fn mappings(&self) -> RwLockReadGuard<'_, MappingTable> {
        self.inner.mappings.read()
    }

    pub fn mappings_mut(&self) -> RwLockWriteGuard<'_, MappingTable> {
        self.inner.mappings.write()
    }

    pub fn commands(&self) -> RwLockReadGuard<'_, CommandRegistry> {
        self.inner.commands.read()
    }

    pub fn commands_mut(&self) -> RwLockWriteGuard<'_, CommandRegistry> {
        self.inner.commands.write()
    }

    pub fn options(&self) -> &OptionStore {
        &self.inner.options
    }

    /// Remove every mapping and command installed by `owner`
    pub fn remove_owner(&self, owner: &MappingOwner) -> (usize, usize) {
        let mappings = self.mappings_mut().remove_owner(owner);
        let commands = self.commands_mut().remove_owner(owner);
        (mappings, commands)
    }

    // ========================================================================
    // Variables
    // ========================================================================

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.inner.variables.read().get(&qualified(name)).cloned()
    }

    pub fn set_variable(&self, name: &str, value: Value) {
        self.inner.variables.write().insert(qualified(name), value);
    }

    pub fn remove_variable(&self, name: &str) -> bool {
        self.inner.variables.write().remove(&qualified(name)).is_some()
    }

    // ========================================================================
    // Configuration scripts
    // ========================================================================

    pub fn is_executing_config(&self) -> bool {
        self.inner.config_depth.load(Ordering::SeqCst) > 0
    }

    /// Mark a configuration script as running until the guard drops
    pub fn begin_config(&self) -> ConfigGuard {
        self.inner.config_depth.fetch_add(1, Ordering::SeqCst);
        ConfigGuard {
            context: self.clone(),
        }
    }

    // ========================================================================
    // Extensions
    // ========================================================================

    /// Register an extension. Returns false if the name is taken.
    pub fn register_extension(&self, descriptor: ExtensionDescriptor) -> bool {
        self.inner.extensions.register(self, descriptor)
    }

    /// Dispose and forget an extension
    pub fn unregister_extension(&self, name: &str) -> bool {
        self.inner.extensions.unregister(self, name)
    }

    /// Enable the extension registered under `alias` (or by that name)
    pub fn activate_extension(&self, alias: &str) -> bool {
        self.inner.extensions.activate_by_alias(self, alias)
    }

    pub fn extension_name_by_alias(&self, alias: &str) -> Option<String> {
        self.inner.extensions.name_by_alias(alias)
    }

    pub fn is_extension_registered(&self, name: &str) -> bool {
        self.inner.extensions.is_registered(name)
    }

    pub fn is_extension_initialized(&self, name: &str) -> bool {
        self.inner.extensions.is_initialized(name)
    }

    /// Run initializations deferred while a configuration script ran
    pub fn flush_deferred_extensions(&self) {
        self.inner.extensions.flush_deferred(self);
    }
}

/// Holds the configuration-running flag
#[must_use]
pub struct ConfigGuard {
    context: EngineContext,
}

impl Drop for ConfigGuard {
    fn drop(&mut self) {
        self.context.inner.config_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_variable_names_are_global() {
        let ctx = EngineContext::new();
        ctx.set_variable("exchange_no_mappings", Value::Number(1));
        assert_eq!(ctx.variable("g:exchange_no_mappings"), Some(Value::Number(1)));
        assert!(ctx.remove_variable("g:exchange_no_mappings"));
        assert!(ctx.variable("exchange_no_mappings").is_none());
    }

    #[test]
    fn test_config_guard_nests() {
        let ctx = EngineContext::new();
        assert!(!ctx.is_executing_config());
        let outer = ctx.begin_config();
        let inner = ctx.begin_config();
        drop(inner);
        assert!(ctx.is_executing_config());
        drop(outer);
        assert!(!ctx.is_executing_config());
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Number(2).is_truthy());
        assert!(!Value::Number(0).is_truthy());
        assert!(Value::String("1".into()).is_truthy());
        assert!(!Value::String("yes".into()).is_truthy());
    }
}
