//! Command lookup keyed by mode and key sequence

use std::sync::Arc;

use tracing::debug;

use crate::key::Key;
use crate::mapping::MappingOwner;
use crate::mode::{MappingModes, ModeIndex, PrefixLookup};

use super::CommandSpec;

/// Result of looking up typed keys
#[derive(Debug, Clone)]
pub enum CommandLookup {
    /// No command starts with these keys
    None,
    /// A longer command starts with these keys
    Prefix,
    Exact(Arc<CommandSpec>),
    /// A command matches, and a longer one starts with these keys
    Ambiguous(Arc<CommandSpec>),
}

/// Registry of every command the dispatcher can run
#[derive(Debug, Default)]
pub struct CommandRegistry {
    index: ModeIndex<CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the builtin command set
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for spec in super::defaults::builtin_commands() {
            registry.register(spec);
        }
        registry
    }

    /// Register a command for each of its modes, replacing existing entries
    pub fn register(&mut self, spec: CommandSpec) {
        let spec = Arc::new(spec);
        for tag in spec.modes.tags() {
            self.index.insert(tag, spec.keys.clone(), spec.clone());
        }
    }

    pub fn lookup(&self, mode: MappingModes, keys: &[Key]) -> CommandLookup {
        match self.index.lookup(mode, keys) {
            PrefixLookup::None => CommandLookup::None,
            PrefixLookup::Prefix => CommandLookup::Prefix,
            PrefixLookup::Exact(spec) => CommandLookup::Exact(spec),
            PrefixLookup::Ambiguous(spec) => CommandLookup::Ambiguous(spec),
        }
    }

    pub fn get(&self, mode: MappingModes, keys: &[Key]) -> Option<Arc<CommandSpec>> {
        self.index.get(mode, keys).cloned()
    }

    /// Longest registered command that is a prefix of `keys`
    pub fn longest_prefix(&self, mode: MappingModes, keys: &[Key]) -> Option<(usize, Arc<CommandSpec>)> {
        self.index.longest_prefix(mode, keys)
    }

    /// Remove every command registered by `owner`
    pub fn remove_owner(&mut self, owner: &MappingOwner) -> usize {
        let removed = self.index.retain(|spec| &spec.owner != owner);
        if removed > 0 {
            debug!(?owner, removed, "removed commands");
        }
        removed
    }

    pub fn by_owner(&self, owner: &MappingOwner) -> Vec<Arc<CommandSpec>> {
        let mut specs: Vec<Arc<CommandSpec>> = Vec::new();
        for spec in self.index.values() {
            if &spec.owner == owner && !specs.iter().any(|s| Arc::ptr_eq(s, spec)) {
                specs.push(spec.clone());
            }
        }
        specs
    }
}
