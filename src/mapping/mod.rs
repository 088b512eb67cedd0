//! Key mappings: mode-scoped rewrites of one key sequence into another key
//! sequence or an extension handler.

mod table;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::extension::HandlerRef;
use crate::key::KeySequence;
use crate::mode::MappingModes;

pub use table::{MappingTable, Resolution};

/// Who installed a mapping. Bulk removal goes by owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum MappingOwner {
    User,
    Plugin(String),
}

impl fmt::Display for MappingOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingOwner::User => f.write_str("user"),
            MappingOwner::Plugin(name) => write!(f, "plugin {}", name),
        }
    }
}

/// Right-hand side of a mapping
#[derive(Debug, Clone, PartialEq)]
pub enum MappingTarget {
    Keys(KeySequence),
    Handler(HandlerRef),
}

impl fmt::Display for MappingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingTarget::Keys(keys) => write!(f, "{}", keys),
            MappingTarget::Handler(handler) => write!(f, "<handler {}>", handler.name()),
        }
    }
}

/// One mapping rule
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub from: KeySequence,
    pub target: MappingTarget,
    modes: MappingModes,
    pub owner: MappingOwner,
    pub recursive: bool,
}

impl Mapping {
    /// Build a mapping. The key sequence and mode set must be non-empty.
    pub fn new(
        from: KeySequence,
        target: MappingTarget,
        modes: MappingModes,
        owner: MappingOwner,
        recursive: bool,
    ) -> Result<Self, MappingError> {
        if modes.is_empty() {
            return Err(MappingError::EmptyModes(from.to_string()));
        }
        if from.is_empty() {
            return Err(MappingError::EmptyKeys);
        }
        Ok(Self {
            from,
            target,
            modes,
            owner,
            recursive,
        })
    }

    /// Modes the mapping is installed in; never empty
    pub fn modes(&self) -> MappingModes {
        self.modes
    }

    /// Key target, if this mapping rewrites to keys
    pub fn keys(&self) -> Option<&KeySequence> {
        match &self.target {
            MappingTarget::Keys(keys) => Some(keys),
            MappingTarget::Handler(_) => None,
        }
    }
}

/// Mapping table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("mapping for {0} has no modes")]
    EmptyModes(String),

    #[error("mapping has an empty left-hand side")]
    EmptyKeys,

    #[error("recursive mapping {keys} exceeds depth {depth}")]
    MappingCycle { keys: String, depth: usize },

    #[error("no such mapping: {0}")]
    NotFound(String),
}
