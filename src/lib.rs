//! modekey - a modal key-resolution engine for vi-style editors
//!
//! The engine turns key input into commands: it expands mappings, tracks
//! the editing mode, composes operators with motions and runs extension
//! handlers. Text itself lives in the host editor behind [`EditorHost`];
//! [`StringBuffer`] is an in-memory host for tests and the CLI.

#![deny(warnings)]

pub mod buffer;
pub mod command;
pub mod composer;
pub mod context;
pub mod delayed;
pub mod event_log;
pub mod extension;
pub mod host;
pub mod jumplist;
pub mod key;
pub mod logging;
pub mod mapping;
pub mod mode;
pub mod motion;
pub mod options;
pub mod repeat;
pub mod script;
pub mod search;
pub mod session;

pub use buffer::StringBuffer;
pub use context::{EngineContext, Value};
pub use host::EditorHost;
pub use key::{Key, KeySequence};
pub use mode::{MappingModes, Mode};
pub use session::{EngineError, Feedback, Session, SessionId};
