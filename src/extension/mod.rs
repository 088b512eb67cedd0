//! Extension plugin API.
//!
//! An extension is a named unit that, once enabled, installs mappings and
//! handlers. Every extension gets a toggle option with its own name; setting
//! it initializes the extension (or defers that until the configuration
//! script finishes) and clearing it disposes the extension and removes
//! everything it installed.

mod registrar;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::command::CommandSpec;
use crate::context::{EngineContext, Value};
use crate::delayed::Continuation;
use crate::host::{EditorHost, HostError};
use crate::key::{KeyParseError, KeySequence};
use crate::mapping::{Mapping, MappingError, MappingOwner, MappingTarget};
use crate::mode::{MappingModes, Mode, SelectionType};
use crate::options::{OptionValue, Scope};

pub(crate) use registrar::ExtensionRegistrar;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while an extension sets itself up
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("invalid key notation: {0}")]
    Keys(#[from] KeyParseError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("extension {name} failed to initialize: {message}")]
    Init { name: String, message: String },
}

/// Errors raised by a running handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

// ============================================================================
// Handlers
// ============================================================================

/// How a handler reports that its work is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// Done when `execute` returns
    #[default]
    Immediate,
    /// Done when the [`Continuation`] from [`HandlerContext::take_continuation`]
    /// is resumed
    Continuation,
}

/// Behaviour bound to a key sequence by an extension
pub trait ExtensionHandler: Send + Sync {
    fn execute(
        &self,
        host: &mut dyn EditorHost,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError>;

    fn completion(&self) -> Completion {
        Completion::Immediate
    }

    /// Whether `.` replays this handler
    fn is_repeatable(&self) -> bool {
        false
    }
}

/// A named, shareable handler
#[derive(Clone)]
pub struct HandlerRef {
    name: Arc<str>,
    handler: Arc<dyn ExtensionHandler>,
}

impl HandlerRef {
    pub fn new(name: impl Into<Arc<str>>, handler: impl ExtensionHandler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &dyn ExtensionHandler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerRef").field(&self.name).finish()
    }
}

impl PartialEq for HandlerRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && std::ptr::addr_eq(Arc::as_ptr(&self.handler), Arc::as_ptr(&other.handler))
    }
}

/// A Visual selection requested by a handler running as a motion
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VisualRequest {
    pub selection: SelectionType,
    /// Caret offsets when the request was made, one per caret
    pub anchors: Vec<usize>,
}

/// What a handler sees of the session while it runs
pub struct HandlerContext<'a> {
    engine: &'a EngineContext,
    mode: Mode,
    count: Option<usize>,
    continuation: Option<Continuation>,
    visual_request: Option<VisualRequest>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        engine: &'a EngineContext,
        mode: Mode,
        count: Option<usize>,
        continuation: Option<Continuation>,
    ) -> Self {
        Self {
            engine,
            mode,
            count,
            continuation,
            visual_request: None,
        }
    }

    /// Mode the handler was invoked from
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn count(&self) -> Option<usize> {
        self.count
    }

    pub fn count1(&self) -> usize {
        self.count.unwrap_or(1).max(1)
    }

    pub fn is_operator_pending(&self) -> bool {
        matches!(self.mode, Mode::OperatorPending(_))
    }

    pub fn engine(&self) -> &EngineContext {
        self.engine
    }

    /// Start a Visual selection anchored at the current carets. In
    /// OperatorPending mode the selection becomes the operator's range.
    pub fn enter_visual(&mut self, host: &dyn EditorHost, selection: SelectionType) {
        let anchors = (0..host.caret_count()).map(|i| host.caret(i)).collect();
        self.visual_request = Some(VisualRequest { selection, anchors });
    }

    /// The completion signal of a [`Completion::Continuation`] handler
    pub fn take_continuation(&mut self) -> Option<Continuation> {
        self.continuation.take()
    }

    pub(crate) fn into_parts(self) -> (Option<VisualRequest>, Option<Continuation>) {
        (self.visual_request, self.continuation)
    }
}

// ============================================================================
// Extensions
// ============================================================================

/// An installable extension
pub trait VimExtension: Send + Sync {
    /// Registry name; also the name of the extension's toggle option
    fn name(&self) -> &str;

    fn init(&self, api: &mut ExtensionApi<'_>) -> Result<(), ExtensionError>;

    /// Release extension state. Mappings and commands are removed by the
    /// registry.
    fn dispose(&self) {}
}

/// An extension with the aliases `Plug` lines may activate it by
#[derive(Clone)]
pub struct ExtensionDescriptor {
    name: String,
    aliases: Vec<String>,
    extension: Arc<dyn VimExtension>,
}

impl fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl ExtensionDescriptor {
    pub fn new(extension: impl VimExtension + 'static) -> Self {
        Self {
            name: extension.name().to_string(),
            aliases: Vec::new(),
            extension: Arc::new(extension),
        }
    }

    /// Add an alias such as `tpope/vim-surround`
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub(crate) fn extension(&self) -> Arc<dyn VimExtension> {
        self.extension.clone()
    }
}

/// Installation surface handed to [`VimExtension::init`]. Everything put
/// through it is owned by the extension.
pub struct ExtensionApi<'a> {
    engine: &'a EngineContext,
    owner: MappingOwner,
}

impl<'a> ExtensionApi<'a> {
    pub(crate) fn new(engine: &'a EngineContext, name: &str) -> Self {
        Self {
            engine,
            owner: MappingOwner::Plugin(name.to_string()),
        }
    }

    pub fn owner(&self) -> &MappingOwner {
        &self.owner
    }

    pub fn engine(&self) -> &EngineContext {
        self.engine
    }

    fn key_mapping(
        &self,
        modes: MappingModes,
        from: &str,
        to: &str,
        recursive: bool,
    ) -> Result<Mapping, ExtensionError> {
        Ok(Mapping::new(
            KeySequence::parse(from)?,
            MappingTarget::Keys(KeySequence::parse(to)?),
            modes,
            self.owner.clone(),
            recursive,
        )?)
    }

    /// Map `from` to `to`, replacing existing mappings. Returns the modes
    /// that were installed.
    pub fn put_key_mapping(
        &mut self,
        modes: MappingModes,
        from: &str,
        to: &str,
        recursive: bool,
    ) -> Result<MappingModes, ExtensionError> {
        let mapping = self.key_mapping(modes, from, to, recursive)?;
        Ok(self.engine.mappings_mut().insert(mapping, true))
    }

    /// Map `from` to `to` only in modes where the user has neither mapped
    /// `from` nor mapped anything to `to`
    pub fn put_key_mapping_if_missing(
        &mut self,
        modes: MappingModes,
        from: &str,
        to: &str,
        recursive: bool,
    ) -> Result<MappingModes, ExtensionError> {
        let mapping = self.key_mapping(modes, from, to, recursive)?;
        Ok(self.engine.mappings_mut().insert_if_absent(mapping))
    }

    /// Bind `from` (usually a `<Plug>` name) to a handler
    pub fn put_handler_mapping(
        &mut self,
        modes: MappingModes,
        from: &str,
        handler: impl ExtensionHandler + 'static,
    ) -> Result<HandlerRef, ExtensionError> {
        let from = KeySequence::parse(from)?;
        let handler = HandlerRef::new(from.to_string(), handler);
        let mapping = Mapping::new(
            from,
            MappingTarget::Handler(handler.clone()),
            modes,
            self.owner.clone(),
            false,
        )?;
        self.engine.mappings_mut().insert(mapping, true);
        Ok(handler)
    }

    /// Register a command owned by this extension
    pub fn register_command(&mut self, spec: CommandSpec) {
        let spec = spec.with_owner(self.owner.clone());
        self.engine.commands_mut().register(spec);
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.engine.variable(name)
    }

    pub fn option(&self, name: &str) -> Option<OptionValue> {
        self.engine.options().get(name, Scope::Global).ok()
    }
}
