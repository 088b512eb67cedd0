//! Per-editor key processing.
//!
//! A [`Session`] owns everything private to one editor: the mode machine,
//! typeahead, pending counts and arguments, the last search and dot-repeat
//! recording. Shared tables (mappings, commands, options, extensions) come
//! from its [`EngineContext`].
//!
//! Keys flow through two stages. The mapping stage buffers keys while they
//! are a prefix of some mapping and rewrites complete matches, feeding the
//! result back into the typeahead. The command stage (in `dispatch`) looks the
//! remaining keys up in the command registry and runs them against the host.

mod dispatch;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::command::{ArgumentCollector, CommandSpec};
use crate::context::EngineContext;
use crate::delayed::{DelayedCoordinator, Resumed};
use crate::event_log::EventLog;
use crate::extension::{HandlerError, HandlerRef, VisualRequest};
use crate::host::{EditorHost, HostError};
use crate::key::{Key, KeyParseError, KeySequence};
use crate::mapping::{Mapping, MappingError, MappingTarget, Resolution};
use crate::mode::{MappingModes, Mode, ModeMachine};
use crate::options::Scope;
use crate::repeat::{RecordedChange, Recorder, Stroke};
use crate::search::SearchState;

// ============================================================================
// Public types
// ============================================================================

/// Identity of a session, used for session-local option values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to the input fed so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Feedback {
    /// Input was consumed and nothing is pending
    Done,
    /// More keys are needed (mapping prefix, argument, count, operator)
    Pending,
    /// A delayed action is outstanding; call [`Session::pump`]
    Suspended,
    /// The key was queued behind a delayed action
    Queued,
    /// The input matched nothing, or a motion or search found no target
    NoMatch,
}

/// Errors surfaced by key processing
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Keys(#[from] KeyParseError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("handler {name} failed: {source}")]
    Handler {
        name: String,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Host(#[from] HostError),
}

// ============================================================================
// Internal state
// ============================================================================

/// One typeahead entry
#[derive(Debug, Clone)]
enum Typed {
    Key {
        key: Key,
        /// Whether mappings apply to this key
        remap: bool,
        /// Mapping expansion depth that produced this key
        depth: usize,
    },
    /// A handler replayed by `.`
    Handler(HandlerRef),
    /// End of a `.` replay
    EndReplay,
}

impl Typed {
    fn key(key: Key) -> Self {
        Typed::Key {
            key,
            remap: true,
            depth: 0,
        }
    }
}

/// A command waiting for its argument
#[derive(Debug)]
struct PendingArgument {
    spec: Arc<CommandSpec>,
    keys: Vec<Key>,
    collector: ArgumentCollector,
    /// Mode to return to after CommandLine input
    return_mode: Mode,
}

/// State of an Insert or Replace mode visit
#[derive(Debug, Default)]
struct InsertSession {
    /// Times the typed text is inserted in total (`3ix<Esc>`)
    count: usize,
    repeat_text: bool,
    typed: String,
    undo_open: bool,
}

/// A handler whose completion is still outstanding
#[derive(Debug)]
struct SuspendedHandler {
    mode: Mode,
    /// Carets before the handler ran
    before: Vec<usize>,
    visual: Option<VisualRequest>,
    /// Leave Visual/Select once finished
    exits_visual: bool,
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    id: SessionId,
    engine: EngineContext,
    machine: ModeMachine,
    typeahead: VecDeque<Typed>,
    /// Keys buffered while they are a mapping prefix, with their depth
    map_pending: Vec<(Key, usize)>,
    /// Keys of a partially typed command
    command_keys: Vec<Key>,
    count: Option<usize>,
    register: Option<char>,
    /// The last command needs another one to complete
    expecting_more: bool,
    argument: Option<PendingArgument>,
    /// Selection anchors, one per caret, while Visual or Select is active
    visual_anchors: Vec<usize>,
    search: SearchState,
    recorder: Recorder,
    delayed: DelayedCoordinator,
    suspended: Option<SuspendedHandler>,
    /// Input that arrived while a delayed action was outstanding
    queued: VecDeque<Typed>,
    insert: Option<InsertSession>,
    log: EventLog,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", self.machine.current())
            .field("count", &self.count)
            .field("pending", &self.pending_keys().to_string())
            .field("suspended", &self.delayed.is_pending())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.engine.options().clear_session(self.id);
    }
}

impl Session {
    pub fn new(engine: EngineContext) -> Self {
        Self {
            id: SessionId::new(),
            engine,
            machine: ModeMachine::new(),
            typeahead: VecDeque::new(),
            map_pending: Vec::new(),
            command_keys: Vec::new(),
            count: None,
            register: None,
            expecting_more: false,
            argument: None,
            visual_anchors: Vec::new(),
            search: SearchState::new(),
            recorder: Recorder::new(),
            delayed: DelayedCoordinator::new(),
            suspended: None,
            queued: VecDeque::new(),
            insert: None,
            log: EventLog::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn engine(&self) -> &EngineContext {
        &self.engine
    }

    pub fn mode(&self) -> &Mode {
        self.machine.current()
    }

    pub fn count(&self) -> Option<usize> {
        self.count
    }

    /// Keys typed but not yet resolved, for a status line
    pub fn pending_keys(&self) -> KeySequence {
        self.map_pending
            .iter()
            .map(|(key, _)| key.clone())
            .chain(self.command_keys.iter().cloned())
            .collect::<Vec<_>>()
            .into()
    }

    pub fn last_change(&self) -> Option<&RecordedChange> {
        self.recorder.last()
    }

    pub fn search_pattern(&self) -> Option<&str> {
        self.search.pattern()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn is_suspended(&self) -> bool {
        self.delayed.is_pending()
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Process one key
    pub fn feed_key(&mut self, host: &mut dyn EditorHost, key: Key) -> Result<Feedback, EngineError> {
        if self.delayed.is_pending() {
            debug!(key = %KeySequence::from(key.clone()), "queued behind delayed action");
            self.queued.push_back(Typed::key(key));
            return Ok(Feedback::Queued);
        }
        self.typeahead.push_back(Typed::key(key));
        self.run(host)
    }

    /// Process keys given in notation (`"d2w"`, `"<C-V>jd"`)
    pub fn feed(&mut self, host: &mut dyn EditorHost, notation: &str) -> Result<Feedback, EngineError> {
        let keys = KeySequence::parse(notation)?;
        let mut feedback = Feedback::Done;
        for key in keys.into_keys() {
            feedback = self.feed_key(host, key)?;
        }
        Ok(feedback)
    }

    /// Called by the host when `timeoutlen` elapsed with input pending.
    /// Ambiguous input resolves to its shorter match.
    pub fn timeout(&mut self, host: &mut dyn EditorHost) -> Result<Feedback, EngineError> {
        if self.delayed.is_pending() {
            return Ok(Feedback::Suspended);
        }
        if !self.engine.options().is_set("timeout", Scope::Global) {
            return Ok(self.settle(Feedback::Done));
        }

        if !self.map_pending.is_empty() {
            let tag = self.machine.current().mapping_mode();
            let keys: Vec<Key> = self.map_pending.iter().map(|(key, _)| key.clone()).collect();
            let prefix = self.engine.mappings().longest_prefix(tag, &keys);
            let mut buffered = std::mem::take(&mut self.map_pending);
            match prefix {
                Some((len, mapping)) => {
                    let rest = buffered.split_off(len);
                    let depth = buffered.iter().map(|(_, d)| *d).max().unwrap_or(0);
                    self.requeue(rest);
                    let result = self.expand(host, mapping, depth);
                    self.guard(result)?;
                }
                None => {
                    let rest = buffered.split_off(1);
                    self.requeue(rest);
                    if let Some((key, depth)) = buffered.pop() {
                        self.typeahead.push_front(Typed::Key {
                            key,
                            remap: false,
                            depth,
                        });
                    }
                }
            }
        } else if !self.command_keys.is_empty() {
            let tag = self.machine.current().mapping_mode();
            let exact = self.engine.commands().get(tag, &self.command_keys);
            let keys = std::mem::take(&mut self.command_keys);
            if let Some(spec) = exact {
                let result = self.start_command(host, spec, keys);
                self.guard(result)?;
            }
        }
        self.run(host)
    }

    /// Deliver a fired continuation, if any, and process queued keys
    pub fn pump(&mut self, host: &mut dyn EditorHost) -> Result<Feedback, EngineError> {
        match self.delayed.poll() {
            Some(resumed) => self.resume(host, resumed),
            None if self.delayed.is_pending() => Ok(Feedback::Suspended),
            None => Ok(self.settle(Feedback::Done)),
        }
    }

    /// Like [`Session::pump`], waiting up to `timeout` for the continuation
    pub fn pump_blocking(
        &mut self,
        host: &mut dyn EditorHost,
        timeout: Duration,
    ) -> Result<Feedback, EngineError> {
        match self.delayed.wait(timeout) {
            Some(resumed) => self.resume(host, resumed),
            None => self.pump(host),
        }
    }

    /// Give up on the outstanding delayed action. Its continuation becomes
    /// stale, queued keys are dropped and the session returns to Normal.
    pub fn abandon_delayed(&mut self, host: &mut dyn EditorHost) -> bool {
        if !self.delayed.abandon() {
            return false;
        }
        debug!(dropped = self.queued.len(), "abandoned delayed action");
        self.suspended = None;
        self.queued.clear();
        self.recorder.set_replaying(false);
        self.recorder.discard();
        self.reset(host);
        true
    }

    /// Cancel everything pending and return to Normal. An outstanding
    /// delayed action is left alone.
    pub fn reset(&mut self, host: &mut dyn EditorHost) {
        self.map_pending.clear();
        self.command_keys.clear();
        self.count = None;
        self.register = None;
        self.expecting_more = false;
        self.argument = None;
        if let Some(insert) = self.insert.take() {
            if insert.undo_open {
                host.end_undo_group();
            }
        }
        self.clear_visual(host);
        let transition = self.machine.reset();
        self.report(host, transition);
    }

    // ========================================================================
    // Processing loop
    // ========================================================================

    fn run(&mut self, host: &mut dyn EditorHost) -> Result<Feedback, EngineError> {
        let mut feedback = Feedback::Done;
        while let Some(typed) = self.typeahead.pop_front() {
            if self.delayed.is_pending() {
                self.queued.push_back(typed);
                self.queued.extend(self.typeahead.drain(..));
                break;
            }
            let result = self.process(host, typed);
            feedback = self.guard(result)?;
        }

        if self.delayed.is_pending() {
            return Ok(Feedback::Suspended);
        }
        if self.is_idle() {
            self.recorder.finish();
        }
        Ok(self.settle(feedback))
    }

    /// Final feedback given the state left behind
    fn settle(&self, last: Feedback) -> Feedback {
        if self.awaiting_keys() {
            Feedback::Pending
        } else if last == Feedback::Pending {
            Feedback::Done
        } else {
            last
        }
    }

    /// Drop buffered input after an error
    fn guard<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if result.is_err() {
            self.typeahead.clear();
            self.map_pending.clear();
            self.command_keys.clear();
            self.count = None;
            self.expecting_more = false;
            self.recorder.set_replaying(false);
            self.recorder.discard();
        }
        result
    }

    fn process(&mut self, host: &mut dyn EditorHost, typed: Typed) -> Result<Feedback, EngineError> {
        match typed {
            Typed::EndReplay => {
                self.recorder.set_replaying(false);
                Ok(Feedback::Done)
            }
            Typed::Handler(handler) => {
                let count = self.count.take();
                let keys = KeySequence::parse(handler.name()).unwrap_or_default();
                self.run_handler(host, handler, count, keys, false)
            }
            Typed::Key { key, remap, depth } => {
                if self.argument.is_some() {
                    return self.feed_argument(host, key);
                }
                if remap && !self.is_count_key(&key) {
                    self.map_pending.push((key, depth));
                    return self.resolve_pending(host);
                }
                self.dispatch_key(host, key)
            }
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self.machine.current(), Mode::Normal)
            && self.typeahead.is_empty()
            && self.insert.is_none()
            && self.suspended.is_none()
            && !self.awaiting_keys()
    }

    fn awaiting_keys(&self) -> bool {
        !self.map_pending.is_empty()
            || !self.command_keys.is_empty()
            || self.argument.is_some()
            || self.count.is_some()
            || self.register.is_some()
            || self.expecting_more
            || matches!(self.machine.current(), Mode::OperatorPending(_))
    }

    // ========================================================================
    // Mapping stage
    // ========================================================================

    fn resolve_pending(&mut self, host: &mut dyn EditorHost) -> Result<Feedback, EngineError> {
        let tag = self.machine.current().mapping_mode();
        let keys: Vec<Key> = self.map_pending.iter().map(|(key, _)| key.clone()).collect();
        let resolution = self.engine.mappings().resolve(tag, &keys);
        match resolution {
            Resolution::PartialMatch | Resolution::Ambiguous(_) => Ok(Feedback::Pending),
            Resolution::Match(mapping) => {
                let depth = self.map_pending.iter().map(|(_, d)| *d).max().unwrap_or(0);
                self.map_pending.clear();
                self.expand(host, mapping, depth)
            }
            Resolution::NoMatch => self.flush_pending(host, tag, keys),
        }
    }

    /// No mapping can match the buffered keys: expand the longest mapped
    /// prefix, or pass the first key on unmapped. The rest is re-resolved.
    fn flush_pending(
        &mut self,
        host: &mut dyn EditorHost,
        tag: MappingModes,
        keys: Vec<Key>,
    ) -> Result<Feedback, EngineError> {
        let prefix = self.engine.mappings().longest_prefix(tag, &keys);
        let mut buffered = std::mem::take(&mut self.map_pending);
        match prefix {
            Some((len, mapping)) => {
                let rest = buffered.split_off(len);
                let depth = buffered.iter().map(|(_, d)| *d).max().unwrap_or(0);
                self.requeue(rest);
                self.expand(host, mapping, depth)
            }
            None => {
                let rest = buffered.split_off(1);
                self.requeue(rest);
                match buffered.pop() {
                    Some((key, _)) => self.dispatch_key(host, key),
                    None => Ok(Feedback::NoMatch),
                }
            }
        }
    }

    fn requeue(&mut self, keys: Vec<(Key, usize)>) {
        for (key, depth) in keys.into_iter().rev() {
            self.typeahead.push_front(Typed::Key {
                key,
                remap: true,
                depth,
            });
        }
    }

    fn expand(
        &mut self,
        host: &mut dyn EditorHost,
        mapping: Arc<Mapping>,
        depth: usize,
    ) -> Result<Feedback, EngineError> {
        let rhs = match &mapping.target {
            MappingTarget::Handler(handler) => {
                let handler = handler.clone();
                let count = self.count.take();
                self.record(Stroke::Handler(handler.clone()));
                return self.run_handler(host, handler, count, mapping.from.clone(), false);
            }
            MappingTarget::Keys(rhs) => rhs.clone(),
        };

        if mapping.recursive {
            let max_depth = self
                .engine
                .options()
                .number("maxmapdepth", Scope::Global)
                .unwrap_or(1000)
                .max(1) as usize;
            let tag = self.machine.current().mapping_mode();
            if depth == 0 {
                self.engine
                    .mappings()
                    .check_expansion(tag, &mapping, max_depth)?;
            }
            if depth >= max_depth {
                return Err(MappingError::MappingCycle {
                    keys: mapping.from.to_string(),
                    depth: max_depth,
                }
                .into());
            }
        }

        debug!(from = %mapping.from, to = %rhs, depth, "expanding mapping");
        let lead = if mapping.recursive && rhs.starts_with(mapping.from.keys()) {
            mapping.from.len()
        } else {
            0
        };
        for (i, key) in rhs.iter().enumerate().rev() {
            self.typeahead.push_front(Typed::Key {
                key: key.clone(),
                remap: mapping.recursive && i >= lead,
                depth: depth + 1,
            });
        }
        Ok(Feedback::Pending)
    }

    // ========================================================================
    // Delayed actions
    // ========================================================================

    fn resume(&mut self, host: &mut dyn EditorHost, resumed: Resumed) -> Result<Feedback, EngineError> {
        debug!(token = resumed.token, "delayed action resumed");
        if let Some(effect) = resumed.effect {
            effect(host);
        }
        let mut feedback = Feedback::Done;
        if let Some(suspended) = self.suspended.take() {
            let result = self.finish_handler(host, suspended);
            feedback = self.guard(result)?;
        }
        let queued: Vec<Typed> = self.queued.drain(..).collect();
        if queued.is_empty() {
            if self.is_idle() {
                self.recorder.finish();
            }
            return Ok(self.settle(feedback));
        }
        self.typeahead.extend(queued);
        self.run(host)
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
