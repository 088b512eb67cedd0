//! Command stage: counts, command lookup, arguments, and execution of
//! motions, operators, builtins and extension handlers against the host.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{EngineError, Feedback, InsertSession, PendingArgument, Session, SuspendedHandler, Typed};
use crate::command::{
    Argument, ArgumentCollector, ArgumentKind, Builtin, Collected, CommandAction, CommandFlags,
    CommandLookup, CommandSpec, CommandType, MotionType, Operator,
};
use crate::composer::{
    caret_after_operator, doubled_operator_range, effective_count, motion_range, selection_range,
};
use crate::event_log::LogEntry;
use crate::extension::{Completion, HandlerContext, HandlerRef};
use crate::host::{EditorHost, OperatorRequest, ScrollPolicy, TextRange};
use crate::key::{Key, KeyCode, KeySequence};
use crate::mode::{MappingModes, Mode, ModeTransition, PendingOperator, SelectionType};
use crate::motion::{
    char_len_at, clamp_normal, first_non_blank, line_end, line_start, next_char,
    prev_char, Motion, MotionInput,
};
use crate::options::Scope;
use crate::repeat::Stroke;
use crate::script;

/// Modes where digits form a count
fn accepts_count(mode: &Mode) -> bool {
    matches!(mode, Mode::Normal | Mode::Visual(_) | Mode::OperatorPending(_))
}

/// Digit value if `key` extends a count; `0` only continues one
fn count_digit(key: &Key, count: Option<usize>) -> Option<usize> {
    key.digit()
        .filter(|d| *d != 0 || count.is_some())
        .map(|d| d as usize)
}

/// Text typed by a key in Insert mode
fn typed_char(key: &Key) -> Option<char> {
    if !key.modifiers.is_empty() {
        return None;
    }
    match key.code {
        KeyCode::Char(c) => Some(c),
        KeyCode::Enter => Some('\n'),
        KeyCode::Tab => Some('\t'),
        _ => None,
    }
}

fn carets(host: &dyn EditorHost) -> Vec<usize> {
    (0..host.caret_count()).map(|i| host.caret(i)).collect()
}

/// Caret indices, rightmost caret first
fn carets_descending(host: &dyn EditorHost) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..host.caret_count()).collect();
    indices.sort_by_key(|&i| std::cmp::Reverse(host.caret(i)));
    indices
}

impl Session {
    pub(super) fn is_count_key(&self, key: &Key) -> bool {
        self.map_pending.is_empty()
            && self.command_keys.is_empty()
            && self.argument.is_none()
            && accepts_count(self.machine.current())
            && count_digit(key, self.count).is_some()
    }

    pub(super) fn report(&mut self, host: &mut dyn EditorHost, transition: Option<ModeTransition>) {
        if let Some(transition) = transition {
            debug!(from = transition.from.as_str(), to = transition.to.as_str(), "mode changed");
            host.mode_changed(&transition);
        }
    }

    fn set_mode(&mut self, host: &mut dyn EditorHost, mode: Mode) {
        let transition = self.machine.enter(mode);
        self.report(host, transition);
    }

    fn option_flag(&self, name: &str) -> bool {
        self.engine.options().is_set(name, Scope::Effective(self.id))
    }

    // ========================================================================
    // Recording
    // ========================================================================

    pub(super) fn record(&mut self, stroke: Stroke) {
        if self.recorder.is_replaying() {
            return;
        }
        if !self.recorder.is_recording() {
            self.recorder.set_count(self.count);
        }
        self.recorder.record(stroke);
    }

    fn record_keys(&mut self, keys: &[Key]) {
        for key in keys {
            self.record(Stroke::Key(key.clone()));
        }
    }

    /// Start recording afresh for a command that begins insert input. A
    /// selected register stays part of the recording.
    fn restart_recording(&mut self) {
        if self.recorder.is_replaying() {
            return;
        }
        self.recorder.restart(self.count);
        if let Some(register) = self.register {
            self.recorder.record_key(&Key::char('"'));
            self.recorder.record_key(&Key::char(register));
        }
    }

    /// Insert-mode commands are replayed through their typed text, except
    /// those that edit it
    fn records(mode: &Mode, spec: &CommandSpec) -> bool {
        !mode.is_insert()
            || spec.flags.contains(CommandFlags::SAVE_STROKE)
            || matches!(spec.action, CommandAction::Builtin(Builtin::Escape))
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub(super) fn dispatch_key(
        &mut self,
        host: &mut dyn EditorHost,
        key: Key,
    ) -> Result<Feedback, EngineError> {
        if key.code == KeyCode::Nop {
            return Ok(Feedback::Done);
        }
        let mode = self.machine.current().clone();

        if self.command_keys.is_empty() && accepts_count(&mode) {
            if let Some(digit) = count_digit(&key, self.count) {
                if self.recorder.is_recording() {
                    self.record_keys(std::slice::from_ref(&key));
                }
                self.count = Some(self.count.unwrap_or(0).saturating_mul(10).saturating_add(digit));
                return Ok(Feedback::Pending);
            }
        }

        self.command_keys.push(key);
        let lookup = self
            .engine
            .commands()
            .lookup(mode.mapping_mode(), &self.command_keys);
        match lookup {
            CommandLookup::Prefix | CommandLookup::Ambiguous(_) => Ok(Feedback::Pending),
            CommandLookup::Exact(spec) => {
                let keys = std::mem::take(&mut self.command_keys);
                self.start_command(host, spec, keys)
            }
            CommandLookup::None => {
                self.expecting_more = false;
                let keys = std::mem::take(&mut self.command_keys);
                self.unmatched(host, mode, keys)
            }
        }
    }

    pub(super) fn start_command(
        &mut self,
        host: &mut dyn EditorHost,
        spec: Arc<CommandSpec>,
        keys: Vec<Key>,
    ) -> Result<Feedback, EngineError> {
        self.expecting_more = false;
        let mode = self.machine.current().clone();
        if spec.flags.contains(CommandFlags::CLEAR_STROKES) && matches!(mode, Mode::Normal) {
            self.restart_recording();
        }
        if Self::records(&mode, &spec) {
            self.record_keys(&keys);
        }
        if spec.argument != ArgumentKind::None {
            let collector = ArgumentCollector::new(
                spec.argument,
                spec.flags.contains(CommandFlags::ALLOW_DIGRAPH),
            );
            if spec.argument == ArgumentKind::ExString {
                self.set_mode(host, Mode::CommandLine);
            }
            self.argument = Some(PendingArgument {
                spec,
                keys,
                collector,
                return_mode: mode,
            });
            return Ok(Feedback::Pending);
        }
        self.execute(host, spec, keys, None)
    }

    pub(super) fn feed_argument(
        &mut self,
        host: &mut dyn EditorHost,
        key: Key,
    ) -> Result<Feedback, EngineError> {
        let Some(mut pending) = self.argument.take() else {
            return Ok(Feedback::NoMatch);
        };
        if Self::records(&pending.return_mode, &pending.spec) {
            self.record_keys(std::slice::from_ref(&key));
        }

        if pending.collector.kind() == ArgumentKind::ExString && self.completes_ex_input(&key) {
            let argument = pending.collector.finish();
            self.leave_command_line(host, &pending);
            return self.execute(host, pending.spec, pending.keys, Some(argument));
        }

        match pending.collector.feed(&key) {
            Collected::Pending => {
                self.argument = Some(pending);
                Ok(Feedback::Pending)
            }
            Collected::Done(argument) => {
                self.leave_command_line(host, &pending);
                self.execute(host, pending.spec, pending.keys, Some(argument))
            }
            Collected::Cancelled => {
                debug!(command = %pending.spec.description(), "argument cancelled");
                self.leave_command_line(host, &pending);
                self.count = None;
                self.register = None;
                if matches!(self.machine.current(), Mode::OperatorPending(_)) {
                    self.cancel_operator(host);
                }
                Ok(Feedback::Done)
            }
            Collected::Redispatch(argument, next) => {
                self.leave_command_line(host, &pending);
                let feedback = self.execute(host, pending.spec, pending.keys, Some(argument))?;
                self.typeahead.push_front(Typed::key(next));
                Ok(feedback)
            }
        }
    }

    fn completes_ex_input(&self, key: &Key) -> bool {
        self.engine
            .commands()
            .get(MappingModes::CMD_LINE, std::slice::from_ref(key))
            .is_some_and(|spec| spec.flags.contains(CommandFlags::COMPLETES_EX_INPUT))
    }

    fn leave_command_line(&mut self, host: &mut dyn EditorHost, pending: &PendingArgument) {
        if pending.collector.kind() == ArgumentKind::ExString {
            self.set_mode(host, pending.return_mode.clone());
        }
    }

    /// Keys that name no command in the current mode
    fn unmatched(
        &mut self,
        host: &mut dyn EditorHost,
        mode: Mode,
        keys: Vec<Key>,
    ) -> Result<Feedback, EngineError> {
        match &mode {
            Mode::Insert | Mode::Replace | Mode::Select(_) => {
                let text: String = keys.iter().filter_map(typed_char).collect();
                if text.is_empty() {
                    return Ok(Feedback::NoMatch);
                }
                self.record_keys(&keys);
                if mode.is_select() {
                    self.replace_selection(host, &text)
                } else {
                    self.insert_typed(host, &text)?;
                    Ok(Feedback::Done)
                }
            }
            Mode::OperatorPending(pending) => {
                let doubled = match keys.as_slice() {
                    [key] => key.as_char().and_then(Operator::from_key),
                    _ => None,
                };
                match doubled {
                    Some(operator) if operator == pending.operator => {
                        self.record_keys(&keys);
                        self.doubled_operator(host, pending.clone())
                    }
                    _ => {
                        debug!(keys = %KeySequence::from(keys), "operator cancelled");
                        self.cancel_operator(host);
                        Ok(Feedback::NoMatch)
                    }
                }
            }
            _ => {
                debug!(keys = %KeySequence::from(keys), mode = mode.as_str(), "no command");
                self.count = None;
                Ok(Feedback::NoMatch)
            }
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn execute(
        &mut self,
        host: &mut dyn EditorHost,
        spec: Arc<CommandSpec>,
        keys: Vec<Key>,
        argument: Option<Argument>,
    ) -> Result<Feedback, EngineError> {
        let mode = self.machine.current().clone();
        let count = self.count.take();
        let flags = spec.flags;
        let keys = KeySequence::from(keys);
        debug!(command = %spec.description(), keys = %keys, mode = mode.as_str(), ?count, "executing");

        let changes = match &spec.action {
            CommandAction::Builtin(builtin) => builtin.is_change(),
            CommandAction::Operator(op) => mode.has_selection() && op.changes_text(),
            CommandAction::Handler(handler) => handler.handler().is_repeatable(),
            CommandAction::Motion(_) => false,
        };
        self.log.record(
            LogEntry::new(spec.description(), keys.clone(), mode.as_str())
                .with_count(count)
                .change(changes),
        );

        if flags.contains(CommandFlags::SAVE_JUMP_POSITION) && !matches!(mode, Mode::OperatorPending(_)) {
            let caret = host.caret(0);
            host.push_jump(caret);
        }
        let grouped = flags.contains(CommandFlags::MULTIKEY_UNDO) && spec.command_type != CommandType::InsertLike;
        if grouped {
            host.begin_undo_group();
        }
        let exits_visual = flags.contains(CommandFlags::EXITS_VISUAL) && mode.has_selection();

        let result = match &spec.action {
            CommandAction::Motion(motion) => self.run_motion(host, &spec, *motion, count, argument.as_ref()),
            CommandAction::Operator(op) => self.run_operator(host, *op, count, exits_visual),
            CommandAction::Builtin(builtin) => self.run_builtin(host, &spec, *builtin, count, argument),
            CommandAction::Handler(handler) => {
                self.run_handler(host, handler.clone(), count, keys, exits_visual)
            }
        };

        if grouped {
            host.end_undo_group();
        }
        let mut feedback = result?;
        if feedback == Feedback::Suspended {
            return Ok(feedback);
        }
        if exits_visual && !matches!(spec.action, CommandAction::Handler(_)) {
            self.exit_visual(host);
        }
        if flags.contains(CommandFlags::EXPECT_MORE_KEYS) && feedback != Feedback::NoMatch {
            self.expecting_more = true;
            feedback = Feedback::Pending;
        }

        let vertical = !flags.contains(CommandFlags::IGNORE_SCROLL_JUMP);
        let horizontal = !flags.contains(CommandFlags::IGNORE_SIDE_SCROLL_JUMP);
        if vertical || horizontal {
            host.scroll_to_caret(ScrollPolicy { vertical, horizontal });
        }
        Ok(feedback)
    }

    // ========================================================================
    // Motions
    // ========================================================================

    /// Update the last search for a search motion. False when `*` finds no
    /// word to search for.
    fn prepare_search(&mut self, host: &dyn EditorHost, motion: Motion, argument: Option<&Argument>) -> bool {
        let ignore_case = self.option_flag("ignorecase");
        match motion {
            Motion::SearchForward | Motion::SearchBackward => {
                if let Some(pattern) = argument.and_then(Argument::as_text) {
                    self.search
                        .set_pattern(pattern, motion == Motion::SearchBackward, ignore_case);
                }
                true
            }
            Motion::SearchWordForward => {
                let caret = host.caret(0);
                self.search.set_word_at(host.text(), caret, ignore_case)
            }
            _ => true,
        }
    }

    fn motion_target(
        &self,
        text: &str,
        motion: Motion,
        caret: usize,
        count: Option<usize>,
        argument: Option<&Argument>,
        op_pending: bool,
    ) -> Option<usize> {
        let n = count.unwrap_or(1).max(1);
        let wrap = motion.is_search() && self.option_flag("wrapscan");
        match motion {
            Motion::SearchForward | Motion::SearchWordForward => self.search.find(text, caret, true, n, wrap),
            Motion::SearchBackward => self.search.find(text, caret, false, n, wrap),
            Motion::SearchNext => self.search.find(text, caret, !self.search.is_backward(), n, wrap),
            Motion::SearchPrevious => self.search.find(text, caret, self.search.is_backward(), n, wrap),
            _ => motion.apply(&MotionInput {
                text,
                caret,
                count,
                argument: argument.and_then(Argument::as_char),
                op_pending,
            }),
        }
    }

    fn run_motion(
        &mut self,
        host: &mut dyn EditorHost,
        spec: &CommandSpec,
        motion: Motion,
        count: Option<usize>,
        argument: Option<&Argument>,
    ) -> Result<Feedback, EngineError> {
        if !self.prepare_search(host, motion, argument) {
            if let Mode::OperatorPending(_) = self.machine.current() {
                self.cancel_operator(host);
            }
            return Ok(Feedback::NoMatch);
        }
        if let Mode::OperatorPending(pending) = self.machine.current().clone() {
            return self.operator_motion(host, spec, motion, count, argument, pending);
        }

        let targets: Vec<(usize, usize)> = {
            let text = host.text();
            (0..host.caret_count())
                .filter_map(|i| {
                    self.motion_target(text, motion, host.caret(i), count, argument, false)
                        .map(|target| (i, target))
                })
                .collect()
        };
        if targets.is_empty() {
            return Ok(Feedback::NoMatch);
        }
        for (index, target) in targets {
            host.set_caret(index, target);
        }
        self.refresh_selection(host);
        Ok(Feedback::Done)
    }

    fn operator_motion(
        &mut self,
        host: &mut dyn EditorHost,
        spec: &CommandSpec,
        motion: Motion,
        count: Option<usize>,
        argument: Option<&Argument>,
        pending: PendingOperator,
    ) -> Result<Feedback, EngineError> {
        let total = effective_count(pending.count, count);
        let ranges: Vec<(usize, TextRange)> = {
            let text = host.text();
            (0..host.caret_count())
                .filter_map(|i| {
                    let caret = host.caret(i);
                    // `cw` on a word changes to its end, like `ce`
                    let on_word = text[caret..].chars().next().is_some_and(|c| !c.is_whitespace());
                    let (motion, kind) = if pending.operator == Operator::Change
                        && motion == Motion::WordForward
                        && on_word
                    {
                        (Motion::WordEnd, MotionType::Inclusive)
                    } else {
                        (motion, spec.motion_type())
                    };
                    let target = self.motion_target(text, motion, caret, total, argument, true)?;
                    let range = motion_range(text, caret, target, kind);
                    (!range.is_empty()).then_some((i, range))
                })
                .collect()
        };
        if ranges.is_empty() {
            self.cancel_operator(host);
            return Ok(Feedback::NoMatch);
        }
        self.apply_ranges(host, pending.operator, pending.register, ranges)
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn run_operator(
        &mut self,
        host: &mut dyn EditorHost,
        operator: Operator,
        count: Option<usize>,
        exits_visual: bool,
    ) -> Result<Feedback, EngineError> {
        match self.machine.current().clone() {
            Mode::Visual(selection) | Mode::Select(selection) => {
                let ranges = self.selection_ranges(host, selection);
                let register = self.register.take();
                if exits_visual {
                    self.clear_visual(host);
                }
                self.apply_ranges(host, operator, register, ranges)
            }
            Mode::OperatorPending(_) => {
                self.cancel_operator(host);
                Ok(Feedback::NoMatch)
            }
            _ => {
                let pending = PendingOperator::new(operator, count, self.register.take());
                let transition = self.machine.begin_operator(pending);
                self.report(host, transition);
                Ok(Feedback::Pending)
            }
        }
    }

    fn doubled_operator(
        &mut self,
        host: &mut dyn EditorHost,
        pending: PendingOperator,
    ) -> Result<Feedback, EngineError> {
        let count = effective_count(pending.count, self.count.take());
        let ranges: Vec<(usize, TextRange)> = {
            let text = host.text();
            (0..host.caret_count())
                .map(|i| (i, doubled_operator_range(text, host.caret(i), count)))
                .collect()
        };
        self.log.record(
            LogEntry::new(
                format!("{0}{0}", pending.operator.key()),
                KeySequence::default(),
                self.machine.current().as_str(),
            )
            .with_count(count)
            .change(pending.operator.changes_text()),
        );
        self.apply_ranges(host, pending.operator, pending.register, ranges)
    }

    /// Run `operator` over one range per caret, rightmost first
    fn apply_ranges(
        &mut self,
        host: &mut dyn EditorHost,
        operator: Operator,
        register: Option<char>,
        mut ranges: Vec<(usize, TextRange)>,
    ) -> Result<Feedback, EngineError> {
        ranges.sort_by(|a, b| b.1.start.cmp(&a.1.start));
        // Overlapping ranges from carets inside one another's range
        ranges.dedup_by(|later, earlier| later.1.end > earlier.1.start);

        host.begin_undo_group();
        let mut outcome = Ok(());
        for (index, range) in &ranges {
            let before = host.caret(*index);
            let request = OperatorRequest {
                operator,
                range: *range,
                register,
            };
            if let Err(err) = host.apply_operator(&request) {
                outcome = Err(err);
                break;
            }
            let caret = caret_after_operator(host.text(), operator, range, before);
            host.set_caret(*index, caret);
        }
        host.end_undo_group();

        if let Err(err) = outcome {
            self.reset(host);
            return Err(err.into());
        }
        if operator.changes_text() {
            self.recorder.mark_change();
        }
        self.after_operator(host, operator);
        Ok(Feedback::Done)
    }

    fn after_operator(&mut self, host: &mut dyn EditorHost, operator: Operator) {
        let operator_pending = matches!(self.machine.current(), Mode::OperatorPending(_));
        if self.machine.current().has_selection() && !self.visual_anchors.is_empty() {
            // The command keeps its selection
            self.refresh_selection(host);
            return;
        }
        self.clear_visual(host);
        if operator == Operator::Change {
            self.set_mode(host, Mode::Insert);
            self.insert = Some(InsertSession {
                count: 1,
                ..InsertSession::default()
            });
        } else if operator_pending {
            let transition = self.machine.finish_operator();
            self.report(host, transition);
        } else {
            self.set_mode(host, Mode::Normal);
        }
    }

    fn cancel_operator(&mut self, host: &mut dyn EditorHost) {
        self.count = None;
        let transition = self.machine.finish_operator();
        self.report(host, transition);
    }

    // ========================================================================
    // Selections
    // ========================================================================

    fn selection_ranges(&self, host: &dyn EditorHost, selection: SelectionType) -> Vec<(usize, TextRange)> {
        let text = host.text();
        (0..host.caret_count())
            .map(|i| {
                let caret = host.caret(i);
                let anchor = self.visual_anchors.get(i).copied().unwrap_or(caret);
                (i, selection_range(text, anchor, caret, selection))
            })
            .collect()
    }

    fn refresh_selection(&mut self, host: &mut dyn EditorHost) {
        let Some(selection) = self.machine.current().selection_type() else {
            return;
        };
        for (index, range) in self.selection_ranges(host, selection) {
            host.set_selection(index, Some(range));
        }
    }

    pub(super) fn clear_visual(&mut self, host: &mut dyn EditorHost) {
        if self.visual_anchors.is_empty() && !self.machine.current().has_selection() {
            return;
        }
        for index in 0..host.caret_count() {
            host.set_selection(index, None);
        }
        self.visual_anchors.clear();
    }

    /// Leave Visual or Select for Normal, if still in one
    fn exit_visual(&mut self, host: &mut dyn EditorHost) {
        if !self.machine.current().has_selection() {
            return;
        }
        self.clear_visual(host);
        self.set_mode(host, Mode::Normal);
    }

    fn enter_selection(&mut self, host: &mut dyn EditorHost, mode: Mode) -> Result<Feedback, EngineError> {
        self.visual_anchors = carets(host);
        self.set_mode(host, mode);
        self.refresh_selection(host);
        Ok(Feedback::Done)
    }

    fn toggle_visual(&mut self, host: &mut dyn EditorHost, selection: SelectionType) -> Result<Feedback, EngineError> {
        match self.machine.current().clone() {
            Mode::Visual(current) if current == selection => {
                self.clear_visual(host);
                self.set_mode(host, Mode::Normal);
            }
            Mode::Visual(_) => {
                self.set_mode(host, Mode::Visual(selection));
                self.refresh_selection(host);
            }
            _ => return self.enter_selection(host, Mode::Visual(selection)),
        }
        Ok(Feedback::Done)
    }

    fn swap_visual_select(&mut self, host: &mut dyn EditorHost) -> Result<Feedback, EngineError> {
        let next = match self.machine.current() {
            Mode::Visual(selection) => Mode::Select(*selection),
            Mode::Select(selection) => Mode::Visual(*selection),
            _ => return Ok(Feedback::NoMatch),
        };
        self.set_mode(host, next);
        self.refresh_selection(host);
        Ok(Feedback::Done)
    }

    /// A printable key typed in Select mode replaces the selection
    fn replace_selection(&mut self, host: &mut dyn EditorHost, text: &str) -> Result<Feedback, EngineError> {
        let Some(selection) = self.machine.current().selection_type() else {
            return Ok(Feedback::NoMatch);
        };
        let mut ranges = self.selection_ranges(host, selection);
        ranges.sort_by(|a, b| b.1.start.cmp(&a.1.start));
        self.clear_visual(host);

        host.begin_undo_group();
        for (index, range) in ranges {
            if let Err(err) = host.delete_text(range.start, range.end) {
                host.end_undo_group();
                self.reset(host);
                return Err(err.into());
            }
            host.set_caret(index, range.start);
        }
        self.set_mode(host, Mode::Insert);
        self.insert = Some(InsertSession {
            count: 1,
            undo_open: true,
            ..InsertSession::default()
        });
        self.insert_typed(host, text)?;
        Ok(Feedback::Done)
    }

    /// `gn`/`gN`: select, extend to, or operate on the next match
    fn select_match(
        &mut self,
        host: &mut dyn EditorHost,
        forward: bool,
        count: Option<usize>,
    ) -> Result<Feedback, EngineError> {
        let mode = self.machine.current().clone();
        let wrap = self.option_flag("wrapscan");
        let found = {
            let text = host.text();
            self.search
                .select_match(text, host.caret(0), forward, mode.has_selection(), count.unwrap_or(1), wrap)
                .map(|m| (m.start, m.last, m.last + char_len_at(text, m.last)))
        };
        let Some((start, last, end)) = found else {
            if let Mode::OperatorPending(_) = mode {
                self.cancel_operator(host);
            }
            return Ok(Feedback::NoMatch);
        };

        match mode {
            Mode::OperatorPending(pending) => {
                let range = TextRange::characterwise(start, end);
                self.apply_ranges(host, pending.operator, pending.register, vec![(0, range)])
            }
            Mode::Visual(_) | Mode::Select(_) => {
                host.set_caret(0, if forward { last } else { start });
                self.refresh_selection(host);
                Ok(Feedback::Done)
            }
            _ => {
                let (anchor, caret) = if forward { (start, last) } else { (last, start) };
                let mut anchors = carets(host);
                if let Some(first) = anchors.first_mut() {
                    *first = anchor;
                }
                host.set_caret(0, caret);
                self.visual_anchors = anchors;
                self.set_mode(host, Mode::Visual(SelectionType::Character));
                self.refresh_selection(host);
                Ok(Feedback::Done)
            }
        }
    }

    // ========================================================================
    // Insert mode
    // ========================================================================

    fn insert_typed(&mut self, host: &mut dyn EditorHost, text: &str) -> Result<(), EngineError> {
        let replace = matches!(self.machine.current(), Mode::Replace);
        for index in carets_descending(host) {
            if replace {
                host.replace_text(index, text)?;
            } else {
                host.insert_text(index, text)?;
            }
        }
        if let Some(insert) = &mut self.insert {
            insert.typed.push_str(text);
        }
        self.recorder.mark_change();
        Ok(())
    }

    fn begin_insert(
        &mut self,
        host: &mut dyn EditorHost,
        spec: &CommandSpec,
        builtin: Builtin,
        count: Option<usize>,
    ) -> Result<Feedback, EngineError> {
        let targets: Vec<usize> = {
            let text = host.text();
            (0..host.caret_count())
                .map(|i| {
                    let caret = host.caret(i);
                    match builtin {
                        Builtin::InsertAfter if caret < line_end(text, caret) => next_char(text, caret),
                        Builtin::InsertLineStart => first_non_blank(text, line_start(text, caret)),
                        Builtin::InsertLineEnd => line_end(text, caret),
                        _ => caret,
                    }
                })
                .collect()
        };
        for (index, target) in targets.into_iter().enumerate() {
            host.set_caret(index, target);
        }

        let undo_open = spec.flags.contains(CommandFlags::MULTIKEY_UNDO);
        if undo_open {
            host.begin_undo_group();
        }
        let mode = if builtin == Builtin::ReplaceMode {
            Mode::Replace
        } else {
            Mode::Insert
        };
        self.set_mode(host, mode);
        self.insert = Some(InsertSession {
            count: count.unwrap_or(1).max(1),
            repeat_text: !spec.flags.contains(CommandFlags::NO_REPEAT_INSERT),
            typed: String::new(),
            undo_open,
        });
        self.recorder.mark_change();
        Ok(Feedback::Done)
    }

    /// Leave Insert or Replace: repeat the typed text for a count, close the
    /// undo group and step the caret back
    fn leave_insert(&mut self, host: &mut dyn EditorHost) -> Result<(), EngineError> {
        let replace = matches!(self.machine.current(), Mode::Replace);
        if let Some(insert) = self.insert.take() {
            if insert.count > 1 && insert.repeat_text && !insert.typed.is_empty() {
                let text = insert.typed.repeat(insert.count - 1);
                for index in carets_descending(host) {
                    let result = if replace {
                        host.replace_text(index, &text)
                    } else {
                        host.insert_text(index, &text)
                    };
                    if let Err(err) = result {
                        if insert.undo_open {
                            host.end_undo_group();
                        }
                        return Err(err.into());
                    }
                }
            }
            if insert.undo_open {
                host.end_undo_group();
            }
        }

        let moves: Vec<(usize, usize)> = {
            let text = host.text();
            (0..host.caret_count())
                .filter_map(|i| {
                    let caret = host.caret(i);
                    (caret > line_start(text, caret)).then(|| (i, prev_char(text, caret)))
                })
                .collect()
        };
        for (index, caret) in moves {
            host.set_caret(index, caret);
        }
        self.set_mode(host, Mode::Normal);
        Ok(())
    }

    fn backspace(&mut self, host: &mut dyn EditorHost) -> Result<Feedback, EngineError> {
        let mut spans: Vec<(usize, usize)> = {
            let text = host.text();
            (0..host.caret_count())
                .map(|i| host.caret(i))
                .filter(|&caret| caret > 0)
                .map(|caret| (prev_char(text, caret), caret))
                .collect()
        };
        if spans.is_empty() {
            return Ok(Feedback::NoMatch);
        }
        spans.sort_by(|a, b| b.0.cmp(&a.0));
        for (start, end) in spans {
            host.delete_text(start, end)?;
        }
        if let Some(insert) = &mut self.insert {
            insert.typed.pop();
        }
        self.recorder.mark_change();
        Ok(Feedback::Done)
    }

    // ========================================================================
    // Builtins
    // ========================================================================

    fn run_builtin(
        &mut self,
        host: &mut dyn EditorHost,
        spec: &CommandSpec,
        builtin: Builtin,
        count: Option<usize>,
        argument: Option<Argument>,
    ) -> Result<Feedback, EngineError> {
        match builtin {
            Builtin::DeleteChar => self.delete_chars(host, Motion::Right, Operator::Delete, count),
            Builtin::DeleteCharBefore => self.delete_chars(host, Motion::Left, Operator::Delete, count),
            Builtin::SubstituteChar => match self.delete_chars(host, Motion::Right, Operator::Change, count)? {
                Feedback::NoMatch => self.begin_insert(host, spec, Builtin::InsertBefore, None),
                feedback => Ok(feedback),
            },
            Builtin::ReplaceChar => self.replace_chars(host, count, argument),
            Builtin::InsertBefore
            | Builtin::InsertAfter
            | Builtin::InsertLineStart
            | Builtin::InsertLineEnd
            | Builtin::ReplaceMode => self.begin_insert(host, spec, builtin, count),
            Builtin::ToggleVisual(selection) => self.toggle_visual(host, selection),
            Builtin::EnterSelect(selection) => self.enter_selection(host, Mode::Select(selection)),
            Builtin::SwapVisualSelect => self.swap_visual_select(host),
            Builtin::Escape => self.escape(host),
            Builtin::SelectNextMatch => self.select_match(host, true, count),
            Builtin::SelectPreviousMatch => self.select_match(host, false, count),
            Builtin::ExCommand => self.ex_command(host, argument),
            Builtin::CompleteExInput => Ok(Feedback::NoMatch),
            Builtin::RepeatChange => self.repeat_change(count),
            Builtin::SelectRegister => {
                self.register = argument.and_then(|a| a.as_char());
                self.count = count;
                Ok(Feedback::Pending)
            }
            Builtin::JumpBack => self.jump(host, true, count),
            Builtin::JumpForward => self.jump(host, false, count),
            Builtin::Scroll(kind) => {
                host.scroll(kind, count.unwrap_or(1).max(1));
                Ok(Feedback::Done)
            }
            Builtin::InsertDigraph => match argument.and_then(|a| a.as_char()) {
                Some(c) => {
                    self.insert_typed(host, &c.to_string())?;
                    Ok(Feedback::Done)
                }
                None => Ok(Feedback::NoMatch),
            },
            Builtin::InsertBackspace => self.backspace(host),
        }
    }

    /// `x`, `X` and `s`: the operator over `count` characters
    fn delete_chars(
        &mut self,
        host: &mut dyn EditorHost,
        motion: Motion,
        operator: Operator,
        count: Option<usize>,
    ) -> Result<Feedback, EngineError> {
        let register = self.register.take();
        let ranges: Vec<(usize, TextRange)> = {
            let text = host.text();
            (0..host.caret_count())
                .filter_map(|i| {
                    let caret = host.caret(i);
                    let target = motion.apply(&MotionInput {
                        text,
                        caret,
                        count,
                        argument: None,
                        op_pending: true,
                    })?;
                    let range = motion_range(text, caret, target, MotionType::Exclusive);
                    (!range.is_empty()).then_some((i, range))
                })
                .collect()
        };
        if ranges.is_empty() {
            return Ok(Feedback::NoMatch);
        }
        self.apply_ranges(host, operator, register, ranges)
    }

    /// `r{char}`: overwrite `count` characters; fails if any line is short
    fn replace_chars(
        &mut self,
        host: &mut dyn EditorHost,
        count: Option<usize>,
        argument: Option<Argument>,
    ) -> Result<Feedback, EngineError> {
        let Some(c) = argument.and_then(|a| a.as_char()) else {
            return Ok(Feedback::NoMatch);
        };
        let n = count.unwrap_or(1).max(1);
        let fits = {
            let text = host.text();
            (0..host.caret_count()).all(|i| {
                let caret = host.caret(i);
                text[caret..line_end(text, caret)].chars().count() >= n
            })
        };
        if !fits {
            return Ok(Feedback::NoMatch);
        }

        let replacement: String = std::iter::repeat(c).take(n).collect();
        host.begin_undo_group();
        for index in carets_descending(host) {
            if let Err(err) = host.replace_text(index, &replacement) {
                host.end_undo_group();
                return Err(err.into());
            }
            let caret = host.caret(index).saturating_sub(c.len_utf8());
            host.set_caret(index, caret);
        }
        host.end_undo_group();
        self.recorder.mark_change();
        Ok(Feedback::Done)
    }

    fn escape(&mut self, host: &mut dyn EditorHost) -> Result<Feedback, EngineError> {
        self.count = None;
        self.register = None;
        match self.machine.current() {
            Mode::Insert | Mode::Replace => self.leave_insert(host)?,
            Mode::Visual(_) | Mode::Select(_) => {
                self.clear_visual(host);
                self.set_mode(host, Mode::Normal);
            }
            Mode::OperatorPending(_) | Mode::CommandLine => {
                let transition = self.machine.reset();
                self.report(host, transition);
            }
            Mode::Normal => {}
        }
        Ok(Feedback::Done)
    }

    fn ex_command(&mut self, host: &mut dyn EditorHost, argument: Option<Argument>) -> Result<Feedback, EngineError> {
        if self.machine.current().has_selection() {
            self.clear_visual(host);
            self.set_mode(host, Mode::Normal);
        }
        let line = argument
            .as_ref()
            .and_then(Argument::as_text)
            .unwrap_or_default()
            .to_string();
        match script::execute_line(&self.engine, &line) {
            Ok(()) => Ok(Feedback::Done),
            Err(err) => {
                warn!(%line, error = %err, "command failed");
                Ok(Feedback::NoMatch)
            }
        }
    }

    /// `.`: replay the last change with mappings off
    fn repeat_change(&mut self, count: Option<usize>) -> Result<Feedback, EngineError> {
        self.recorder.discard();
        let Some(change) = self.recorder.last().cloned() else {
            return Ok(Feedback::NoMatch);
        };
        if let Some(n) = count {
            self.recorder.set_last_count(n);
        }
        debug!(change = %change.describe(), ?count, "repeating change");

        self.count = count.or(change.count);
        self.recorder.set_replaying(true);
        self.typeahead.push_front(Typed::EndReplay);
        for stroke in change.strokes.into_iter().rev() {
            let typed = match stroke {
                Stroke::Key(key) => Typed::Key {
                    key,
                    remap: false,
                    depth: 0,
                },
                Stroke::Handler(handler) => Typed::Handler(handler),
            };
            self.typeahead.push_front(typed);
        }
        Ok(Feedback::Done)
    }

    fn jump(&mut self, host: &mut dyn EditorHost, back: bool, count: Option<usize>) -> Result<Feedback, EngineError> {
        let mut target = None;
        for _ in 0..count.unwrap_or(1).max(1) {
            let current = target.unwrap_or_else(|| host.caret(0));
            let next = if back {
                host.jump_back(current)
            } else {
                host.jump_forward()
            };
            match next {
                Some(offset) => target = Some(offset),
                None => break,
            }
        }
        let Some(offset) = target else {
            return Ok(Feedback::NoMatch);
        };
        let caret = clamp_normal(host.text(), offset.min(host.text().len()));
        host.set_caret(0, caret);
        Ok(Feedback::Done)
    }

    // ========================================================================
    // Extension handlers
    // ========================================================================

    pub(super) fn run_handler(
        &mut self,
        host: &mut dyn EditorHost,
        handler: HandlerRef,
        count: Option<usize>,
        keys: KeySequence,
        exits_visual: bool,
    ) -> Result<Feedback, EngineError> {
        self.expecting_more = false;
        let mode = self.machine.current().clone();
        let count = match &mode {
            Mode::OperatorPending(pending) => effective_count(pending.count, count),
            _ => count,
        };
        let repeatable = handler.handler().is_repeatable();
        self.log.record(
            LogEntry::new(handler.name(), keys, mode.as_str())
                .with_count(count)
                .change(repeatable),
        );

        let continuation = match handler.handler().completion() {
            Completion::Continuation => Some(self.delayed.begin()),
            Completion::Immediate => None,
        };
        let before = carets(host);
        let engine = self.engine.clone();
        debug!(handler = handler.name(), mode = mode.as_str(), ?count, "running handler");

        let mut context = HandlerContext::new(&engine, mode.clone(), count, continuation);
        let result = handler.handler().execute(host, &mut context);
        let (visual, unclaimed) = context.into_parts();

        if let Err(source) = result {
            self.delayed.abandon();
            warn!(handler = handler.name(), error = %source, "handler failed");
            self.reset(host);
            return Err(EngineError::Handler {
                name: handler.name().to_string(),
                source,
            });
        }
        if unclaimed.is_some() {
            // Never handed out, so nothing can resume it
            self.delayed.abandon();
        }
        if repeatable {
            self.recorder.mark_change();
        }

        let suspended = SuspendedHandler {
            mode,
            before,
            visual,
            exits_visual,
        };
        if self.delayed.is_pending() {
            debug!(handler = handler.name(), "waiting for delayed completion");
            self.suspended = Some(suspended);
            return Ok(Feedback::Suspended);
        }
        self.finish_handler(host, suspended)
    }

    /// Apply what a completed handler left behind: in OperatorPending the
    /// caret movement (or requested selection) becomes the operator's range
    pub(super) fn finish_handler(
        &mut self,
        host: &mut dyn EditorHost,
        finished: SuspendedHandler,
    ) -> Result<Feedback, EngineError> {
        match finished.mode {
            Mode::OperatorPending(pending) => {
                if !matches!(self.machine.current(), Mode::OperatorPending(_)) {
                    return Ok(Feedback::Done);
                }
                let ranges: Vec<(usize, TextRange)> = {
                    let text = host.text();
                    match &finished.visual {
                        Some(request) => (0..host.caret_count())
                            .map(|i| {
                                let caret = host.caret(i);
                                let anchor = request.anchors.get(i).copied().unwrap_or(caret);
                                (i, selection_range(text, anchor, caret, request.selection))
                            })
                            .collect(),
                        None => (0..host.caret_count())
                            .filter_map(|i| {
                                let after = host.caret(i);
                                let before = finished.before.get(i).copied()?;
                                (after != before)
                                    .then(|| (i, motion_range(text, before, after, MotionType::Exclusive)))
                            })
                            .collect(),
                    }
                };
                if ranges.is_empty() {
                    self.cancel_operator(host);
                    return Ok(Feedback::NoMatch);
                }
                self.apply_ranges(host, pending.operator, pending.register, ranges)
            }
            _ => {
                if let Some(request) = finished.visual {
                    self.visual_anchors = request.anchors;
                    self.set_mode(host, Mode::Visual(request.selection));
                } else if finished.exits_visual {
                    self.exit_visual(host);
                }
                self.refresh_selection(host);
                Ok(Feedback::Done)
            }
        }
    }
}

