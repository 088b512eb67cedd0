//! Session test suite
//!
//! Test categories:
//! 1. Operators and motions (dw, counts, dd, cw, x)
//! 2. Visual, block and Select
//! 3. Mapping stage (recursion, cycles, Nop, ambiguity, timeout)
//! 4. Search and gn
//! 5. Dot repeat and Insert counts
//! 6. Extension handlers and delayed completion
//! 7. Command line, registers, jumps
//! 8. Multiple carets

use std::thread;

use parking_lot::Mutex;

use super::*;
use crate::buffer::StringBuffer;
use crate::command::{CommandAction, CommandFlags, CommandType, Operator, ScrollKind};
use crate::delayed::Continuation;
use crate::extension::{Completion, ExtensionHandler, HandlerContext};
use crate::host::{RangeKind, TextRange};
use crate::mapping::MappingOwner;
use crate::mode::SelectionType;
use crate::options::OptionValue;

// ============================================================================
// Test Helpers
// ============================================================================

fn setup(text: &str) -> (Session, StringBuffer) {
    (EngineContext::new().session(), StringBuffer::new(text))
}

fn map(session: &Session, modes: MappingModes, from: &str, to: &str, recursive: bool) {
    let mapping = Mapping::new(
        KeySequence::parse(from).unwrap(),
        MappingTarget::Keys(KeySequence::parse(to).unwrap()),
        modes,
        MappingOwner::User,
        recursive,
    )
    .unwrap();
    session.engine().mappings_mut().insert(mapping, true);
}

/// Bind `from` to `handler` and `key` to `from`
fn bind(session: &Session, key: &str, from: &str, handler: impl ExtensionHandler + 'static) {
    let mapping = Mapping::new(
        KeySequence::parse(from).unwrap(),
        MappingTarget::Handler(HandlerRef::new(from, handler)),
        MappingModes::NVO,
        MappingOwner::Plugin("test".to_string()),
        false,
    )
    .unwrap();
    session.engine().mappings_mut().insert(mapping, true);
    map(session, MappingModes::NVO, key, from, true);
}

/// Moves caret 0 to a fixed offset
struct MoveTo(usize);

impl ExtensionHandler for MoveTo {
    fn execute(&self, host: &mut dyn EditorHost, _ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        host.set_caret(0, self.0);
        Ok(())
    }
}

/// Requests a linewise selection and moves to the next line
struct SelectLine;

impl ExtensionHandler for SelectLine {
    fn execute(&self, host: &mut dyn EditorHost, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        ctx.enter_visual(host, SelectionType::Line);
        let next = crate::motion::line_end(host.text(), host.caret(0)) + 1;
        host.set_caret(0, next);
        Ok(())
    }
}

struct Fail;

impl ExtensionHandler for Fail {
    fn execute(&self, _host: &mut dyn EditorHost, _ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        Err(HandlerError::Failed("boom".to_string()))
    }
}

/// Hands its continuation to the test
struct Deferred {
    slot: Arc<Mutex<Option<Continuation>>>,
}

impl ExtensionHandler for Deferred {
    fn execute(&self, _host: &mut dyn EditorHost, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        *self.slot.lock() = ctx.take_continuation();
        Ok(())
    }

    fn completion(&self) -> Completion {
        Completion::Continuation
    }
}

/// Asks for a continuation but never takes it
struct Forgetful;

impl ExtensionHandler for Forgetful {
    fn execute(&self, host: &mut dyn EditorHost, _ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        host.set_caret(0, 1);
        Ok(())
    }

    fn completion(&self) -> Completion {
        Completion::Continuation
    }
}

struct Noop;

impl ExtensionHandler for Noop {
    fn execute(&self, _host: &mut dyn EditorHost, _ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Register `keys` as a handler command with `flags`
fn command(
    session: &Session,
    keys: &str,
    modes: MappingModes,
    handler: impl ExtensionHandler + 'static,
    flags: CommandFlags,
) {
    let spec = CommandSpec::new(
        KeySequence::parse(keys).unwrap(),
        modes,
        CommandType::Other,
        CommandAction::Handler(HandlerRef::new(keys, handler)),
    )
    .with_flags(flags);
    session.engine().commands_mut().register(spec);
}

fn deferred(session: &Session) -> Arc<Mutex<Option<Continuation>>> {
    let slot = Arc::new(Mutex::new(None));
    bind(session, "Z", "<Plug>(deferred)", Deferred { slot: slot.clone() });
    slot
}

// ============================================================================
// Operator Tests
// ============================================================================

#[test]
fn test_dw_deletes_word() {
    let (mut session, mut buffer) = setup("one two three");

    let feedback = session.feed(&mut buffer, "dw").unwrap();

    assert_eq!(feedback, Feedback::Done);
    assert_eq!(buffer.text(), "two three");
    assert_eq!(buffer.caret(0), 0);
    assert_eq!(session.mode(), &Mode::Normal);
    assert_eq!(buffer.registers().unnamed().unwrap().text, "one ");
}

#[test]
fn test_operator_and_motion_counts_multiply() {
    let (mut session, mut buffer) = setup("a b c d e f g h");

    session.feed(&mut buffer, "2d3w").unwrap();

    assert_eq!(buffer.text(), "g h");
}

#[test]
fn test_operator_waits_for_motion() {
    let (mut session, mut buffer) = setup("one two");

    assert_eq!(session.feed(&mut buffer, "d").unwrap(), Feedback::Pending);
    assert!(matches!(session.mode(), Mode::OperatorPending(_)));

    session.feed(&mut buffer, "<Esc>").unwrap();
    assert_eq!(session.mode(), &Mode::Normal);
    assert_eq!(buffer.text(), "one two");
}

#[test]
fn test_dd_deletes_line() {
    let (mut session, mut buffer) = setup("one\ntwo\nthree");

    session.feed(&mut buffer, "dd").unwrap();

    assert_eq!(buffer.text(), "two\nthree");
    let register = buffer.registers().unnamed().unwrap();
    assert_eq!(register.text, "one\n");
    assert_eq!(register.kind, RangeKind::Linewise);
}

#[test]
fn test_dd_on_last_line() {
    let mut buffer = StringBuffer::with_carets("one\ntwo", &[4]);
    let mut session = EngineContext::new().session();

    session.feed(&mut buffer, "dd").unwrap();

    assert_eq!(buffer.text(), "one");
    assert_eq!(buffer.caret(0), 0);
}

#[test]
fn test_different_operator_cancels() {
    let (mut session, mut buffer) = setup("one\ntwo");

    let feedback = session.feed(&mut buffer, "dy").unwrap();

    assert_eq!(feedback, Feedback::NoMatch);
    assert_eq!(session.mode(), &Mode::Normal);
    assert_eq!(buffer.text(), "one\ntwo");
}

#[test]
fn test_yy_yanks_without_moving() {
    let mut buffer = StringBuffer::with_carets("one\ntwo", &[5]);
    let mut session = EngineContext::new().session();

    session.feed(&mut buffer, "yy").unwrap();

    assert_eq!(buffer.text(), "one\ntwo");
    assert_eq!(buffer.caret(0), 5);
    assert_eq!(buffer.registers().get('0').unwrap().text, "two\n");
}

#[test]
fn test_cw_changes_to_word_end() {
    let (mut session, mut buffer) = setup("one two");

    session.feed(&mut buffer, "cw").unwrap();
    assert_eq!(session.mode(), &Mode::Insert);
    assert_eq!(buffer.text(), " two");

    session.feed(&mut buffer, "xyz<Esc>").unwrap();
    assert_eq!(buffer.text(), "xyz two");
    assert_eq!(buffer.caret(0), 2);
    assert_eq!(session.mode(), &Mode::Normal);
}

#[test]
fn test_x_with_count() {
    let (mut session, mut buffer) = setup("hello");

    session.feed(&mut buffer, "3x").unwrap();

    assert_eq!(buffer.text(), "lo");
}

#[test]
fn test_count_with_zero_digit() {
    let (mut session, mut buffer) = setup("abcdefghijkl");

    session.feed(&mut buffer, "10x").unwrap();

    assert_eq!(buffer.text(), "kl");
}

#[test]
fn test_x_at_line_end_steps_back() {
    let mut buffer = StringBuffer::with_carets("ab", &[1]);
    let mut session = EngineContext::new().session();

    session.feed(&mut buffer, "x").unwrap();

    assert_eq!(buffer.text(), "a");
    assert_eq!(buffer.caret(0), 0);
}

#[test]
fn test_replace_char_needs_room() {
    let (mut session, mut buffer) = setup("abc");

    assert_eq!(session.feed(&mut buffer, "5rx").unwrap(), Feedback::NoMatch);
    assert_eq!(buffer.text(), "abc");

    session.feed(&mut buffer, "2rx").unwrap();
    assert_eq!(buffer.text(), "xxc");
}

// ============================================================================
// Visual and Select Tests
// ============================================================================

#[test]
fn test_visual_delete() {
    let (mut session, mut buffer) = setup("hello world");

    session.feed(&mut buffer, "vll").unwrap();
    assert_eq!(session.mode(), &Mode::Visual(SelectionType::Character));
    assert_eq!(buffer.selected_text(0), Some("hel"));

    session.feed(&mut buffer, "d").unwrap();
    assert_eq!(buffer.text(), "lo world");
    assert_eq!(session.mode(), &Mode::Normal);
    assert_eq!(buffer.selection(0), None);
}

#[test]
fn test_block_delete() {
    let (mut session, mut buffer) = setup("abc\ndef\nghi");

    session.feed(&mut buffer, "<C-V>jld").unwrap();

    assert_eq!(buffer.text(), "c\nf\nghi");
    assert_eq!(buffer.caret(0), 0);
}

#[test]
fn test_visual_toggle_reports_transitions() {
    let (mut session, mut buffer) = setup("abc");

    session.feed(&mut buffer, "v<Esc>").unwrap();

    assert_eq!(buffer.transitions().len(), 2);
    assert_eq!(buffer.transitions()[1].to, Mode::Normal);
}

#[test]
fn test_select_mode_typing_replaces_selection() {
    let (mut session, mut buffer) = setup("hello");

    session.feed(&mut buffer, "gh<Right>").unwrap();
    assert_eq!(session.mode(), &Mode::Select(SelectionType::Character));

    session.feed(&mut buffer, "X").unwrap();
    assert_eq!(session.mode(), &Mode::Insert);
    assert_eq!(buffer.text(), "Xllo");

    session.feed(&mut buffer, "<Esc>").unwrap();
    assert_eq!(buffer.caret(0), 0);
}

// ============================================================================
// Mapping Tests
// ============================================================================

#[test]
fn test_recursive_mapping_chain() {
    let (mut session, mut buffer) = setup("abc");
    map(&session, MappingModes::NORMAL, "Q", "W", true);
    map(&session, MappingModes::NORMAL, "W", "x", true);

    session.feed(&mut buffer, "Q").unwrap();

    assert_eq!(buffer.text(), "bc");
}

#[test]
fn test_noremap_is_not_expanded_again() {
    let (mut session, mut buffer) = setup("one\ntwo");
    map(&session, MappingModes::NORMAL, "x", "dd", true);
    map(&session, MappingModes::NORMAL, "Q", "x", false);

    session.feed(&mut buffer, "Q").unwrap();

    assert_eq!(buffer.text(), "ne\ntwo");
}

#[test]
fn test_leading_lhs_is_not_remapped() {
    let (mut session, mut buffer) = setup("abc");
    map(&session, MappingModes::NORMAL, "x", "xl", true);

    session.feed(&mut buffer, "x").unwrap();

    assert_eq!(buffer.text(), "bc");
    assert_eq!(buffer.caret(0), 1);
}

#[test]
fn test_mapping_cycle_is_an_error() {
    let (mut session, mut buffer) = setup("abc");
    map(&session, MappingModes::NORMAL, "Q", "W", true);
    map(&session, MappingModes::NORMAL, "W", "Q", true);

    let err = session.feed(&mut buffer, "Q").unwrap_err();

    assert!(matches!(err, EngineError::Mapping(MappingError::MappingCycle { .. })));
    assert!(session.pending_keys().is_empty());

    // The session keeps working
    session.feed(&mut buffer, "x").unwrap();
    assert_eq!(buffer.text(), "bc");
}

#[test]
fn test_nop_mapping_does_nothing() {
    let (mut session, mut buffer) = setup("abc");
    map(&session, MappingModes::NORMAL, "x", "<Nop>", true);

    let feedback = session.feed(&mut buffer, "x").unwrap();

    assert_eq!(feedback, Feedback::Done);
    assert_eq!(buffer.text(), "abc");
}

#[test]
fn test_ambiguous_mapping_waits_for_timeout() {
    let (mut session, mut buffer) = setup("one\ntwo");
    map(&session, MappingModes::NORMAL, "Q", "x", false);
    map(&session, MappingModes::NORMAL, "QQ", "dd", false);

    assert_eq!(session.feed(&mut buffer, "Q").unwrap(), Feedback::Pending);
    assert_eq!(session.pending_keys().to_string(), "Q");
    assert_eq!(buffer.text(), "one\ntwo");

    session.timeout(&mut buffer).unwrap();
    assert_eq!(buffer.text(), "ne\ntwo");

    session.feed(&mut buffer, "QQ").unwrap();
    assert_eq!(buffer.text(), "two");
}

#[test]
fn test_timeout_disabled_keeps_waiting() {
    let (mut session, mut buffer) = setup("abc");
    map(&session, MappingModes::NORMAL, "Q", "x", false);
    map(&session, MappingModes::NORMAL, "QQ", "dd", false);
    session
        .engine()
        .options()
        .set("timeout", OptionValue::Toggle(false), Scope::Global)
        .unwrap();

    session.feed(&mut buffer, "Q").unwrap();

    assert_eq!(session.timeout(&mut buffer).unwrap(), Feedback::Pending);
    assert_eq!(buffer.text(), "abc");
}

#[test]
fn test_failed_prefix_replays_keys() {
    let (mut session, mut buffer) = setup("one two");
    map(&session, MappingModes::NORMAL, "dq", "x", false);

    session.feed(&mut buffer, "dw").unwrap();

    assert_eq!(buffer.text(), "two");
}

#[test]
fn test_count_digits_are_not_mapped() {
    let (mut session, mut buffer) = setup("abcd");
    map(&session, MappingModes::NORMAL, "2", "dd", false);

    session.feed(&mut buffer, "2x").unwrap();

    assert_eq!(buffer.text(), "cd");
}

// ============================================================================
// Search Tests
// ============================================================================

#[test]
fn test_search_moves_to_match() {
    let (mut session, mut buffer) = setup("foo bar foo");

    session.feed(&mut buffer, "/bar<CR>").unwrap();

    assert_eq!(buffer.caret(0), 4);
    assert_eq!(session.search_pattern(), Some("bar"));
    assert_eq!(session.mode(), &Mode::Normal);
}

#[test]
fn test_search_wraps_unless_disabled() {
    let (mut session, mut buffer) = setup("foo bar");

    session.feed(&mut buffer, "/foo<CR>").unwrap();
    assert_eq!(buffer.caret(0), 0);

    session.feed(&mut buffer, ":set nowrapscan<CR>").unwrap();
    assert_eq!(session.feed(&mut buffer, "n").unwrap(), Feedback::NoMatch);
}

#[test]
fn test_gn_selects_next_match() {
    let (mut session, mut buffer) = setup("a foo b foo");

    session.feed(&mut buffer, "/foo<CR>0gn").unwrap();

    assert_eq!(session.mode(), &Mode::Visual(SelectionType::Character));
    assert_eq!(buffer.selection(0), Some(TextRange::characterwise(2, 5)));
    assert_eq!(buffer.caret(0), 4);
}

#[test]
fn test_second_gn_extends_selection() {
    let (mut session, mut buffer) = setup("a foo b foo");

    session.feed(&mut buffer, "/foo<CR>0gngn").unwrap();

    assert_eq!(buffer.selection(0), Some(TextRange::characterwise(2, 11)));
    assert_eq!(buffer.caret(0), 10);
}

#[test]
fn test_gn_with_count() {
    let (mut session, mut buffer) = setup("x foo foo foo");

    session.feed(&mut buffer, "/foo<CR>02gn").unwrap();

    assert_eq!(buffer.selected_text(0), Some("foo"));
    assert_eq!(buffer.selection(0), Some(TextRange::characterwise(6, 9)));
}

#[test]
fn test_star_then_gn() {
    let (mut session, mut buffer) = setup("foo bar foo");

    session.feed(&mut buffer, "*").unwrap();
    assert_eq!(buffer.caret(0), 8);

    session.feed(&mut buffer, "gn").unwrap();
    assert_eq!(buffer.selection(0), Some(TextRange::characterwise(8, 11)));
}

#[test]
fn test_star_without_word() {
    let (mut session, mut buffer) = setup("  \nfoo");

    assert_eq!(session.feed(&mut buffer, "*").unwrap(), Feedback::NoMatch);
    assert_eq!(session.search_pattern(), None);
}

#[test]
fn test_gn_without_search() {
    let (mut session, mut buffer) = setup("abc");

    assert_eq!(session.feed(&mut buffer, "gn").unwrap(), Feedback::NoMatch);
    assert_eq!(session.mode(), &Mode::Normal);
}

#[test]
fn test_dgn_and_repeat() {
    let (mut session, mut buffer) = setup("a foo b foo");

    session.feed(&mut buffer, "/foo<CR>0dgn").unwrap();
    assert_eq!(buffer.text(), "a  b foo");
    assert_eq!(session.last_change().unwrap().describe(), "dgn");

    session.feed(&mut buffer, ".").unwrap();
    assert_eq!(buffer.text(), "a  b ");
}

// ============================================================================
// Dot Repeat and Insert Tests
// ============================================================================

#[test]
fn test_dot_repeats_dw() {
    let (mut session, mut buffer) = setup("a b c d");

    session.feed(&mut buffer, "dw.").unwrap();

    assert_eq!(buffer.text(), "c d");
}

#[test]
fn test_dot_count_replaces_recorded_count() {
    let (mut session, mut buffer) = setup("a b c d e f g h i");

    session.feed(&mut buffer, "2dw").unwrap();
    assert_eq!(buffer.text(), "c d e f g h i");

    session.feed(&mut buffer, "3.").unwrap();
    assert_eq!(buffer.text(), "f g h i");

    session.feed(&mut buffer, ".").unwrap();
    assert_eq!(buffer.text(), "i");
}

#[test]
fn test_motions_do_not_replace_last_change() {
    let (mut session, mut buffer) = setup("abc def");

    session.feed(&mut buffer, "xw").unwrap();

    assert_eq!(session.last_change().unwrap().describe(), "x");
}

#[test]
fn test_insert_and_repeat() {
    let (mut session, mut buffer) = setup("ab");

    session.feed(&mut buffer, "ix<Esc>").unwrap();
    assert_eq!(buffer.text(), "xab");
    assert_eq!(buffer.caret(0), 0);

    session.feed(&mut buffer, ".").unwrap();
    assert_eq!(buffer.text(), "xxab");
}

#[test]
fn test_insert_with_count() {
    let (mut session, mut buffer) = setup("ab");

    session.feed(&mut buffer, "3ix<Esc>").unwrap();

    assert_eq!(buffer.text(), "xxxab");
    assert_eq!(buffer.caret(0), 2);
}

#[test]
fn test_insert_is_one_undo_step() {
    let (mut session, mut buffer) = setup("ab");

    session.feed(&mut buffer, "ixy<Esc>").unwrap();

    assert_eq!(buffer.undo_groups(), 1);
}

#[test]
fn test_append_variants() {
    let (mut session, mut buffer) = setup("ab\ncd");

    session.feed(&mut buffer, "aX<Esc>").unwrap();
    assert_eq!(buffer.text(), "aXb\ncd");

    session.feed(&mut buffer, "AY<Esc>").unwrap();
    assert_eq!(buffer.text(), "aXbY\ncd");
}

#[test]
fn test_backspace_in_insert() {
    let (mut session, mut buffer) = setup("abc");

    session.feed(&mut buffer, "A<BS><Esc>").unwrap();

    assert_eq!(buffer.text(), "ab");
    assert_eq!(buffer.caret(0), 1);
}

#[test]
fn test_replace_mode_overwrites() {
    let (mut session, mut buffer) = setup("abc");

    session.feed(&mut buffer, "RXY<Esc>").unwrap();

    assert_eq!(buffer.text(), "XYc");
    assert_eq!(session.mode(), &Mode::Normal);
}

// ============================================================================
// Handler Tests
// ============================================================================

#[test]
fn test_handler_as_operator_motion() {
    let (mut session, mut buffer) = setup("one two");
    bind(&session, "Z", "<Plug>(move)", MoveTo(4));

    session.feed(&mut buffer, "dZ").unwrap();

    assert_eq!(buffer.text(), "two");
    assert_eq!(session.mode(), &Mode::Normal);
}

#[test]
fn test_handler_without_movement_cancels_operator() {
    let (mut session, mut buffer) = setup("one two");
    bind(&session, "Z", "<Plug>(stay)", MoveTo(0));

    let feedback = session.feed(&mut buffer, "dZ").unwrap();

    assert_eq!(feedback, Feedback::NoMatch);
    assert_eq!(session.mode(), &Mode::Normal);
    assert_eq!(buffer.text(), "one two");
}

#[test]
fn test_handler_visual_request_in_operator() {
    let (mut session, mut buffer) = setup("one\ntwo\nthree");
    bind(&session, "Z", "<Plug>(line)", SelectLine);

    session.feed(&mut buffer, "dZ").unwrap();

    assert_eq!(buffer.text(), "three");
}

#[test]
fn test_handler_visual_request_in_normal() {
    let (mut session, mut buffer) = setup("one\ntwo\nthree");
    bind(&session, "Z", "<Plug>(line)", SelectLine);

    session.feed(&mut buffer, "Z").unwrap();

    assert_eq!(session.mode(), &Mode::Visual(SelectionType::Line));
    assert_eq!(buffer.selected_text(0), Some("one\ntwo\n"));
}

#[test]
fn test_handler_failure_resets_session() {
    let (mut session, mut buffer) = setup("abc");
    bind(&session, "Z", "<Plug>(fail)", Fail);

    let err = session.feed(&mut buffer, "dZ").unwrap_err();

    match err {
        EngineError::Handler { name, .. } => assert_eq!(name, "<Plug>(fail)"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.mode(), &Mode::Normal);

    session.feed(&mut buffer, "x").unwrap();
    assert_eq!(buffer.text(), "bc");
}

#[test]
fn test_handler_is_logged() {
    let (mut session, mut buffer) = setup("one two");
    bind(&session, "Z", "<Plug>(move)", MoveTo(4));

    session.feed(&mut buffer, "Z").unwrap();

    let entry = session.event_log().recent().next().unwrap();
    assert_eq!(entry.description, "<Plug>(move)");
    assert!(!entry.is_change);
    assert_eq!(entry.mode, "NORMAL");
}

// ============================================================================
// Command Flag Tests
// ============================================================================

#[test]
fn test_exits_visual_flag_leaves_visual_after_handler() {
    let (mut session, mut buffer) = setup("abcdef");
    command(&session, "gz", MappingModes::VISUAL, Noop, CommandFlags::EXITS_VISUAL);

    session.feed(&mut buffer, "vl").unwrap();
    assert_eq!(session.mode(), &Mode::Visual(SelectionType::Character));

    session.feed(&mut buffer, "gz").unwrap();

    assert_eq!(session.mode(), &Mode::Normal);
    assert_eq!(buffer.selection(0), None);
}

#[test]
fn test_handler_without_exits_visual_keeps_selection() {
    let (mut session, mut buffer) = setup("abcdef");
    command(&session, "gz", MappingModes::VISUAL, Noop, CommandFlags::empty());

    session.feed(&mut buffer, "vlgz").unwrap();

    assert_eq!(session.mode(), &Mode::Visual(SelectionType::Character));
}

#[test]
fn test_exits_visual_waits_for_delayed_completion() {
    let (mut session, mut buffer) = setup("abcdef");
    let slot = Arc::new(Mutex::new(None));
    command(
        &session,
        "gz",
        MappingModes::VISUAL,
        Deferred { slot: slot.clone() },
        CommandFlags::EXITS_VISUAL,
    );

    assert_eq!(session.feed(&mut buffer, "vlgz").unwrap(), Feedback::Suspended);
    assert_eq!(session.mode(), &Mode::Visual(SelectionType::Character));

    slot.lock().take().unwrap().resume();
    session.pump(&mut buffer).unwrap();

    assert_eq!(session.mode(), &Mode::Normal);
}

#[test]
fn test_operator_without_exits_visual_keeps_visual() {
    let (mut session, mut buffer) = setup("abcdef");
    let spec = CommandSpec::new(
        KeySequence::parse("gy").unwrap(),
        MappingModes::VISUAL,
        CommandType::Operator,
        CommandAction::Operator(Operator::Yank),
    );
    session.engine().commands_mut().register(spec);

    session.feed(&mut buffer, "vlgy").unwrap();

    assert_eq!(buffer.registers().unnamed().unwrap().text, "ab");
    assert_eq!(session.mode(), &Mode::Visual(SelectionType::Character));
}

#[test]
fn test_expect_more_keys_holds_pending() {
    let (mut session, mut buffer) = setup("abc");
    command(&session, "gp", MappingModes::NORMAL, Noop, CommandFlags::EXPECT_MORE_KEYS);

    assert_eq!(session.feed(&mut buffer, "gp").unwrap(), Feedback::Pending);
    assert_eq!(session.timeout(&mut buffer).unwrap(), Feedback::Pending);

    assert_eq!(session.feed(&mut buffer, "x").unwrap(), Feedback::Done);
    assert_eq!(buffer.text(), "bc");
    assert_eq!(session.last_change().unwrap().describe(), "gpx");
}

#[test]
fn test_expect_more_keys_cleared_by_reset() {
    let (mut session, mut buffer) = setup("abc");
    command(&session, "gp", MappingModes::NORMAL, Noop, CommandFlags::EXPECT_MORE_KEYS);

    session.feed(&mut buffer, "gp").unwrap();
    session.reset(&mut buffer);

    assert_eq!(session.feed(&mut buffer, "l").unwrap(), Feedback::Done);
}

#[test]
fn test_clear_strokes_restarts_recording() {
    let (mut session, mut buffer) = setup("x");
    map(&session, MappingModes::NORMAL, "Q", "ifoo<Esc>abar<Esc>", false);

    session.feed(&mut buffer, "Q").unwrap();
    assert_eq!(buffer.text(), "foobarx");
    assert_eq!(session.last_change().unwrap().describe(), "abar<Esc>");

    session.feed(&mut buffer, ".").unwrap();
    assert_eq!(buffer.text(), "foobarbarx");
}

#[test]
fn test_clear_strokes_keeps_register_prefix() {
    let (mut session, mut buffer) = setup("one two");

    session.feed(&mut buffer, "\"acwxy<Esc>").unwrap();

    assert_eq!(buffer.text(), "xy two");
    assert_eq!(buffer.registers().get('a').unwrap().text, "one");
    assert_eq!(session.last_change().unwrap().describe(), "\"acwxy<Esc>");
}

// ============================================================================
// Delayed Completion Tests
// ============================================================================

#[test]
fn test_continuation_suspends_and_queues() {
    let (mut session, mut buffer) = setup("abcd");
    let slot = deferred(&session);

    assert_eq!(session.feed(&mut buffer, "Z").unwrap(), Feedback::Suspended);
    assert!(session.is_suspended());

    assert_eq!(session.feed(&mut buffer, "x").unwrap(), Feedback::Queued);
    assert_eq!(buffer.text(), "abcd");
    assert_eq!(session.pump(&mut buffer).unwrap(), Feedback::Suspended);

    let continuation = slot.lock().take().unwrap();
    continuation.resume_with(|host| host.set_caret(0, 2));

    assert_eq!(session.pump(&mut buffer).unwrap(), Feedback::Done);
    assert!(!session.is_suspended());
    assert_eq!(buffer.text(), "abd");
}

#[test]
fn test_continuation_in_operator_pending() {
    let (mut session, mut buffer) = setup("one two");
    let slot = deferred(&session);

    assert_eq!(session.feed(&mut buffer, "dZ").unwrap(), Feedback::Suspended);

    let continuation = slot.lock().take().unwrap();
    continuation.resume_with(|host| host.set_caret(0, 4));
    session.pump(&mut buffer).unwrap();

    assert_eq!(buffer.text(), "two");
    assert_eq!(session.mode(), &Mode::Normal);
}

#[test]
fn test_pump_blocking_waits_for_other_thread() {
    let (mut session, mut buffer) = setup("abc");
    let slot = deferred(&session);
    session.feed(&mut buffer, "Z").unwrap();

    let continuation = slot.lock().take().unwrap();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        continuation.resume();
    });

    let feedback = session
        .pump_blocking(&mut buffer, Duration::from_secs(5))
        .unwrap();
    worker.join().unwrap();

    assert_eq!(feedback, Feedback::Done);
    assert!(!session.is_suspended());
}

#[test]
fn test_abandon_drops_queued_keys() {
    let (mut session, mut buffer) = setup("abc");
    let slot = deferred(&session);
    session.feed(&mut buffer, "Zx").unwrap();

    assert!(session.abandon_delayed(&mut buffer));
    assert!(!session.is_suspended());
    assert_eq!(session.mode(), &Mode::Normal);

    // A late resume is ignored
    slot.lock().take().unwrap().resume();
    assert_eq!(session.pump(&mut buffer).unwrap(), Feedback::Done);
    assert_eq!(buffer.text(), "abc");
    assert!(!session.abandon_delayed(&mut buffer));
}

#[test]
fn test_unclaimed_continuation_completes_immediately() {
    let (mut session, mut buffer) = setup("abc");
    bind(&session, "Z", "<Plug>(forgetful)", Forgetful);

    let feedback = session.feed(&mut buffer, "Z").unwrap();

    assert_eq!(feedback, Feedback::Done);
    assert!(!session.is_suspended());
    assert_eq!(buffer.caret(0), 1);
}

// ============================================================================
// Command Line, Register and Jump Tests
// ============================================================================

#[test]
fn test_colon_runs_set() {
    let (mut session, mut buffer) = setup("abc");

    session.feed(&mut buffer, ":").unwrap();
    assert_eq!(session.mode(), &Mode::CommandLine);

    let feedback = session.feed(&mut buffer, "set maxmapdepth=5<CR>").unwrap();

    assert_eq!(feedback, Feedback::Done);
    assert_eq!(session.mode(), &Mode::Normal);
    assert_eq!(
        session.engine().options().number("maxmapdepth", Scope::Global),
        Some(5)
    );
}

#[test]
fn test_colon_error_is_no_match() {
    let (mut session, mut buffer) = setup("abc");

    let feedback = session.feed(&mut buffer, ":frobnicate<CR>").unwrap();

    assert_eq!(feedback, Feedback::NoMatch);
    assert_eq!(session.mode(), &Mode::Normal);
}

#[test]
fn test_command_line_escape_cancels() {
    let (mut session, mut buffer) = setup("abc");

    session.feed(&mut buffer, ":set nowrapscan<Esc>").unwrap();

    assert_eq!(session.mode(), &Mode::Normal);
    assert!(session.engine().options().is_set("wrapscan", Scope::Global));
}

#[test]
fn test_named_register() {
    let (mut session, mut buffer) = setup("one\ntwo");

    session.feed(&mut buffer, "\"add").unwrap();

    assert_eq!(buffer.registers().get('a').unwrap().text, "one\n");
    assert_eq!(buffer.text(), "two");
}

#[test]
fn test_jump_back_and_forward() {
    let (mut session, mut buffer) = setup("one\ntwo\nthree");

    session.feed(&mut buffer, "G").unwrap();
    assert_eq!(buffer.caret(0), 8);

    session.feed(&mut buffer, "<C-O>").unwrap();
    assert_eq!(buffer.caret(0), 0);

    session.feed(&mut buffer, "<C-I>").unwrap();
    assert_eq!(buffer.caret(0), 8);
}

#[test]
fn test_scroll_commands_reach_host() {
    let (mut session, mut buffer) = setup("abc");

    session.feed(&mut buffer, "3<C-E>").unwrap();

    assert_eq!(buffer.scrolls(), &[(ScrollKind::LineDown, 3)]);
}

#[test]
fn test_reset_clears_pending_state() {
    let (mut session, mut buffer) = setup("abc");

    session.feed(&mut buffer, "2d").unwrap();
    session.reset(&mut buffer);

    assert_eq!(session.mode(), &Mode::Normal);
    assert_eq!(session.count(), None);
    assert_eq!(session.feed(&mut buffer, "x").unwrap(), Feedback::Done);
    assert_eq!(buffer.text(), "bc");
}

// ============================================================================
// Multiple Caret Tests
// ============================================================================

#[test]
fn test_x_at_every_caret() {
    let mut buffer = StringBuffer::with_carets("ab\nab\nab", &[0, 3, 6]);
    let mut session = EngineContext::new().session();

    session.feed(&mut buffer, "x").unwrap();

    assert_eq!(buffer.text(), "b\nb\nb");
    assert_eq!(buffer.carets(), &[0, 2, 4]);
}

#[test]
fn test_insert_at_every_caret() {
    let mut buffer = StringBuffer::with_carets("a\nb", &[0, 2]);
    let mut session = EngineContext::new().session();

    session.feed(&mut buffer, "iX<Esc>").unwrap();

    assert_eq!(buffer.text(), "Xa\nXb");
    assert_eq!(buffer.carets(), &[0, 3]);
}

#[test]
fn test_sessions_share_mappings() {
    let engine = EngineContext::new();
    let mut first = engine.session();
    let mut second = engine.session();
    map(&first, MappingModes::NORMAL, "Q", "x", false);

    let mut a = StringBuffer::new("abc");
    let mut b = StringBuffer::new("abc");
    first.feed(&mut a, "Q").unwrap();
    second.feed(&mut b, "Q").unwrap();

    assert_eq!(a.text(), "bc");
    assert_eq!(b.text(), "bc");
    assert_ne!(first.id(), second.id());
}
