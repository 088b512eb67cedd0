//! The builtin command set

use crate::key::KeySequence;
use crate::mode::{MappingModes, SelectionType};
use crate::motion::Motion;

use super::{
    ArgumentKind, Builtin, CommandAction, CommandFlags, CommandSpec, CommandType, Operator,
    ScrollKind,
};

const N: MappingModes = MappingModes::NORMAL;
const X: MappingModes = MappingModes::VISUAL;
const S: MappingModes = MappingModes::SELECT;
const O: MappingModes = MappingModes::OP_PENDING;
const I: MappingModes = MappingModes::INSERT;
const C: MappingModes = MappingModes::CMD_LINE;

fn keys(notation: &str) -> KeySequence {
    // Builtin notation is static and always well-formed
    KeySequence::parse(notation).unwrap_or_default()
}

fn motion(notation: &str, modes: MappingModes, motion: Motion) -> CommandSpec {
    CommandSpec::new(keys(notation), modes, CommandType::Motion, CommandAction::Motion(motion))
}

fn operator(notation: &str, modes: MappingModes, op: Operator) -> CommandSpec {
    CommandSpec::new(keys(notation), modes, CommandType::Operator, CommandAction::Operator(op))
        .with_flags(CommandFlags::EXITS_VISUAL | CommandFlags::MULTIKEY_UNDO)
}

fn builtin(notation: &str, modes: MappingModes, kind: CommandType, action: Builtin) -> CommandSpec {
    CommandSpec::new(keys(notation), modes, kind, CommandAction::Builtin(action))
}

/// Every builtin command
pub fn builtin_commands() -> Vec<CommandSpec> {
    let nxo = N | X | O;
    let arrows = N | X | S | O;
    let jump = CommandFlags::SAVE_JUMP_POSITION;
    let find = CommandFlags::ALLOW_DIGRAPH;
    let insert = CommandFlags::CLEAR_STROKES | CommandFlags::MULTIKEY_UNDO;
    let scroll = CommandFlags::IGNORE_SCROLL_JUMP;

    vec![
        // ====================================================================
        // Motions
        // ====================================================================
        motion("h", nxo, Motion::Left),
        motion("l", nxo, Motion::Right),
        motion("j", nxo, Motion::Down).with_flags(CommandFlags::MOTION_LINEWISE),
        motion("k", nxo, Motion::Up).with_flags(CommandFlags::MOTION_LINEWISE),
        motion("<Left>", arrows, Motion::Left),
        motion("<Right>", arrows, Motion::Right),
        motion("<Down>", arrows, Motion::Down).with_flags(CommandFlags::MOTION_LINEWISE),
        motion("<Up>", arrows, Motion::Up).with_flags(CommandFlags::MOTION_LINEWISE),
        motion("w", nxo, Motion::WordForward),
        motion("b", nxo, Motion::WordBackward),
        motion("e", nxo, Motion::WordEnd),
        motion("0", nxo, Motion::LineStart),
        motion("<Home>", arrows, Motion::LineStart),
        motion("$", nxo, Motion::LineEnd),
        motion("<End>", arrows, Motion::LineEnd),
        motion("gg", nxo, Motion::FirstLine)
            .with_flags(CommandFlags::MOTION_LINEWISE | jump),
        motion("G", nxo, Motion::LastLine).with_flags(CommandFlags::MOTION_LINEWISE | jump),
        motion("f", nxo, Motion::FindForward)
            .with_flags(find)
            .with_argument(ArgumentKind::Character),
        motion("t", nxo, Motion::TillForward)
            .with_flags(find)
            .with_argument(ArgumentKind::Character),
        motion("F", nxo, Motion::FindBackward)
            .with_flags(find)
            .with_argument(ArgumentKind::Character),
        motion("T", nxo, Motion::TillBackward)
            .with_flags(find)
            .with_argument(ArgumentKind::Character),
        motion("/", nxo, Motion::SearchForward)
            .with_flags(jump)
            .with_argument(ArgumentKind::ExString),
        motion("?", nxo, Motion::SearchBackward)
            .with_flags(jump)
            .with_argument(ArgumentKind::ExString),
        motion("n", nxo, Motion::SearchNext).with_flags(jump),
        motion("N", nxo, Motion::SearchPrevious).with_flags(jump),
        motion("*", nxo, Motion::SearchWordForward).with_flags(jump),
        // ====================================================================
        // Operators
        // ====================================================================
        operator("d", N | X, Operator::Delete),
        operator("y", N | X, Operator::Yank),
        operator("c", N | X, Operator::Change)
            .with_flags(CommandFlags::NO_REPEAT_INSERT | CommandFlags::CLEAR_STROKES),
        operator("x", X, Operator::Delete),
        operator("<Del>", X, Operator::Delete),
        operator("s", X, Operator::Change)
            .with_flags(CommandFlags::NO_REPEAT_INSERT | CommandFlags::CLEAR_STROKES),
        // ====================================================================
        // Simple edits
        // ====================================================================
        builtin("x", N, CommandType::Other, Builtin::DeleteChar)
            .with_flags(CommandFlags::MULTIKEY_UNDO),
        builtin("<Del>", N, CommandType::Other, Builtin::DeleteChar)
            .with_flags(CommandFlags::MULTIKEY_UNDO),
        builtin("X", N, CommandType::Other, Builtin::DeleteCharBefore)
            .with_flags(CommandFlags::MULTIKEY_UNDO),
        builtin("s", N, CommandType::InsertLike, Builtin::SubstituteChar)
            .with_flags(insert | CommandFlags::NO_REPEAT_INSERT),
        builtin("r", N, CommandType::Other, Builtin::ReplaceChar)
            .with_flags(CommandFlags::ALLOW_DIGRAPH | CommandFlags::MULTIKEY_UNDO)
            .with_argument(ArgumentKind::Character),
        // ====================================================================
        // Insert and replace
        // ====================================================================
        builtin("i", N, CommandType::InsertLike, Builtin::InsertBefore).with_flags(insert),
        builtin("<Insert>", N, CommandType::InsertLike, Builtin::InsertBefore).with_flags(insert),
        builtin("a", N, CommandType::InsertLike, Builtin::InsertAfter).with_flags(insert),
        builtin("I", N, CommandType::InsertLike, Builtin::InsertLineStart).with_flags(insert),
        builtin("A", N, CommandType::InsertLike, Builtin::InsertLineEnd).with_flags(insert),
        builtin("R", N, CommandType::InsertLike, Builtin::ReplaceMode).with_flags(insert),
        builtin("<C-K>", I, CommandType::Other, Builtin::InsertDigraph)
            .with_flags(CommandFlags::SAVE_STROKE)
            .with_argument(ArgumentKind::Digraph),
        builtin("<BS>", I, CommandType::Other, Builtin::InsertBackspace)
            .with_flags(CommandFlags::SAVE_STROKE),
        // ====================================================================
        // Visual and Select
        // ====================================================================
        builtin("v", N | X, CommandType::Other, Builtin::ToggleVisual(SelectionType::Character)),
        builtin("V", N | X, CommandType::Other, Builtin::ToggleVisual(SelectionType::Line)),
        builtin("<C-V>", N | X, CommandType::Other, Builtin::ToggleVisual(SelectionType::Block)),
        builtin("gh", N, CommandType::Other, Builtin::EnterSelect(SelectionType::Character)),
        builtin("gH", N, CommandType::Other, Builtin::EnterSelect(SelectionType::Line)),
        builtin("g<C-H>", N, CommandType::Other, Builtin::EnterSelect(SelectionType::Block)),
        builtin("<C-G>", X | S, CommandType::Other, Builtin::SwapVisualSelect),
        builtin("gn", nxo, CommandType::Other, Builtin::SelectNextMatch),
        builtin("gN", nxo, CommandType::Other, Builtin::SelectPreviousMatch),
        // ====================================================================
        // Command line
        // ====================================================================
        builtin(":", N | X, CommandType::Other, Builtin::ExCommand)
            .with_argument(ArgumentKind::ExString),
        builtin("<CR>", C, CommandType::Other, Builtin::CompleteExInput)
            .with_flags(CommandFlags::COMPLETES_EX_INPUT),
        // ====================================================================
        // Misc
        // ====================================================================
        builtin(".", N, CommandType::Other, Builtin::RepeatChange),
        builtin("\"", N | X, CommandType::Other, Builtin::SelectRegister)
            .with_flags(CommandFlags::EXPECT_MORE_KEYS)
            .with_argument(ArgumentKind::Character),
        builtin("<C-O>", N, CommandType::Other, Builtin::JumpBack),
        builtin("<C-I>", N, CommandType::Other, Builtin::JumpForward),
        builtin("<Tab>", N, CommandType::Other, Builtin::JumpForward),
        builtin("<C-E>", N | X, CommandType::Other, Builtin::Scroll(ScrollKind::LineDown))
            .with_flags(scroll),
        builtin("<C-Y>", N | X, CommandType::Other, Builtin::Scroll(ScrollKind::LineUp))
            .with_flags(scroll),
        builtin("<C-D>", N | X, CommandType::Other, Builtin::Scroll(ScrollKind::HalfPageDown))
            .with_flags(scroll),
        builtin("<C-U>", N | X, CommandType::Other, Builtin::Scroll(ScrollKind::HalfPageUp))
            .with_flags(scroll),
        builtin("<Esc>", N | X | S | O | I | C, CommandType::Other, Builtin::Escape),
    ]
}
