//! Operator range composition: turns a motion or selection into the range an
//! operator acts on, and places the caret afterwards.

use crate::command::{MotionType, Operator};
use crate::host::{RangeKind, TextRange};
use crate::mode::SelectionType;
use crate::motion::{
    char_len_at, clamp_normal, column, first_non_blank, line_end, line_index, line_start,
    line_start_of, offset_at_column,
};

/// Offset just past the newline ending `pos`'s line (text length on the
/// last line)
fn after_line(text: &str, pos: usize) -> usize {
    let end = line_end(text, pos);
    if end < text.len() {
        end + 1
    } else {
        end
    }
}

fn linewise(text: &str, a: usize, b: usize) -> TextRange {
    let (lo, hi) = (a.min(b), a.max(b));
    TextRange::new(line_start(text, lo), after_line(text, hi), RangeKind::Linewise)
}

/// Range covered by moving from `from` to `to` with a motion of `kind`
pub fn motion_range(text: &str, from: usize, to: usize, kind: MotionType) -> TextRange {
    let (lo, hi) = (from.min(to), from.max(to));
    match kind {
        MotionType::Exclusive => TextRange::characterwise(lo, hi),
        MotionType::Inclusive => TextRange::characterwise(lo, hi + char_len_at(text, hi)),
        MotionType::LineWise => linewise(text, lo, hi),
    }
}

/// Range of a Visual selection between `anchor` and `caret`
pub fn selection_range(
    text: &str,
    anchor: usize,
    caret: usize,
    selection: SelectionType,
) -> TextRange {
    let (lo, hi) = (anchor.min(caret), anchor.max(caret));
    match selection {
        SelectionType::Character => {
            TextRange::characterwise(lo, (hi + char_len_at(text, hi)).min(text.len()))
        }
        SelectionType::Line => linewise(text, lo, hi),
        SelectionType::Block => TextRange::new(lo, hi + char_len_at(text, hi), RangeKind::Blockwise),
    }
}

/// Per-line spans `[start, end)` of a block range
pub fn block_spans(text: &str, range: &TextRange) -> Vec<(usize, usize)> {
    let first = line_index(text, range.start);
    let last_char = range.end.saturating_sub(1).max(range.start);
    let last = line_index(text, last_char);
    let (c1, c2) = (column(text, range.start), column(text, last_char));
    let (left, right) = (c1.min(c2), c1.max(c2));

    (first..=last)
        .filter_map(|line| line_start_of(text, line))
        .map(|start| {
            let lo = offset_at_column(text, start, left, true);
            let hi = offset_at_column(text, start, right + 1, true);
            (lo, hi)
        })
        .collect()
}

/// `d2w` style counts multiply; a missing count is 1
pub fn effective_count(operator_count: Option<usize>, motion_count: Option<usize>) -> Option<usize> {
    match (operator_count, motion_count) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(1) * b.unwrap_or(1)),
    }
}

/// Range of a doubled operator (`dd`, `3yy`): `count` lines from the caret's
/// line, clamped to the end of the text
pub fn doubled_operator_range(text: &str, caret: usize, count: Option<usize>) -> TextRange {
    let line = line_index(text, caret);
    let last = line_index(text, text.len());
    let target = (line + count.unwrap_or(1).max(1) - 1).min(last);
    let end_start = line_start_of(text, target).unwrap_or(caret);
    linewise(text, caret, end_start)
}

/// Caret after `operator` ran over `range`. `text` is the text after the
/// operation; `caret` is the caret before it.
pub fn caret_after_operator(text: &str, operator: Operator, range: &TextRange, caret: usize) -> usize {
    let start = range.start.min(text.len());
    match (operator, range.kind) {
        (Operator::Change, _) => start,
        (Operator::Delete, RangeKind::Linewise) => first_non_blank(text, line_start(text, start)),
        (Operator::Delete, _) => clamp_normal(text, start),
        (Operator::Yank, RangeKind::Linewise) => {
            if line_start(text, caret) <= range.start {
                caret
            } else {
                offset_at_column(text, range.start, column(text, caret), false)
            }
        }
        (Operator::Yank, _) => start,
    }
}
