//! Text motions over a plain `&str`.
//!
//! Offsets are byte offsets on char boundaries. A motion returns the new
//! caret offset, or `None` when it cannot move at all (which cancels a
//! pending operator).

use serde::Serialize;

use crate::command::MotionType;

/// Builtin motions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Motion {
    Left,
    Right,
    Down,
    Up,
    WordForward,
    WordBackward,
    WordEnd,
    LineStart,
    LineEnd,
    /// `gg`
    FirstLine,
    /// `G`
    LastLine,
    /// `f{char}`
    FindForward,
    /// `t{char}`
    TillForward,
    /// `F{char}`
    FindBackward,
    /// `T{char}`
    TillBackward,
    /// `/pattern`
    SearchForward,
    /// `?pattern`
    SearchBackward,
    /// `n`
    SearchNext,
    /// `N`
    SearchPrevious,
    /// `*`
    SearchWordForward,
}

impl Motion {
    pub fn motion_type(&self) -> MotionType {
        match self {
            Motion::WordEnd | Motion::LineEnd | Motion::FindForward | Motion::TillForward => {
                MotionType::Inclusive
            }
            Motion::Down | Motion::Up | Motion::FirstLine | Motion::LastLine => MotionType::LineWise,
            _ => MotionType::Exclusive,
        }
    }

    /// Motions resolved by the search state instead of [`Motion::apply`]
    pub fn is_search(&self) -> bool {
        matches!(
            self,
            Motion::SearchForward
                | Motion::SearchBackward
                | Motion::SearchNext
                | Motion::SearchPrevious
                | Motion::SearchWordForward
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Motion::Left => "left",
            Motion::Right => "right",
            Motion::Down => "down",
            Motion::Up => "up",
            Motion::WordForward => "word forward",
            Motion::WordBackward => "word backward",
            Motion::WordEnd => "word end",
            Motion::LineStart => "line start",
            Motion::LineEnd => "line end",
            Motion::FirstLine => "first line",
            Motion::LastLine => "last line",
            Motion::FindForward => "find char",
            Motion::TillForward => "till char",
            Motion::FindBackward => "find char backward",
            Motion::TillBackward => "till char backward",
            Motion::SearchForward => "search forward",
            Motion::SearchBackward => "search backward",
            Motion::SearchNext => "search next",
            Motion::SearchPrevious => "search previous",
            Motion::SearchWordForward => "search word",
        }
    }

    /// Apply a text motion. Search motions always return `None` here.
    pub fn apply(&self, input: &MotionInput<'_>) -> Option<usize> {
        let text = input.text;
        let caret = input.caret.min(text.len());
        let n = input.count.unwrap_or(1).max(1);

        match self {
            Motion::Left => {
                let start = line_start(text, caret);
                let mut pos = caret;
                for _ in 0..n {
                    if pos <= start {
                        break;
                    }
                    pos = prev_char(text, pos);
                }
                (pos != caret).then_some(pos)
            }
            Motion::Right => {
                let end = line_end(text, caret);
                let limit = if input.op_pending {
                    end
                } else {
                    prev_char(text, end).max(line_start(text, caret))
                };
                let mut pos = caret;
                for _ in 0..n {
                    if pos >= limit {
                        break;
                    }
                    pos = next_char(text, pos);
                }
                (pos != caret).then_some(pos)
            }
            Motion::Down | Motion::Up => {
                let line = line_index(text, caret);
                let last = line_count(text) - 1;
                let target = if *self == Motion::Down {
                    (line + n).min(last)
                } else {
                    line.saturating_sub(n)
                };
                if target == line {
                    return None;
                }
                let col = column(text, caret);
                let start = line_start_of(text, target)?;
                Some(offset_at_column(text, start, col, input.op_pending))
            }
            Motion::WordForward => word_forward(text, caret, n, input.op_pending),
            Motion::WordBackward => {
                let mut pos = caret;
                for _ in 0..n {
                    match word_backward_step(text, pos) {
                        Some(next) => pos = next,
                        None => break,
                    }
                }
                (pos != caret).then_some(pos)
            }
            Motion::WordEnd => {
                let mut pos = caret;
                for _ in 0..n {
                    match word_end_step(text, pos) {
                        Some(next) => pos = next,
                        None => break,
                    }
                }
                (pos != caret).then_some(pos)
            }
            Motion::LineStart => Some(line_start(text, caret)),
            Motion::LineEnd => {
                let line = (line_index(text, caret) + n - 1).min(line_count(text) - 1);
                let start = line_start_of(text, line)?;
                let end = line_end(text, start);
                if end == start {
                    // Nothing to operate on in an empty line
                    return (!input.op_pending).then_some(start);
                }
                Some(prev_char(text, end))
            }
            Motion::FirstLine | Motion::LastLine => {
                let last = line_count(text) - 1;
                let line = match (self, input.count) {
                    (_, Some(count)) => count.max(1).min(last + 1) - 1,
                    (Motion::FirstLine, None) => 0,
                    _ => last,
                };
                let start = line_start_of(text, line)?;
                Some(first_non_blank(text, start))
            }
            Motion::FindForward | Motion::TillForward => {
                let target = input.argument?;
                let end = line_end(text, caret);
                let mut found = None;
                let mut remaining = n;
                for (i, c) in text[caret..end].char_indices().skip(1) {
                    if c == target {
                        remaining -= 1;
                        if remaining == 0 {
                            found = Some(caret + i);
                            break;
                        }
                    }
                }
                let pos = found?;
                Some(if *self == Motion::TillForward {
                    prev_char(text, pos)
                } else {
                    pos
                })
            }
            Motion::FindBackward | Motion::TillBackward => {
                let target = input.argument?;
                let start = line_start(text, caret);
                let mut found = None;
                let mut remaining = n;
                for (i, c) in text[start..caret].char_indices().rev() {
                    if c == target {
                        remaining -= 1;
                        if remaining == 0 {
                            found = Some(start + i);
                            break;
                        }
                    }
                }
                let pos = found?;
                Some(if *self == Motion::TillBackward {
                    next_char(text, pos)
                } else {
                    pos
                })
            }
            Motion::SearchForward
            | Motion::SearchBackward
            | Motion::SearchNext
            | Motion::SearchPrevious
            | Motion::SearchWordForward => None,
        }
    }
}

/// Everything a text motion needs
#[derive(Debug, Clone, Copy)]
pub struct MotionInput<'a> {
    pub text: &'a str,
    pub caret: usize,
    pub count: Option<usize>,
    /// Character argument for `f`/`t`/`F`/`T`
    pub argument: Option<char>,
    /// Motions feeding an operator may land past the last character
    pub op_pending: bool,
}

impl<'a> MotionInput<'a> {
    pub fn new(text: &'a str, caret: usize) -> Self {
        Self {
            text,
            caret,
            count: None,
            argument: None,
            op_pending: false,
        }
    }
}

// ============================================================================
// Words
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Blank,
    Keyword,
    Punctuation,
}

fn class(c: char) -> CharClass {
    if c.is_whitespace() {
        CharClass::Blank
    } else if is_keyword(c) {
        CharClass::Keyword
    } else {
        CharClass::Punctuation
    }
}

/// Characters that make up a keyword (`iskeyword` default)
pub fn is_keyword(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn char_at(text: &str, pos: usize) -> Option<char> {
    text.get(pos..)?.chars().next()
}

fn is_empty_line_at(text: &str, pos: usize) -> bool {
    char_at(text, pos) == Some('\n') && (pos == 0 || text.as_bytes()[pos - 1] == b'\n')
}

fn word_forward(text: &str, caret: usize, count: usize, op_pending: bool) -> Option<usize> {
    let mut pos = caret;
    for step in 0..count {
        let Some(next) = word_forward_step(text, pos) else {
            break;
        };
        if op_pending && step + 1 == count {
            // The last word moved over ends the range at its line end
            if let Some(nl) = text[pos..next].find('\n') {
                if nl > 0 {
                    return Some(pos + nl);
                }
            }
        }
        pos = next;
    }
    if !op_pending {
        pos = clamp_normal(text, pos);
    }
    (pos != caret).then_some(pos)
}

fn word_forward_step(text: &str, pos: usize) -> Option<usize> {
    let c = char_at(text, pos)?;
    let cls = class(c);
    let mut i = pos;
    if cls != CharClass::Blank {
        while let Some(ch) = char_at(text, i) {
            if class(ch) != cls {
                break;
            }
            i += ch.len_utf8();
        }
    }
    while let Some(ch) = char_at(text, i) {
        if ch == '\n' {
            i += 1;
            if is_empty_line_at(text, i) {
                return Some(i);
            }
        } else if ch.is_whitespace() {
            i += ch.len_utf8();
        } else {
            break;
        }
    }
    Some(i)
}

fn word_backward_step(text: &str, pos: usize) -> Option<usize> {
    if pos == 0 {
        return None;
    }
    let mut i = prev_char(text, pos);
    while let Some(ch) = char_at(text, i) {
        if class(ch) != CharClass::Blank || i == 0 {
            break;
        }
        if is_empty_line_at(text, i) {
            return Some(i);
        }
        i = prev_char(text, i);
    }
    let cls = class(char_at(text, i)?);
    if cls == CharClass::Blank {
        return Some(i);
    }
    while i > 0 {
        let before = prev_char(text, i);
        match char_at(text, before) {
            Some(ch) if class(ch) == cls => i = before,
            _ => break,
        }
    }
    Some(i)
}

fn word_end_step(text: &str, pos: usize) -> Option<usize> {
    let mut i = next_char(text, pos);
    while let Some(ch) = char_at(text, i) {
        if !ch.is_whitespace() {
            break;
        }
        i += ch.len_utf8();
    }
    let cls = class(char_at(text, i)?);
    loop {
        let next = next_char(text, i);
        match char_at(text, next) {
            Some(ch) if class(ch) == cls => i = next,
            _ => break,
        }
    }
    Some(i)
}

/// Keyword under or after `pos` on the same line, as a byte range
pub fn keyword_at(text: &str, pos: usize) -> Option<(usize, usize)> {
    let end_of_line = line_end(text, pos);
    let mut start = pos;
    while start < end_of_line && !char_at(text, start).is_some_and(is_keyword) {
        start = next_char(text, start);
    }
    if start >= end_of_line {
        return None;
    }
    while start > 0 {
        let before = prev_char(text, start);
        if char_at(text, before).is_some_and(is_keyword) {
            start = before;
        } else {
            break;
        }
    }
    let mut end = start;
    while let Some(ch) = char_at(text, end) {
        if !is_keyword(ch) {
            break;
        }
        end += ch.len_utf8();
    }
    Some((start, end))
}

// ============================================================================
// Lines and characters
// ============================================================================

pub fn next_char(text: &str, pos: usize) -> usize {
    match char_at(text, pos) {
        Some(c) => pos + c.len_utf8(),
        None => text.len(),
    }
}

pub fn prev_char(text: &str, pos: usize) -> usize {
    let pos = pos.min(text.len());
    text[..pos].char_indices().next_back().map(|(i, _)| i).unwrap_or(0)
}

/// Byte length of the character at `pos` (0 at the end of the text)
pub fn char_len_at(text: &str, pos: usize) -> usize {
    char_at(text, pos).map(char::len_utf8).unwrap_or(0)
}

pub fn line_start(text: &str, pos: usize) -> usize {
    let pos = pos.min(text.len());
    text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

/// Offset of the line's newline, or the text length on the last line
pub fn line_end(text: &str, pos: usize) -> usize {
    let pos = pos.min(text.len());
    text[pos..].find('\n').map(|i| pos + i).unwrap_or(text.len())
}

/// Zero-based line number of `pos`
pub fn line_index(text: &str, pos: usize) -> usize {
    text[..pos.min(text.len())].matches('\n').count()
}

pub fn line_count(text: &str) -> usize {
    text.matches('\n').count() + 1
}

pub fn line_start_of(text: &str, line: usize) -> Option<usize> {
    if line == 0 {
        return Some(0);
    }
    text.match_indices('\n').nth(line - 1).map(|(i, _)| i + 1)
}

/// Character column of `pos` within its line
pub fn column(text: &str, pos: usize) -> usize {
    let pos = pos.min(text.len());
    text[line_start(text, pos)..pos].chars().count()
}

/// Offset of `col` in the line starting at `start`, clamped to the line
pub fn offset_at_column(text: &str, start: usize, col: usize, past_end: bool) -> usize {
    let end = line_end(text, start);
    let offset = text[start..end]
        .char_indices()
        .nth(col)
        .map(|(i, _)| start + i)
        .unwrap_or(end);
    if past_end {
        offset
    } else {
        clamp_normal(text, offset)
    }
}

pub fn first_non_blank(text: &str, start: usize) -> usize {
    let end = line_end(text, start);
    text[start..end]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| start + i)
        .unwrap_or_else(|| clamp_normal(text, end))
}

/// Keep a Normal-mode caret on a character: never on a line's newline
/// unless the line is empty.
pub fn clamp_normal(text: &str, pos: usize) -> usize {
    let pos = pos.min(text.len());
    let start = line_start(text, pos);
    let end = line_end(text, pos);
    if pos >= end && end > start {
        prev_char(text, end)
    } else {
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(motion: Motion, text: &str, caret: usize) -> Option<usize> {
        motion.apply(&MotionInput::new(text, caret))
    }

    fn run_op(motion: Motion, text: &str, caret: usize, count: Option<usize>) -> Option<usize> {
        motion.apply(&MotionInput {
            count,
            op_pending: true,
            ..MotionInput::new(text, caret)
        })
    }

    #[test]
    fn test_word_forward() {
        assert_eq!(run(Motion::WordForward, "hello world", 0), Some(6));
        assert_eq!(run(Motion::WordForward, "foo.bar baz", 0), Some(3));
        assert_eq!(run(Motion::WordForward, "foo.bar baz", 3), Some(4));
    }

    #[test]
    fn test_word_forward_stops_at_empty_line() {
        assert_eq!(run(Motion::WordForward, "ab\n\ncd", 0), Some(3));
    }

    #[test]
    fn test_word_forward_op_reaches_text_end() {
        assert_eq!(run_op(Motion::WordForward, "hello", 0, None), Some(5));
        assert_eq!(run(Motion::WordForward, "hello", 0), Some(4));
    }

    #[test]
    fn test_word_forward_op_stays_on_line() {
        assert_eq!(run_op(Motion::WordForward, "ab cd\nef", 3, None), Some(5));
    }

    #[test]
    fn test_word_forward_count() {
        let text = "a b c d e f g h";
        assert_eq!(run_op(Motion::WordForward, text, 0, Some(6)), Some(12));
    }

    #[test]
    fn test_word_backward() {
        assert_eq!(run(Motion::WordBackward, "hello world", 8), Some(6));
        assert_eq!(run(Motion::WordBackward, "hello world", 6), Some(0));
        assert_eq!(run(Motion::WordBackward, "hello", 0), None);
    }

    #[test]
    fn test_word_end() {
        assert_eq!(run(Motion::WordEnd, "hello world", 0), Some(4));
        assert_eq!(run(Motion::WordEnd, "hello world", 4), Some(10));
        assert_eq!(run(Motion::WordEnd, "hello", 4), None);
    }

    #[test]
    fn test_left_right_stay_in_line() {
        assert_eq!(run(Motion::Left, "ab\ncd", 3), None);
        assert_eq!(run(Motion::Right, "ab\ncd", 1), None);
        assert_eq!(run_op(Motion::Right, "ab\ncd", 1, None), Some(2));
        assert_eq!(run(Motion::Right, "abc", 0), Some(1));
    }

    #[test]
    fn test_down_keeps_column() {
        assert_eq!(run(Motion::Down, "abc\nabc", 2), Some(6));
        assert_eq!(run(Motion::Down, "abc\na", 2), Some(4));
        assert_eq!(run(Motion::Down, "abc", 1), None);
        assert_eq!(run(Motion::Up, "abc\nabc", 5), Some(1));
    }

    #[test]
    fn test_line_end_and_start() {
        assert_eq!(run(Motion::LineEnd, "abc\nde", 0), Some(2));
        assert_eq!(run(Motion::LineStart, "abc\nde", 5), Some(4));
        assert_eq!(run_op(Motion::LineEnd, "\nab", 0, None), None);
    }

    #[test]
    fn test_goto_lines() {
        let text = "one\n  two\nthree";
        assert_eq!(run(Motion::LastLine, text, 0), Some(10));
        assert_eq!(run(Motion::FirstLine, text, 12), Some(0));
        let second = Motion::FirstLine.apply(&MotionInput {
            count: Some(2),
            ..MotionInput::new(text, 0)
        });
        assert_eq!(second, Some(6));
    }

    #[test]
    fn test_find_and_till() {
        let input = |motion: Motion, caret| {
            motion.apply(&MotionInput {
                argument: Some('c'),
                ..MotionInput::new("abcabc", caret)
            })
        };
        assert_eq!(input(Motion::FindForward, 0), Some(2));
        assert_eq!(input(Motion::TillForward, 0), Some(1));
        assert_eq!(input(Motion::FindBackward, 4), Some(2));
        assert_eq!(input(Motion::TillBackward, 4), Some(3));
        assert_eq!(input(Motion::FindForward, 5), None);
    }

    #[test]
    fn test_keyword_at() {
        assert_eq!(keyword_at("hello world", 1), Some((0, 5)));
        assert_eq!(keyword_at("\tfoo", 0), Some((1, 4)));
        assert_eq!(keyword_at("foo  ", 3), None);
    }

    #[test]
    fn test_line_helpers() {
        let text = "ab\n\ncd";
        assert_eq!(line_count(text), 3);
        assert_eq!(line_start_of(text, 2), Some(4));
        assert_eq!(line_index(text, 5), 2);
        assert_eq!(clamp_normal(text, 2), 1);
        assert_eq!(clamp_normal(text, 3), 3);
        assert_eq!(clamp_normal(text, 6), 5);
    }
}
