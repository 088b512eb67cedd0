//! In-memory editor host.
//!
//! [`StringBuffer`] implements [`EditorHost`] over a `String` with any number
//! of carets. It keeps vi-style registers and a jump list, and records mode
//! transitions, scroll requests and undo groups so callers can inspect them.

use std::collections::HashMap;

use serde::Serialize;

use crate::command::{Operator, ScrollKind};
use crate::composer::block_spans;
use crate::host::{EditorHost, HostError, OperatorRequest, RangeKind, ScrollPolicy, TextRange};
use crate::jumplist::JumpList;
use crate::mode::ModeTransition;

// ============================================================================
// Registers
// ============================================================================

/// Text held in a register
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterContent {
    pub text: String,
    pub kind: RangeKind,
}

impl RegisterContent {
    pub fn new(text: impl Into<String>, kind: RangeKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// Vi registers:
/// - `"`: unnamed, the last yank or delete
/// - `0`: last yank
/// - `1`-`9`: delete history (1 = most recent, shifts down)
/// - `a`-`z`: named; `A`-`Z` append to them
#[derive(Debug, Clone, Default)]
pub struct RegisterBank {
    unnamed: Option<RegisterContent>,
    yank: Option<RegisterContent>,
    deletes: [Option<RegisterContent>; 9],
    named: HashMap<char, RegisterContent>,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store into a named register if one was selected. Returns false for
    /// `"_`, the black hole register.
    fn store_named(&mut self, register: Option<char>, content: &RegisterContent) -> bool {
        match register {
            Some('_') => false,
            Some(c) if c.is_ascii_uppercase() => {
                let entry = self
                    .named
                    .entry(c.to_ascii_lowercase())
                    .or_insert_with(|| RegisterContent::new("", content.kind));
                entry.text.push_str(&content.text);
                true
            }
            Some(c) if c.is_ascii_lowercase() => {
                self.named.insert(c, content.clone());
                true
            }
            _ => true,
        }
    }

    pub fn store_yank(&mut self, register: Option<char>, content: RegisterContent) {
        if !self.store_named(register, &content) {
            return;
        }
        if register.is_none() || register == Some('"') {
            self.yank = Some(content.clone());
        }
        self.unnamed = Some(content);
    }

    pub fn store_delete(&mut self, register: Option<char>, content: RegisterContent) {
        if !self.store_named(register, &content) {
            return;
        }
        self.deletes.rotate_right(1);
        self.deletes[0] = Some(content.clone());
        self.unnamed = Some(content);
    }

    pub fn get(&self, name: char) -> Option<&RegisterContent> {
        match name {
            '"' => self.unnamed.as_ref(),
            '0' => self.yank.as_ref(),
            '1'..='9' => {
                let index = name.to_digit(10).map(|n| n as usize - 1)?;
                self.deletes[index].as_ref()
            }
            c if c.is_ascii_alphabetic() => self.named.get(&c.to_ascii_lowercase()),
            _ => None,
        }
    }

    pub fn unnamed(&self) -> Option<&RegisterContent> {
        self.unnamed.as_ref()
    }
}

// ============================================================================
// Buffer
// ============================================================================

#[derive(Debug, Default)]
pub struct StringBuffer {
    text: String,
    carets: Vec<usize>,
    selections: Vec<Option<TextRange>>,
    registers: RegisterBank,
    jumps: JumpList,
    transitions: Vec<ModeTransition>,
    scrolls: Vec<(ScrollKind, usize)>,
    scroll_requests: usize,
    undo_depth: usize,
    undo_groups: usize,
}

impl StringBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            carets: vec![0],
            selections: vec![None],
            ..Self::default()
        }
    }

    /// Buffer with one caret per offset
    pub fn with_carets(text: impl Into<String>, carets: &[usize]) -> Self {
        let mut buffer = Self::new(text);
        if !carets.is_empty() {
            buffer.carets = carets.to_vec();
            buffer.selections = vec![None; carets.len()];
        }
        buffer
    }

    pub fn carets(&self) -> &[usize] {
        &self.carets
    }

    pub fn add_caret(&mut self, offset: usize) {
        self.carets.push(offset.min(self.text.len()));
        self.selections.push(None);
    }

    pub fn selection(&self, index: usize) -> Option<TextRange> {
        self.selections.get(index).copied().flatten()
    }

    pub fn selected_text(&self, index: usize) -> Option<&str> {
        self.selection(index).map(|range| &self.text[range.start..range.end])
    }

    pub fn registers(&self) -> &RegisterBank {
        &self.registers
    }

    pub fn transitions(&self) -> &[ModeTransition] {
        &self.transitions
    }

    pub fn scrolls(&self) -> &[(ScrollKind, usize)] {
        &self.scrolls
    }

    pub fn scroll_requests(&self) -> usize {
        self.scroll_requests
    }

    /// Completed outermost undo groups
    pub fn undo_groups(&self) -> usize {
        self.undo_groups
    }

    pub fn jumps(&self) -> &JumpList {
        &self.jumps
    }

    fn check(&self, offset: usize) -> Result<(), HostError> {
        if offset > self.text.len() || !self.text.is_char_boundary(offset) {
            return Err(HostError::OutOfBounds {
                offset,
                len: self.text.len(),
            });
        }
        Ok(())
    }

    fn caret_offset(&self, index: usize) -> Result<usize, HostError> {
        self.carets
            .get(index)
            .copied()
            .ok_or(HostError::InvalidCaret(index))
    }

    /// Replace `[start, end)` with `replacement`, shifting carets and jumps
    fn splice(&mut self, start: usize, end: usize, replacement: &str) -> Result<(), HostError> {
        self.check(start)?;
        self.check(end)?;
        if start > end {
            return Err(HostError::OutOfBounds {
                offset: start,
                len: self.text.len(),
            });
        }
        self.text.replace_range(start..end, replacement);
        let inserted = replacement.len();
        for caret in &mut self.carets {
            if *caret >= end {
                *caret = *caret - (end - start) + inserted;
            } else if *caret > start {
                *caret = start;
            }
        }
        self.jumps.adjust(start, end, inserted);
        Ok(())
    }

    /// Register text for a linewise range always ends in a newline
    fn register_text(&self, range: &TextRange) -> String {
        match range.kind {
            RangeKind::Blockwise => block_spans(&self.text, range)
                .iter()
                .map(|&(lo, hi)| &self.text[lo..hi])
                .collect::<Vec<_>>()
                .join("\n"),
            RangeKind::Linewise => {
                let mut text = self.text[range.start..range.end].to_string();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text
            }
            RangeKind::Characterwise => self.text[range.start..range.end].to_string(),
        }
    }

    fn remove_range(&mut self, operator: Operator, range: &TextRange) -> Result<(), HostError> {
        match range.kind {
            RangeKind::Blockwise => {
                let spans = block_spans(&self.text, range);
                for (lo, hi) in spans.into_iter().rev() {
                    self.splice(lo, hi, "")?;
                }
                Ok(())
            }
            RangeKind::Linewise => {
                let ends_in_newline = self.text[range.start..range.end].ends_with('\n');
                if operator == Operator::Change {
                    // `cc` leaves an empty line to type on
                    let end = if ends_in_newline { range.end - 1 } else { range.end };
                    self.splice(range.start, end, "")
                } else if !ends_in_newline && range.start > 0 {
                    // Deleting the last lines also removes the newline before them
                    self.splice(range.start - 1, range.end, "")
                } else {
                    self.splice(range.start, range.end, "")
                }
            }
            RangeKind::Characterwise => self.splice(range.start, range.end, ""),
        }
    }
}

impl EditorHost for StringBuffer {
    fn text(&self) -> &str {
        &self.text
    }

    fn caret_count(&self) -> usize {
        self.carets.len()
    }

    fn caret(&self, index: usize) -> usize {
        self.carets.get(index).copied().unwrap_or(0)
    }

    fn set_caret(&mut self, index: usize, offset: usize) {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        if let Some(caret) = self.carets.get_mut(index) {
            *caret = offset;
        }
    }

    fn apply_operator(&mut self, request: &OperatorRequest) -> Result<(), HostError> {
        let range = request.range;
        self.check(range.start)?;
        self.check(range.end)?;
        let content = RegisterContent::new(self.register_text(&range), range.kind);
        match request.operator {
            Operator::Yank => {
                self.registers.store_yank(request.register, content);
                Ok(())
            }
            Operator::Delete | Operator::Change => {
                self.registers.store_delete(request.register, content);
                self.remove_range(request.operator, &range)
            }
        }
    }

    fn insert_text(&mut self, index: usize, text: &str) -> Result<(), HostError> {
        let offset = self.caret_offset(index)?;
        self.splice(offset, offset, text)
    }

    fn replace_text(&mut self, index: usize, text: &str) -> Result<(), HostError> {
        let offset = self.caret_offset(index)?;
        self.check(offset)?;
        let line_end = self.text[offset..]
            .find('\n')
            .map(|i| offset + i)
            .unwrap_or(self.text.len());
        let end = self.text[offset..line_end]
            .char_indices()
            .nth(text.chars().count())
            .map(|(i, _)| offset + i)
            .unwrap_or(line_end);
        self.splice(offset, end, text)?;
        self.carets[index] = offset + text.len();
        Ok(())
    }

    fn delete_text(&mut self, start: usize, end: usize) -> Result<(), HostError> {
        self.splice(start, end, "")
    }

    fn set_selection(&mut self, index: usize, range: Option<TextRange>) {
        if let Some(selection) = self.selections.get_mut(index) {
            *selection = range;
        }
    }

    fn push_jump(&mut self, offset: usize) {
        self.jumps.push(offset);
    }

    fn jump_back(&mut self, current: usize) -> Option<usize> {
        self.jumps.go_back(current)
    }

    fn jump_forward(&mut self) -> Option<usize> {
        self.jumps.go_forward()
    }

    fn begin_undo_group(&mut self) {
        self.undo_depth += 1;
    }

    fn end_undo_group(&mut self) {
        if self.undo_depth == 0 {
            return;
        }
        self.undo_depth -= 1;
        if self.undo_depth == 0 {
            self.undo_groups += 1;
        }
    }

    fn scroll_to_caret(&mut self, _policy: ScrollPolicy) {
        self.scroll_requests += 1;
    }

    fn scroll(&mut self, kind: ScrollKind, count: usize) {
        self.scrolls.push((kind, count));
    }

    fn mode_changed(&mut self, transition: &ModeTransition) {
        self.transitions.push(transition.clone());
    }
}
