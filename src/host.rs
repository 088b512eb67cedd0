//! Host editor collaborator interface
//!
//! The engine decides what runs and over which range; the host owns the text
//! and performs the mutations. Only the primitives the engine cannot do
//! without are required; display concerns have no-op defaults so a minimal
//! host (or a test mock) stays small.

use serde::Serialize;
use thiserror::Error;

use crate::command::{Operator, ScrollKind};
use crate::mode::ModeTransition;

// ============================================================================
// Ranges
// ============================================================================

/// Shape of an operator range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RangeKind {
    Characterwise,
    /// Whole lines; `end` includes the last line's newline when there is one
    Linewise,
    /// Rectangle whose corners are the first and last character of the range
    Blockwise,
}

/// Byte range `[start, end)` in the host text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
    pub kind: RangeKind,
}

impl TextRange {
    pub fn new(start: usize, end: usize, kind: RangeKind) -> Self {
        Self { start, end, kind }
    }

    pub fn characterwise(start: usize, end: usize) -> Self {
        Self::new(start, end, RangeKind::Characterwise)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

/// An operator to apply over a range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorRequest {
    pub operator: Operator,
    pub range: TextRange,
    /// Register selected with `"x`, if any
    pub register: Option<char>,
}

/// Which scroll margins to enforce after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScrollPolicy {
    pub vertical: bool,
    pub horizontal: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors reported by a host while mutating text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("offset {offset} is outside the text (length {len})")]
    OutOfBounds { offset: usize, len: usize },

    #[error("no caret with index {0}")]
    InvalidCaret(usize),

    #[error("host rejected the edit: {0}")]
    Rejected(String),
}

// ============================================================================
// Host trait
// ============================================================================

/// The editor the engine drives
pub trait EditorHost {
    /// Current text
    fn text(&self) -> &str;

    fn caret_count(&self) -> usize {
        1
    }

    /// Byte offset of caret `index`
    fn caret(&self, index: usize) -> usize;

    fn set_caret(&mut self, index: usize, offset: usize);

    /// Delete, yank or change `request.range`. Carets are placed by the
    /// engine afterwards.
    fn apply_operator(&mut self, request: &OperatorRequest) -> Result<(), HostError>;

    /// Insert at caret `index`, leaving that caret after the inserted text
    fn insert_text(&mut self, index: usize, text: &str) -> Result<(), HostError>;

    /// Overwrite from caret `index` (Replace mode), leaving the caret after it
    fn replace_text(&mut self, index: usize, text: &str) -> Result<(), HostError>;

    /// Remove `[start, end)` without touching registers
    fn delete_text(&mut self, start: usize, end: usize) -> Result<(), HostError>;

    fn set_selection(&mut self, _index: usize, _range: Option<TextRange>) {}

    fn push_jump(&mut self, _offset: usize) {}

    fn jump_back(&mut self, _current: usize) -> Option<usize> {
        None
    }

    fn jump_forward(&mut self) -> Option<usize> {
        None
    }

    fn begin_undo_group(&mut self) {}

    fn end_undo_group(&mut self) {}

    /// Enforce scroll margins around the primary caret
    fn scroll_to_caret(&mut self, _policy: ScrollPolicy) {}

    fn scroll(&mut self, _kind: ScrollKind, _count: usize) {}

    fn mode_changed(&mut self, _transition: &ModeTransition) {}
}
