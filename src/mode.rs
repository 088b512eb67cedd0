//! Editing modes and the state machine that owns them.
//!
//! A session is in exactly one [`Mode`] at a time. Every change goes through
//! [`ModeMachine`], which reports real transitions so the host can update its
//! caret shape and status line.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::command::Operator;
use crate::key::{Key, KeySequence};

// ============================================================================
// Mode
// ============================================================================

/// Shape of a Visual or Select mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SelectionType {
    #[default]
    Character,
    Line,
    Block,
}

/// An operator waiting for the motion that defines its range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingOperator {
    pub operator: Operator,
    /// Count typed before the operator (`2` in `2d3w`)
    pub count: Option<usize>,
    pub awaiting_motion: bool,
    /// Register selected with `"x` before the operator
    pub register: Option<char>,
}

impl PendingOperator {
    pub fn new(operator: Operator, count: Option<usize>, register: Option<char>) -> Self {
        Self {
            operator,
            count,
            awaiting_motion: true,
            register,
        }
    }
}

/// Editing mode
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum Mode {
    #[default]
    Normal,
    Insert,
    Replace,
    Visual(SelectionType),
    Select(SelectionType),
    OperatorPending(PendingOperator),
    CommandLine,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "NORMAL",
            Mode::Insert => "INSERT",
            Mode::Replace => "REPLACE",
            Mode::Visual(SelectionType::Character) => "VISUAL",
            Mode::Visual(SelectionType::Line) => "VISUAL LINE",
            Mode::Visual(SelectionType::Block) => "VISUAL BLOCK",
            Mode::Select(SelectionType::Character) => "SELECT",
            Mode::Select(SelectionType::Line) => "SELECT LINE",
            Mode::Select(SelectionType::Block) => "SELECT BLOCK",
            Mode::OperatorPending(_) => "OP-PENDING",
            Mode::CommandLine => "COMMAND",
        }
    }

    /// The mapping scope this mode reads from
    pub fn mapping_mode(&self) -> MappingModes {
        match self {
            Mode::Normal => MappingModes::NORMAL,
            Mode::Visual(_) => MappingModes::VISUAL,
            Mode::Select(_) => MappingModes::SELECT,
            Mode::OperatorPending(_) => MappingModes::OP_PENDING,
            Mode::Insert | Mode::Replace => MappingModes::INSERT,
            Mode::CommandLine => MappingModes::CMD_LINE,
        }
    }

    pub fn is_visual(&self) -> bool {
        matches!(self, Mode::Visual(_))
    }

    pub fn is_select(&self) -> bool {
        matches!(self, Mode::Select(_))
    }

    /// Visual or Select
    pub fn has_selection(&self) -> bool {
        self.selection_type().is_some()
    }

    pub fn selection_type(&self) -> Option<SelectionType> {
        match self {
            Mode::Visual(sel) | Mode::Select(sel) => Some(*sel),
            _ => None,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Mode::Insert | Mode::Replace)
    }

    pub fn pending_operator(&self) -> Option<&PendingOperator> {
        match self {
            Mode::OperatorPending(pending) => Some(pending),
            _ => None,
        }
    }

    fn same_family(&self, other: &Mode) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

// ============================================================================
// Mapping mode tags
// ============================================================================

bitflags::bitflags! {
    /// Set of mapping scopes a mapping or command applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct MappingModes: u8 {
        const NORMAL     = 0b00_0001;
        const VISUAL     = 0b00_0010;
        const SELECT     = 0b00_0100;
        const OP_PENDING = 0b00_1000;
        const INSERT     = 0b01_0000;
        const CMD_LINE   = 0b10_0000;

        /// `map` / `noremap`
        const NVO = Self::NORMAL.bits() | Self::VISUAL.bits() | Self::SELECT.bits() | Self::OP_PENDING.bits();
        /// `vmap`: Visual and Select
        const VISUAL_SELECT = Self::VISUAL.bits() | Self::SELECT.bits();
        /// `map!`
        const INSERT_CMD = Self::INSERT.bits() | Self::CMD_LINE.bits();
    }
}

impl MappingModes {
    /// Single-mode tags in table order
    pub const TAGS: [MappingModes; 6] = [
        MappingModes::NORMAL,
        MappingModes::VISUAL,
        MappingModes::SELECT,
        MappingModes::OP_PENDING,
        MappingModes::INSERT,
        MappingModes::CMD_LINE,
    ];

    /// The single-mode tags contained in this set
    pub fn tags(self) -> impl Iterator<Item = MappingModes> {
        Self::TAGS.into_iter().filter(move |tag| self.contains(*tag))
    }

    fn index(self) -> Option<usize> {
        Self::TAGS.iter().position(|tag| *tag == self)
    }
}

// ============================================================================
// Per-mode key index
// ============================================================================

/// Outcome of looking up an input sequence in a [`ModeIndex`]
#[derive(Debug, Clone)]
pub enum PrefixLookup<V> {
    /// Nothing equals or extends the input
    None,
    /// Only longer entries start with the input
    Prefix,
    /// The input is an entry and nothing extends it
    Exact(V),
    /// The input is an entry and longer entries extend it
    Ambiguous(V),
}

/// Key-sequence index with one ordered table per mapping mode.
///
/// Values are shared between the modes they were inserted for.
#[derive(Debug, Clone)]
pub struct ModeIndex<V> {
    tables: [BTreeMap<KeySequence, Arc<V>>; 6],
}

impl<V> Default for ModeIndex<V> {
    fn default() -> Self {
        Self {
            tables: Default::default(),
        }
    }
}

impl<V> ModeIndex<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, tag: MappingModes) -> Option<&BTreeMap<KeySequence, Arc<V>>> {
        tag.index().map(|i| &self.tables[i])
    }

    fn table_mut(&mut self, tag: MappingModes) -> Option<&mut BTreeMap<KeySequence, Arc<V>>> {
        tag.index().map(|i| &mut self.tables[i])
    }

    pub fn get(&self, tag: MappingModes, keys: &[Key]) -> Option<&Arc<V>> {
        self.table(tag)?.get(&KeySequence::from(keys))
    }

    pub fn contains(&self, tag: MappingModes, keys: &[Key]) -> bool {
        self.get(tag, keys).is_some()
    }

    /// Insert for a single mode tag, returning the displaced value
    pub fn insert(&mut self, tag: MappingModes, keys: KeySequence, value: Arc<V>) -> Option<Arc<V>> {
        self.table_mut(tag)?.insert(keys, value)
    }

    pub fn remove(&mut self, tag: MappingModes, keys: &[Key]) -> Option<Arc<V>> {
        self.table_mut(tag)?.remove(&KeySequence::from(keys))
    }

    /// Drop every entry for which `keep` returns false, returning how many went
    pub fn retain(&mut self, mut keep: impl FnMut(&V) -> bool) -> usize {
        let mut removed = 0;
        for table in &mut self.tables {
            let before = table.len();
            table.retain(|_, value| keep(value));
            removed += before - table.len();
        }
        removed
    }

    /// Entries of one mode in key order
    pub fn entries(&self, tag: MappingModes) -> impl Iterator<Item = (&KeySequence, &Arc<V>)> {
        self.table(tag).into_iter().flat_map(|table| table.iter())
    }

    /// Every stored value, once per mode it is stored under
    pub fn values(&self) -> impl Iterator<Item = &Arc<V>> {
        self.tables.iter().flat_map(|table| table.values())
    }

    pub fn lookup(&self, tag: MappingModes, input: &[Key]) -> PrefixLookup<Arc<V>> {
        let Some(table) = self.table(tag) else {
            return PrefixLookup::None;
        };
        let probe = KeySequence::from(input);
        let exact = table.get(&probe).cloned();
        // Extensions of `input` sort directly after it
        let longer = table
            .range(probe..)
            .take(2)
            .any(|(keys, _)| keys.len() > input.len() && keys.starts_with(input));

        match (exact, longer) {
            (Some(value), false) => PrefixLookup::Exact(value),
            (Some(value), true) => PrefixLookup::Ambiguous(value),
            (None, true) => PrefixLookup::Prefix,
            (None, false) => PrefixLookup::None,
        }
    }

    /// Longest entry that is a prefix of (or equal to) `input`
    pub fn longest_prefix(&self, tag: MappingModes, input: &[Key]) -> Option<(usize, Arc<V>)> {
        let table = self.table(tag)?;
        (1..=input.len())
            .rev()
            .find_map(|len| table.get(&KeySequence::from(&input[..len])).map(|v| (len, v.clone())))
    }
}

// ============================================================================
// State machine
// ============================================================================

/// How a mode change relates to the previous mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionKind {
    /// A different mode was entered
    Entered,
    /// Same mode family, different sub-state (e.g. Visual char to Visual line)
    SubModeChanged,
}

/// A mode change reported to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeTransition {
    pub from: Mode,
    pub to: Mode,
    pub kind: TransitionKind,
}

/// Owner of a session's current mode
#[derive(Debug, Clone, Default)]
pub struct ModeMachine {
    mode: Mode,
    /// Mode active before the current operator started
    operator_origin: Option<Mode>,
}

impl ModeMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Mode {
        &self.mode
    }

    pub fn pending_operator(&self) -> Option<&PendingOperator> {
        self.mode.pending_operator()
    }

    pub fn pending_operator_mut(&mut self) -> Option<&mut PendingOperator> {
        match &mut self.mode {
            Mode::OperatorPending(pending) => Some(pending),
            _ => None,
        }
    }

    /// Switch to `mode`. Returns `None` when nothing changed.
    pub fn enter(&mut self, mode: Mode) -> Option<ModeTransition> {
        if mode == self.mode {
            return None;
        }
        if !matches!(mode, Mode::OperatorPending(_)) {
            self.operator_origin = None;
        }
        let kind = if self.mode.same_family(&mode) {
            TransitionKind::SubModeChanged
        } else {
            TransitionKind::Entered
        };
        let from = std::mem::replace(&mut self.mode, mode);
        Some(ModeTransition {
            from,
            to: self.mode.clone(),
            kind,
        })
    }

    /// Enter OperatorPending, remembering where to return afterwards
    pub fn begin_operator(&mut self, pending: PendingOperator) -> Option<ModeTransition> {
        let origin = self.mode.clone();
        let transition = self.enter(Mode::OperatorPending(pending));
        if !matches!(origin, Mode::OperatorPending(_)) {
            self.operator_origin = Some(origin);
        }
        transition
    }

    /// Drop the pending operator and return to the mode it started from
    pub fn finish_operator(&mut self) -> Option<ModeTransition> {
        let origin = self.operator_origin.take().unwrap_or_default();
        self.enter(origin)
    }

    /// Universal cancellation target
    pub fn reset(&mut self) -> Option<ModeTransition> {
        self.operator_origin = None;
        self.enter(Mode::Normal)
    }
}
