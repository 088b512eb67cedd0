//! Command metadata and the command registry.
//!
//! Every key sequence the engine can execute resolves to a [`CommandSpec`]:
//! its type, flags, argument requirement and the [`CommandAction`] that runs
//! it. Builtin commands are installed by [`defaults`]; extensions may add
//! their own, which are removed again with their owner.

pub mod argument;
pub mod defaults;
pub mod registry;

use serde::Serialize;

use crate::extension::HandlerRef;
use crate::key::KeySequence;
use crate::mapping::MappingOwner;
use crate::mode::{MappingModes, SelectionType};
use crate::motion::Motion;

pub use argument::{Argument, ArgumentCollector, Collected};
pub use registry::{CommandLookup, CommandRegistry};

// ============================================================================
// Metadata
// ============================================================================

/// Broad command category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandType {
    Motion,
    Operator,
    InsertLike,
    Other,
}

/// Argument a command needs before it can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ArgumentKind {
    #[default]
    None,
    /// One key (`f{char}`)
    Character,
    /// Two keys composed through the digraph table
    Digraph,
    /// A line typed in CommandLine mode (`/pattern<CR>`)
    ExString,
    /// Digits up to the first non-digit
    Count,
}

/// How a motion's end position folds into an operator range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MotionType {
    Inclusive,
    #[default]
    Exclusive,
    LineWise,
}

bitflags::bitflags! {
    /// Behavior flags the dispatcher honors
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct CommandFlags: u16 {
        /// Treat the resulting range as whole lines
        const MOTION_LINEWISE          = 1 << 0;
        /// Push the caret onto the jump list before running
        const SAVE_JUMP_POSITION       = 1 << 1;
        /// Inserted text is not repeated by a count
        const NO_REPEAT_INSERT         = 1 << 2;
        /// Start a fresh recording of insert input
        const CLEAR_STROKES            = 1 << 3;
        /// Append this keystroke to the active insert recording
        const SAVE_STROKE              = 1 << 4;
        const IGNORE_SCROLL_JUMP       = 1 << 5;
        const IGNORE_SIDE_SCROLL_JUMP  = 1 << 6;
        /// Leave Visual/Select after the range is computed
        const EXITS_VISUAL             = 1 << 7;
        /// Group this command's edits into one undo step
        const MULTIKEY_UNDO            = 1 << 8;
        /// Incomplete without more keys
        const EXPECT_MORE_KEYS         = 1 << 9;
        /// The character argument may be a `<C-K>` digraph
        const ALLOW_DIGRAPH            = 1 << 10;
        /// Terminates ex-string argument collection
        const COMPLETES_EX_INPUT       = 1 << 11;
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Text operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
    Delete,
    Yank,
    Change,
}

impl Operator {
    /// The key that starts (and doubles) this operator
    pub fn key(&self) -> char {
        match self {
            Operator::Delete => 'd',
            Operator::Yank => 'y',
            Operator::Change => 'c',
        }
    }

    pub fn from_key(c: char) -> Option<Self> {
        match c {
            'd' => Some(Operator::Delete),
            'y' => Some(Operator::Yank),
            'c' => Some(Operator::Change),
            _ => None,
        }
    }

    pub fn changes_text(&self) -> bool {
        !matches!(self, Operator::Yank)
    }
}

/// Viewport scrolls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScrollKind {
    LineDown,
    LineUp,
    HalfPageDown,
    HalfPageUp,
}

/// Builtin non-motion, non-operator commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Builtin {
    // ========================================================================
    // Editing
    // ========================================================================
    /// `x`: delete characters under the caret
    DeleteChar,

    /// `X`: delete characters before the caret
    DeleteCharBefore,

    /// `s`: change characters under the caret
    SubstituteChar,

    /// `r{char}`
    ReplaceChar,

    // ========================================================================
    // Mode switches
    // ========================================================================
    /// `i`
    InsertBefore,

    /// `a`
    InsertAfter,

    /// `I`
    InsertLineStart,

    /// `A`
    InsertLineEnd,

    /// `R`
    ReplaceMode,

    /// `v`, `V`, `<C-V>`
    ToggleVisual(SelectionType),

    /// `gh`, `gH`, `g<C-H>`
    EnterSelect(SelectionType),

    /// `<C-G>`
    SwapVisualSelect,

    /// `<Esc>`
    Escape,

    // ========================================================================
    // Search selection
    // ========================================================================
    /// `gn`
    SelectNextMatch,

    /// `gN`
    SelectPreviousMatch,

    // ========================================================================
    // Command line
    // ========================================================================
    /// `:` runs a configuration line
    ExCommand,

    /// `<CR>` in CommandLine mode
    CompleteExInput,

    // ========================================================================
    // Misc
    // ========================================================================
    /// `.`
    RepeatChange,

    /// `"{reg}`
    SelectRegister,

    /// `<C-O>`
    JumpBack,

    /// `<C-I>`
    JumpForward,

    Scroll(ScrollKind),

    // ========================================================================
    // Insert mode
    // ========================================================================
    /// `<C-K>{a}{b}`
    InsertDigraph,

    /// `<BS>`
    InsertBackspace,
}

impl Builtin {
    /// Human-readable description for the event log
    pub fn description(&self) -> &'static str {
        match self {
            Builtin::DeleteChar => "delete character",
            Builtin::DeleteCharBefore => "delete character before",
            Builtin::SubstituteChar => "substitute character",
            Builtin::ReplaceChar => "replace character",
            Builtin::InsertBefore => "insert",
            Builtin::InsertAfter => "append",
            Builtin::InsertLineStart => "insert at line start",
            Builtin::InsertLineEnd => "append at line end",
            Builtin::ReplaceMode => "replace mode",
            Builtin::ToggleVisual(_) => "toggle visual",
            Builtin::EnterSelect(_) => "enter select",
            Builtin::SwapVisualSelect => "swap visual/select",
            Builtin::Escape => "escape",
            Builtin::SelectNextMatch => "select next match",
            Builtin::SelectPreviousMatch => "select previous match",
            Builtin::ExCommand => "ex command",
            Builtin::CompleteExInput => "complete command line",
            Builtin::RepeatChange => "repeat last change",
            Builtin::SelectRegister => "select register",
            Builtin::JumpBack => "jump back",
            Builtin::JumpForward => "jump forward",
            Builtin::Scroll(_) => "scroll",
            Builtin::InsertDigraph => "insert digraph",
            Builtin::InsertBackspace => "backspace",
        }
    }

    /// Whether completing this command counts as a change for dot-repeat
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Builtin::DeleteChar
                | Builtin::DeleteCharBefore
                | Builtin::SubstituteChar
                | Builtin::ReplaceChar
                | Builtin::InsertBefore
                | Builtin::InsertAfter
                | Builtin::InsertLineStart
                | Builtin::InsertLineEnd
                | Builtin::ReplaceMode
        )
    }
}

/// What a command does when it runs
#[derive(Debug, Clone)]
pub enum CommandAction {
    Motion(Motion),
    Operator(Operator),
    Builtin(Builtin),
    Handler(HandlerRef),
}

// ============================================================================
// CommandSpec
// ============================================================================

/// Static description of one command
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub keys: KeySequence,
    pub modes: MappingModes,
    pub command_type: CommandType,
    pub flags: CommandFlags,
    pub argument: ArgumentKind,
    pub action: CommandAction,
    pub owner: MappingOwner,
}

impl CommandSpec {
    pub fn new(
        keys: KeySequence,
        modes: MappingModes,
        command_type: CommandType,
        action: CommandAction,
    ) -> Self {
        Self {
            keys,
            modes,
            command_type,
            flags: CommandFlags::empty(),
            argument: ArgumentKind::None,
            action,
            owner: MappingOwner::User,
        }
    }

    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_argument(mut self, argument: ArgumentKind) -> Self {
        self.argument = argument;
        self
    }

    pub fn with_owner(mut self, owner: MappingOwner) -> Self {
        self.owner = owner;
        self
    }

    /// Motion type used when this command's motion feeds an operator
    pub fn motion_type(&self) -> MotionType {
        if self.flags.contains(CommandFlags::MOTION_LINEWISE) {
            return MotionType::LineWise;
        }
        match &self.action {
            CommandAction::Motion(motion) => motion.motion_type(),
            _ => MotionType::Exclusive,
        }
    }

    pub fn description(&self) -> String {
        match &self.action {
            CommandAction::Motion(motion) => motion.description().to_string(),
            CommandAction::Operator(Operator::Delete) => "delete".to_string(),
            CommandAction::Operator(Operator::Yank) => "yank".to_string(),
            CommandAction::Operator(Operator::Change) => "change".to_string(),
            CommandAction::Builtin(builtin) => builtin.description().to_string(),
            CommandAction::Handler(handler) => handler.name().to_string(),
        }
    }
}
