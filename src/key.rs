//! Key codec: raw key events to and from canonical key notation.
//!
//! Notation follows the usual vi conventions. Printable characters stand for
//! themselves, special keys are bracketed (`<Esc>`, `<CR>`, `<C-P>`), and
//! `<Plug>Name` is a single non-typable indirection key.
//!
//! Everything here is pure: parsing, formatting and event conversion hold no
//! state and never touch the engine context.

use std::fmt;
use std::str::FromStr;

use crossterm::event::{
    KeyCode as TermKeyCode, KeyEvent as TermKeyEvent, KeyEventKind, KeyModifiers,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ============================================================================
// Key
// ============================================================================

bitflags::bitflags! {
    /// Modifier keys held with a key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
        const META  = 0b1000;
    }
}

/// Key codes the engine distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyCode {
    Char(char),
    Esc,
    Enter,
    Tab,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    F(u8),
    /// `<Nop>`: maps to nothing
    Nop,
    /// `<Plug>Name`: indirection key, never produced by a keyboard
    Plug(String),
}

/// A single canonical key token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub code: KeyCode,
    pub modifiers: Modifiers,
}

impl Key {
    /// Build a key, normalizing shifted and control letters.
    pub fn new(code: KeyCode, modifiers: Modifiers) -> Self {
        let mut key = Self { code, modifiers };
        key.normalize();
        key
    }

    /// Plain character key
    pub fn char(c: char) -> Self {
        Self::new(KeyCode::Char(c), Modifiers::empty())
    }

    /// Control + character (`<C-x>`)
    pub fn ctrl(c: char) -> Self {
        Self::new(KeyCode::Char(c), Modifiers::CTRL)
    }

    /// Key without modifiers
    pub fn plain(code: KeyCode) -> Self {
        Self::new(code, Modifiers::empty())
    }

    /// `<Plug>name`
    pub fn plug(name: impl Into<String>) -> Self {
        Self::plain(KeyCode::Plug(name.into()))
    }

    pub fn esc() -> Self {
        Self::plain(KeyCode::Esc)
    }

    pub fn enter() -> Self {
        Self::plain(KeyCode::Enter)
    }

    /// The character this key types, if it is an unmodified printable key.
    pub fn as_char(&self) -> Option<char> {
        match self.code {
            KeyCode::Char(c) if self.modifiers.is_empty() => Some(c),
            _ => None,
        }
    }

    /// The digit value of an unmodified `0-9` key.
    pub fn digit(&self) -> Option<u32> {
        self.as_char().and_then(|c| c.to_digit(10))
    }

    pub fn is_esc(&self) -> bool {
        self.code == KeyCode::Esc && self.modifiers.is_empty()
    }

    pub fn is_plug(&self) -> bool {
        matches!(self.code, KeyCode::Plug(_))
    }

    pub fn is_ctrl(&self, c: char) -> bool {
        self.modifiers == Modifiers::CTRL && self.code == KeyCode::Char(c.to_ascii_uppercase())
    }

    fn normalize(&mut self) {
        if let KeyCode::Char(c) = self.code {
            if self.modifiers.contains(Modifiers::SHIFT) && !c.is_whitespace() {
                // The character already carries the shift
                self.modifiers.remove(Modifiers::SHIFT);
                if c.is_ascii_alphabetic() {
                    self.code = KeyCode::Char(c.to_ascii_uppercase());
                }
            }
            if self.modifiers.contains(Modifiers::CTRL) && c.is_ascii_alphabetic() {
                self.code = KeyCode::Char(c.to_ascii_uppercase());
            }
        }
    }

    // ========================================================================
    // Terminal events
    // ========================================================================

    /// Convert a terminal key event. Release events yield `None`.
    pub fn from_event(event: &TermKeyEvent) -> Option<Self> {
        if event.kind == KeyEventKind::Release {
            return None;
        }

        let mut modifiers = Modifiers::empty();
        if event.modifiers.contains(KeyModifiers::SHIFT) {
            modifiers |= Modifiers::SHIFT;
        }
        if event.modifiers.contains(KeyModifiers::CONTROL) {
            modifiers |= Modifiers::CTRL;
        }
        if event.modifiers.contains(KeyModifiers::ALT) {
            modifiers |= Modifiers::ALT;
        }
        if event.modifiers.intersects(KeyModifiers::META | KeyModifiers::SUPER) {
            modifiers |= Modifiers::META;
        }

        let code = match event.code {
            TermKeyCode::Char(c) => KeyCode::Char(c),
            TermKeyCode::Esc => KeyCode::Esc,
            TermKeyCode::Enter => KeyCode::Enter,
            TermKeyCode::Tab => KeyCode::Tab,
            TermKeyCode::BackTab => {
                modifiers |= Modifiers::SHIFT;
                KeyCode::Tab
            }
            TermKeyCode::Backspace => KeyCode::Backspace,
            TermKeyCode::Delete => KeyCode::Delete,
            TermKeyCode::Up => KeyCode::Up,
            TermKeyCode::Down => KeyCode::Down,
            TermKeyCode::Left => KeyCode::Left,
            TermKeyCode::Right => KeyCode::Right,
            TermKeyCode::Home => KeyCode::Home,
            TermKeyCode::End => KeyCode::End,
            TermKeyCode::PageUp => KeyCode::PageUp,
            TermKeyCode::PageDown => KeyCode::PageDown,
            TermKeyCode::Insert => KeyCode::Insert,
            TermKeyCode::F(n) => KeyCode::F(n),
            _ => return None,
        };

        Some(Self::new(code, modifiers))
    }

    /// Convert back into a terminal key event. Indirection keys have no
    /// terminal form.
    pub fn to_event(&self) -> Option<TermKeyEvent> {
        let code = match &self.code {
            KeyCode::Char(c) if self.modifiers.contains(Modifiers::CTRL) => {
                TermKeyCode::Char(c.to_ascii_lowercase())
            }
            KeyCode::Char(c) => TermKeyCode::Char(*c),
            KeyCode::Esc => TermKeyCode::Esc,
            KeyCode::Enter => TermKeyCode::Enter,
            KeyCode::Tab if self.modifiers.contains(Modifiers::SHIFT) => TermKeyCode::BackTab,
            KeyCode::Tab => TermKeyCode::Tab,
            KeyCode::Backspace => TermKeyCode::Backspace,
            KeyCode::Delete => TermKeyCode::Delete,
            KeyCode::Up => TermKeyCode::Up,
            KeyCode::Down => TermKeyCode::Down,
            KeyCode::Left => TermKeyCode::Left,
            KeyCode::Right => TermKeyCode::Right,
            KeyCode::Home => TermKeyCode::Home,
            KeyCode::End => TermKeyCode::End,
            KeyCode::PageUp => TermKeyCode::PageUp,
            KeyCode::PageDown => TermKeyCode::PageDown,
            KeyCode::Insert => TermKeyCode::Insert,
            KeyCode::F(n) => TermKeyCode::F(*n),
            KeyCode::Nop | KeyCode::Plug(_) => return None,
        };

        let mut modifiers = KeyModifiers::empty();
        if self.modifiers.contains(Modifiers::SHIFT) {
            modifiers |= KeyModifiers::SHIFT;
        }
        if self.modifiers.contains(Modifiers::CTRL) {
            modifiers |= KeyModifiers::CONTROL;
        } else if matches!(self.code, KeyCode::Char(c) if c.is_ascii_uppercase()) {
            modifiers |= KeyModifiers::SHIFT;
        }
        if self.modifiers.contains(Modifiers::ALT) {
            modifiers |= KeyModifiers::ALT;
        }
        if self.modifiers.contains(Modifiers::META) {
            modifiers |= KeyModifiers::META;
        }

        Some(TermKeyEvent::new(code, modifiers))
    }
}

impl From<char> for Key {
    fn from(c: char) -> Self {
        match c {
            '\x1b' => Key::esc(),
            '\r' | '\n' => Key::enter(),
            '\t' => Key::plain(KeyCode::Tab),
            _ => Key::char(c),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match &self.code {
            KeyCode::Plug(name) => return write!(f, "<Plug>{}", name),
            KeyCode::Char(c) if self.modifiers.is_empty() => match c {
                '<' => "<lt>".to_string(),
                ' ' => "<Space>".to_string(),
                '|' => "<Bar>".to_string(),
                '\\' => "<Bslash>".to_string(),
                _ => return write!(f, "{}", c),
            },
            KeyCode::Char('<') => "lt".to_string(),
            KeyCode::Char(' ') => "Space".to_string(),
            KeyCode::Char('|') => "Bar".to_string(),
            KeyCode::Char('\\') => "Bslash".to_string(),
            KeyCode::Char(c) => c.to_string(),
            KeyCode::Esc => "Esc".to_string(),
            KeyCode::Enter => "CR".to_string(),
            KeyCode::Tab => "Tab".to_string(),
            KeyCode::Backspace => "BS".to_string(),
            KeyCode::Delete => "Del".to_string(),
            KeyCode::Up => "Up".to_string(),
            KeyCode::Down => "Down".to_string(),
            KeyCode::Left => "Left".to_string(),
            KeyCode::Right => "Right".to_string(),
            KeyCode::Home => "Home".to_string(),
            KeyCode::End => "End".to_string(),
            KeyCode::PageUp => "PageUp".to_string(),
            KeyCode::PageDown => "PageDown".to_string(),
            KeyCode::Insert => "Insert".to_string(),
            KeyCode::F(n) => format!("F{}", n),
            KeyCode::Nop => "Nop".to_string(),
        };

        if base.starts_with('<') {
            return f.write_str(&base);
        }

        f.write_str("<")?;
        if self.modifiers.contains(Modifiers::CTRL) {
            f.write_str("C-")?;
        }
        if self.modifiers.contains(Modifiers::SHIFT) {
            f.write_str("S-")?;
        }
        if self.modifiers.contains(Modifiers::ALT) {
            f.write_str("A-")?;
        }
        if self.modifiers.contains(Modifiers::META) {
            f.write_str("D-")?;
        }
        write!(f, "{}>", base)
    }
}

// ============================================================================
// KeySequence
// ============================================================================

/// Ordered, immutable sequence of keys.
///
/// Sequences order lexicographically by key, so every sequence sharing a
/// prefix sorts into one contiguous run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct KeySequence(Vec<Key>);

impl KeySequence {
    pub fn new(keys: Vec<Key>) -> Self {
        Self(keys)
    }

    /// Parse key notation (`"d<C-V>2j"`).
    pub fn parse(notation: &str) -> Result<Self, KeyParseError> {
        parse_keys(notation).map(Self)
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Key> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Key> {
        self.0.iter()
    }

    pub fn starts_with(&self, prefix: &[Key]) -> bool {
        self.0.starts_with(prefix)
    }

    /// New sequence with `other` appended.
    pub fn concat(&self, other: &[Key]) -> Self {
        let mut keys = self.0.clone();
        keys.extend_from_slice(other);
        Self(keys)
    }

    /// True when any key is an indirection (`<Plug>`) key.
    pub fn has_plug(&self) -> bool {
        self.0.iter().any(Key::is_plug)
    }

    pub fn into_keys(self) -> Vec<Key> {
        self.0
    }
}

impl From<Vec<Key>> for KeySequence {
    fn from(keys: Vec<Key>) -> Self {
        Self(keys)
    }
}

impl From<&[Key]> for KeySequence {
    fn from(keys: &[Key]) -> Self {
        Self(keys.to_vec())
    }
}

impl From<Key> for KeySequence {
    fn from(key: Key) -> Self {
        Self(vec![key])
    }
}

impl FromStr for KeySequence {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in &self.0 {
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

impl Serialize for KeySequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KeySequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let notation = String::deserialize(deserializer)?;
        Self::parse(&notation).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Key notation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("unterminated key token starting at '{0}'")]
    Unterminated(String),

    #[error("unknown key name <{0}>")]
    UnknownKey(String),

    #[error("<Plug> must be followed by a name")]
    EmptyPlug,
}

/// Parse key notation into keys.
pub fn parse_keys(notation: &str) -> Result<Vec<Key>, KeyParseError> {
    let chars: Vec<char> = notation.chars().collect();
    let mut keys = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != '<' {
            keys.push(Key::from(c));
            i += 1;
            continue;
        }

        let close = chars[i + 1..].iter().position(|&ch| ch == '>');
        let Some(close) = close.map(|p| i + 1 + p) else {
            let rest: String = chars[i..].iter().collect();
            if looks_like_modifier_form(&chars[i + 1..]) {
                return Err(KeyParseError::Unterminated(rest));
            }
            keys.push(Key::char('<'));
            i += 1;
            continue;
        };

        let token: String = chars[i + 1..close].iter().collect();

        if token.eq_ignore_ascii_case("plug") {
            let start = close + 1;
            // `<Plug>(Name)` ends at the closing paren, `<Plug>Name` at the
            // next token or blank
            let paren_end = (chars.get(start) == Some(&'('))
                .then(|| chars[start..].iter().position(|&ch| ch == ')'))
                .flatten()
                .map(|p| start + p + 1);
            let end = paren_end.unwrap_or_else(|| {
                let mut end = start;
                while end < chars.len() && chars[end] != '<' && !chars[end].is_whitespace() {
                    end += 1;
                }
                end
            });
            if end == start {
                return Err(KeyParseError::EmptyPlug);
            }
            keys.push(Key::plug(chars[start..end].iter().collect::<String>()));
            i = end;
            continue;
        }

        match parse_token(&token)? {
            Some(key) => {
                keys.push(key);
                i = close + 1;
            }
            None => {
                // Not a key token, the '<' is literal
                keys.push(Key::char('<'));
                i += 1;
            }
        }
    }

    Ok(keys)
}

fn looks_like_modifier_form(rest: &[char]) -> bool {
    rest.len() >= 2
        && matches!(rest[0].to_ascii_uppercase(), 'C' | 'S' | 'A' | 'M' | 'D')
        && rest[1] == '-'
}

/// Parse the inside of a bracketed token. `Ok(None)` means the text is not a
/// key token at all.
fn parse_token(token: &str) -> Result<Option<Key>, KeyParseError> {
    let mut modifiers = Modifiers::empty();
    let mut rest = token;

    loop {
        let mut chars = rest.chars();
        let (Some(m), Some('-')) = (chars.next(), chars.next()) else {
            break;
        };
        if chars.as_str().is_empty() {
            break;
        }
        let flag = match m.to_ascii_uppercase() {
            'C' => Modifiers::CTRL,
            'S' => Modifiers::SHIFT,
            'A' | 'M' => Modifiers::ALT,
            'D' => Modifiers::META,
            _ => break,
        };
        modifiers |= flag;
        rest = chars.as_str();
    }

    let code = match named_key(rest) {
        Some(code) => code,
        None => {
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if !modifiers.is_empty() => KeyCode::Char(c),
                _ if !modifiers.is_empty() => {
                    return Err(KeyParseError::UnknownKey(token.to_string()))
                }
                _ => return Ok(None),
            }
        }
    };

    Ok(Some(Key::new(code, modifiers)))
}

fn named_key(name: &str) -> Option<KeyCode> {
    let lower = name.to_ascii_lowercase();
    let code = match lower.as_str() {
        "esc" => KeyCode::Esc,
        "cr" | "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "bs" | "backspace" => KeyCode::Backspace,
        "del" | "delete" => KeyCode::Delete,
        "space" => KeyCode::Char(' '),
        "lt" => KeyCode::Char('<'),
        "bar" => KeyCode::Char('|'),
        "bslash" => KeyCode::Char('\\'),
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "pageup" => KeyCode::PageUp,
        "pagedown" => KeyCode::PageDown,
        "insert" => KeyCode::Insert,
        "nop" => KeyCode::Nop,
        _ => {
            let n: u8 = lower.strip_prefix('f')?.parse().ok()?;
            if (1..=12).contains(&n) {
                KeyCode::F(n)
            } else {
                return None;
            }
        }
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(s: &str) -> KeySequence {
        KeySequence::parse(s).unwrap()
    }

    #[test]
    fn test_plain_characters() {
        let keys = parse_keys("dw").unwrap();
        assert_eq!(keys, vec![Key::char('d'), Key::char('w')]);
    }

    #[test]
    fn test_special_keys_case_insensitive() {
        assert_eq!(seq("<esc>"), seq("<Esc>"));
        assert_eq!(seq("<cr>"), seq("<Enter>"));
        assert_eq!(seq("<Return>").keys(), &[Key::enter()]);
        assert_eq!(seq("<F5>").keys(), &[Key::plain(KeyCode::F(5))]);
    }

    #[test]
    fn test_ctrl_letter_is_uppercased() {
        assert_eq!(seq("<C-p>"), seq("<C-P>"));
        assert!(seq("<c-v>").keys()[0].is_ctrl('v'));
        assert_eq!(seq("<C-v>").to_string(), "<C-V>");
    }

    #[test]
    fn test_shift_letter_normalizes() {
        let key = Key::new(KeyCode::Char('a'), Modifiers::SHIFT);
        assert_eq!(key, Key::char('A'));
        assert_eq!(seq("<S-a>"), seq("A"));
    }

    #[test]
    fn test_alias_modifiers() {
        assert_eq!(seq("<M-x>"), seq("<A-x>"));
        assert_eq!(seq("<D-x>").keys()[0].modifiers, Modifiers::META);
    }

    #[test]
    fn test_plug_token() {
        let keys = parse_keys("<Plug>(ExchangeLine)x").unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], Key::plug("(ExchangeLine)"));
        assert_eq!(keys[1], Key::char('x'));
    }

    #[test]
    fn test_plug_ends_at_next_token() {
        let keys = parse_keys("<Plug>TestMissing<Esc>").unwrap();
        assert_eq!(keys, vec![Key::plug("TestMissing"), Key::esc()]);
    }

    #[test]
    fn test_plug_without_name_fails() {
        assert_eq!(parse_keys("<Plug>"), Err(KeyParseError::EmptyPlug));
    }

    #[test]
    fn test_literal_less_than() {
        let keys = parse_keys("<foo").unwrap();
        assert_eq!(keys[0], Key::char('<'));
        assert_eq!(keys.len(), 4);
        let keys = parse_keys("a<b>").unwrap();
        assert_eq!(keys[1], Key::char('<'));
    }

    #[test]
    fn test_unknown_modifier_token_fails() {
        assert!(matches!(parse_keys("<C-Foo>"), Err(KeyParseError::UnknownKey(_))));
        assert!(matches!(parse_keys("<C-x"), Err(KeyParseError::Unterminated(_))));
    }

    #[test]
    fn test_display_is_canonical() {
        for notation in ["d2w", "<C-V>", "<lt>x", "<Space>", "<Plug>Foo", "<S-Tab>", "<A-x>", "<F12>", "<Bar>"] {
            let parsed = seq(notation);
            assert_eq!(parsed.to_string(), notation, "display of {notation}");
            assert_eq!(seq(&parsed.to_string()), parsed);
        }
    }

    #[test]
    fn test_prefix_ordering() {
        let mut seqs = vec![seq("b"), seq("ab"), seq("a"), seq("aa")];
        seqs.sort();
        assert_eq!(seqs, vec![seq("a"), seq("aa"), seq("ab"), seq("b")]);
    }

    #[test]
    fn test_serde_as_notation() {
        let json = serde_json::to_string(&seq("<C-W>j")).unwrap();
        assert_eq!(json, "\"<C-W>j\"");
        let back: KeySequence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, seq("<C-W>j"));
    }

    #[test]
    fn test_terminal_event_conversion() {
        let event = TermKeyEvent::new(TermKeyCode::Char('v'), KeyModifiers::CONTROL);
        let key = Key::from_event(&event).unwrap();
        assert!(key.is_ctrl('v'));
        assert_eq!(key.to_event(), Some(event));

        let shifted = TermKeyEvent::new(TermKeyCode::Char('A'), KeyModifiers::SHIFT);
        assert_eq!(Key::from_event(&shifted), Some(Key::char('A')));

        let back_tab = TermKeyEvent::new(TermKeyCode::BackTab, KeyModifiers::SHIFT);
        assert_eq!(Key::from_event(&back_tab).unwrap().to_string(), "<S-Tab>");

        assert_eq!(Key::plug("X").to_event(), None);
    }
}
