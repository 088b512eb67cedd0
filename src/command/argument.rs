//! Collection of command arguments (`f{char}`, `r<C-K>a:`, `/pattern<CR>`)

use crate::key::{Key, KeyCode};

use super::ArgumentKind;

/// A collected argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Char(char),
    Text(String),
    Count(usize),
}

impl Argument {
    pub fn as_char(&self) -> Option<char> {
        match self {
            Argument::Char(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Argument::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Outcome of feeding one key to the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collected {
    Pending,
    Done(Argument),
    Cancelled,
    /// The argument ended on a key that belongs to the next command
    Redispatch(Argument, Key),
}

#[derive(Debug, Clone)]
enum State {
    Waiting,
    /// After `<C-K>`, holding the first digraph key once typed
    Digraph(Option<char>),
    Text(String),
    Digits(usize),
}

/// Accumulates keys until a command's argument is complete
#[derive(Debug, Clone)]
pub struct ArgumentCollector {
    kind: ArgumentKind,
    allow_digraph: bool,
    state: State,
}

impl ArgumentCollector {
    pub fn new(kind: ArgumentKind, allow_digraph: bool) -> Self {
        let state = match kind {
            ArgumentKind::Digraph => State::Digraph(None),
            ArgumentKind::ExString => State::Text(String::new()),
            ArgumentKind::Count => State::Digits(0),
            ArgumentKind::None | ArgumentKind::Character => State::Waiting,
        };
        Self {
            kind,
            allow_digraph,
            state,
        }
    }

    pub fn kind(&self) -> ArgumentKind {
        self.kind
    }

    /// Text typed so far for an ex-string argument
    pub fn text(&self) -> Option<&str> {
        match &self.state {
            State::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Finish an ex-string argument (on a command that completes ex input)
    pub fn finish(&mut self) -> Argument {
        match &mut self.state {
            State::Text(text) => Argument::Text(std::mem::take(text)),
            State::Digits(n) => Argument::Count(*n),
            _ => Argument::Text(String::new()),
        }
    }

    pub fn feed(&mut self, key: &Key) -> Collected {
        if key.is_esc() {
            return Collected::Cancelled;
        }

        match &mut self.state {
            State::Waiting => {
                if self.allow_digraph && key.is_ctrl('k') {
                    self.state = State::Digraph(None);
                    return Collected::Pending;
                }
                match typed_char(key) {
                    Some(c) => Collected::Done(Argument::Char(c)),
                    None => Collected::Cancelled,
                }
            }
            State::Digraph(first) => {
                let Some(c) = typed_char(key) else {
                    return Collected::Cancelled;
                };
                match first.take() {
                    None => {
                        *first = Some(c);
                        Collected::Pending
                    }
                    Some(a) => Collected::Done(Argument::Char(digraph(a, c))),
                }
            }
            State::Text(text) => {
                if key.code == KeyCode::Backspace {
                    if text.pop().is_none() {
                        return Collected::Cancelled;
                    }
                    return Collected::Pending;
                }
                if let Some(c) = typed_char(key) {
                    text.push(c);
                }
                Collected::Pending
            }
            State::Digits(n) => match key.digit() {
                Some(d) => {
                    *n = n.saturating_mul(10).saturating_add(d as usize);
                    Collected::Pending
                }
                None => Collected::Redispatch(Argument::Count(*n), key.clone()),
            },
        }
    }
}

fn typed_char(key: &Key) -> Option<char> {
    if !key.modifiers.is_empty() {
        return None;
    }
    match key.code {
        KeyCode::Char(c) => Some(c),
        KeyCode::Tab => Some('\t'),
        KeyCode::Enter => Some('\n'),
        _ => None,
    }
}

/// Two-character digraphs (RFC 1345 subset)
const DIGRAPHS: &[(char, char, char)] = &[
    ('a', ':', 'ä'),
    ('o', ':', 'ö'),
    ('u', ':', 'ü'),
    ('A', ':', 'Ä'),
    ('O', ':', 'Ö'),
    ('U', ':', 'Ü'),
    ('s', 's', 'ß'),
    ('e', '\'', 'é'),
    ('e', '!', 'è'),
    ('a', '\'', 'á'),
    ('a', '!', 'à'),
    ('n', '?', 'ñ'),
    ('c', ',', 'ç'),
    ('E', 'u', '€'),
    ('P', 'd', '£'),
    ('C', 'o', '©'),
    ('R', 'g', '®'),
    ('D', 'G', '°'),
    ('-', '>', '→'),
    ('<', '-', '←'),
    ('1', '2', '½'),
    ('a', '*', 'α'),
    ('b', '*', 'β'),
    ('p', '*', 'π'),
];

/// Compose a digraph. Unknown pairs (in either order) yield the second key.
pub fn digraph(a: char, b: char) -> char {
    DIGRAPHS
        .iter()
        .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
        .map(|(_, _, c)| *c)
        .unwrap_or(b)
}
