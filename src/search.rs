//! Last-search state and match selection (`/`, `?`, `n`, `N`, `*`, `gn`, `gN`)

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::motion::{keyword_at, prev_char};

/// Whole-word pattern for `*`
fn word_pattern(word: &str) -> String {
    format!(r"\b{}\b", regex::escape(word))
}

fn compile(pattern: &str, ignore_case: bool) -> Option<Regex> {
    let build = |source: &str| {
        RegexBuilder::new(source)
            .case_insensitive(ignore_case)
            .multi_line(true)
            .build()
    };
    match build(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            debug!(%pattern, error = %err, "pattern is not a regex, matching literally");
            build(&regex::escape(pattern)).ok()
        }
    }
}

/// A match selected by `gn`/`gN`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSelection {
    pub start: usize,
    /// Offset of the match's last character
    pub last: usize,
}

/// The session's last search
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pattern: Option<String>,
    regex: Option<Regex>,
    backward: bool,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Whether the last search ran backward (`?`)
    pub fn is_backward(&self) -> bool {
        self.backward
    }

    /// Store a typed pattern. An empty pattern reuses the previous one.
    pub fn set_pattern(&mut self, pattern: &str, backward: bool, ignore_case: bool) {
        self.backward = backward;
        if pattern.is_empty() && self.pattern.is_some() {
            return;
        }
        self.regex = compile(pattern, ignore_case);
        self.pattern = Some(pattern.to_string());
    }

    /// Store the keyword under or after `caret` as a whole-word forward
    /// search (`*`). Returns false when the line has no keyword.
    pub fn set_word_at(&mut self, text: &str, caret: usize, ignore_case: bool) -> bool {
        let Some((start, end)) = keyword_at(text, caret) else {
            return false;
        };
        let pattern = word_pattern(&text[start..end]);
        self.backward = false;
        self.regex = compile(&pattern, ignore_case);
        self.pattern = Some(pattern);
        true
    }

    /// Non-empty matches as `[start, end)`
    pub fn matches(&self, text: &str) -> Vec<(usize, usize)> {
        let Some(regex) = &self.regex else {
            return Vec::new();
        };
        regex
            .find_iter(text)
            .filter(|m| m.start() < m.end())
            .map(|m| (m.start(), m.end()))
            .collect()
    }

    /// Start of the `count`th match strictly after (or before) `from`
    pub fn find(
        &self,
        text: &str,
        from: usize,
        forward: bool,
        count: usize,
        wrap: bool,
    ) -> Option<usize> {
        let matches = self.matches(text);
        if matches.is_empty() {
            return None;
        }
        let mut pos = from;
        for _ in 0..count.max(1) {
            let next = if forward {
                matches
                    .iter()
                    .find(|(s, _)| *s > pos)
                    .or_else(|| wrap.then(|| &matches[0]))
            } else {
                matches
                    .iter()
                    .rev()
                    .find(|(s, _)| *s < pos)
                    .or_else(|| wrap.then(|| &matches[matches.len() - 1]))
            };
            pos = next?.0;
        }
        Some(pos)
    }

    /// Match for `gn` (forward) or `gN` (backward).
    ///
    /// Forward takes the first match ending at or after the caret; in Visual
    /// mode it must end strictly after it, so a repeated `gn` extends to the
    /// next match. Backward mirrors this on match starts. `count` skips
    /// further matches.
    pub fn select_match(
        &self,
        text: &str,
        caret: usize,
        forward: bool,
        in_visual: bool,
        count: usize,
        wrap: bool,
    ) -> Option<MatchSelection> {
        let matches = self.matches(text);
        if matches.is_empty() {
            return None;
        }
        let last = matches.len() - 1;
        let skip = count.max(1) - 1;

        let index = if forward {
            let first = matches
                .iter()
                .position(|&(_, end)| {
                    let tail = prev_char(text, end);
                    if in_visual {
                        tail > caret
                    } else {
                        tail >= caret
                    }
                })
                .or_else(|| wrap.then_some(0))?;
            if wrap {
                (first + skip) % matches.len()
            } else if first + skip <= last {
                first + skip
            } else {
                return None;
            }
        } else {
            let first = matches
                .iter()
                .rposition(|&(start, _)| {
                    if in_visual {
                        start < caret
                    } else {
                        start <= caret
                    }
                })
                .or_else(|| wrap.then_some(last))?;
            if wrap {
                (first + matches.len() - skip % matches.len()) % matches.len()
            } else {
                first.checked_sub(skip)?
            }
        };

        let (start, end) = matches[index];
        Some(MatchSelection {
            start,
            last: prev_char(text, end),
        })
    }
}
