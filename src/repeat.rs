//! Dot-repeat recording.
//!
//! Keys are recorded from the moment an idle Normal-mode session starts a
//! command until it is idle again. If anything in between changed text the
//! recording becomes the last change, which `.` replays.

use crate::extension::HandlerRef;
use crate::key::{Key, KeySequence};

/// One recorded input
#[derive(Debug, Clone, PartialEq)]
pub enum Stroke {
    Key(Key),
    /// A repeatable handler reached through a mapping
    Handler(HandlerRef),
}

/// A replayable change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedChange {
    /// Count typed before the command; `.` with its own count replaces it
    pub count: Option<usize>,
    pub strokes: Vec<Stroke>,
}

impl RecordedChange {
    /// Recorded keys in notation, handlers shown by name
    pub fn describe(&self) -> String {
        let mut out = self.count.map(|c| c.to_string()).unwrap_or_default();
        for stroke in &self.strokes {
            match stroke {
                Stroke::Key(key) => out.push_str(&KeySequence::from(key.clone()).to_string()),
                Stroke::Handler(handler) => out.push_str(handler.name()),
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    strokes: Vec<Stroke>,
    count: Option<usize>,
    changed: bool,
    last: Option<RecordedChange>,
    replaying: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stroke: Stroke) {
        if !self.replaying {
            self.strokes.push(stroke);
        }
    }

    pub fn record_key(&mut self, key: &Key) {
        self.record(Stroke::Key(key.clone()));
    }

    pub fn is_recording(&self) -> bool {
        !self.strokes.is_empty()
    }

    /// Count prefix of the command being recorded
    pub fn set_count(&mut self, count: Option<usize>) {
        if !self.replaying {
            self.count = count;
        }
    }

    /// The command being recorded changed text
    pub fn mark_change(&mut self) {
        self.changed = true;
    }

    /// Close the current recording; called when the session is idle
    pub fn finish(&mut self) {
        let strokes = std::mem::take(&mut self.strokes);
        let count = self.count.take();
        let changed = std::mem::replace(&mut self.changed, false);
        if self.replaying || !changed || strokes.is_empty() {
            return;
        }
        self.last = Some(RecordedChange { count, strokes });
    }

    /// Begin the recording again from the next stroke. Strokes and the
    /// change mark collected so far are dropped; `count` becomes the
    /// recording's count.
    pub fn restart(&mut self, count: Option<usize>) {
        if self.replaying {
            return;
        }
        self.strokes.clear();
        self.changed = false;
        self.count = count;
    }

    /// Drop the current recording without saving it
    pub fn discard(&mut self) {
        self.strokes.clear();
        self.count = None;
        self.changed = false;
    }

    pub fn last(&self) -> Option<&RecordedChange> {
        self.last.as_ref()
    }

    /// While replaying nothing is recorded
    pub fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    /// `3.` makes 3 the count of later plain `.` repeats too
    pub fn set_last_count(&mut self, count: usize) {
        if let Some(last) = &mut self.last {
            last.count = Some(count);
        }
    }
}
