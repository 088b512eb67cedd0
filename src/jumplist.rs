//! Jump history behind `<C-O>` and `<C-I>`.
//!
//! Offsets are byte positions in one text. Commands flagged
//! `SAVE_JUMP_POSITION` record the caret they leave; edits shift the
//! recorded offsets through [`JumpList::adjust`].

pub const MAX_JUMPS: usize = 100;

/// Recorded caret offsets, oldest first.
///
/// `cursor` is `None` while the caret is "live", i.e. not walking the
/// history. Walking back from live appends the live caret once so that
/// `<C-I>` can return to it.
#[derive(Debug, Clone, Default)]
pub struct JumpList {
    offsets: Vec<usize>,
    cursor: Option<usize>,
}

impl JumpList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a jump away from `offset`, dropping anything walked back over
    pub fn push(&mut self, offset: usize) {
        if let Some(cursor) = self.cursor.take() {
            self.offsets.truncate(cursor + 1);
        }
        if self.offsets.last() != Some(&offset) {
            self.offsets.push(offset);
        }
        if self.offsets.len() > MAX_JUMPS {
            let excess = self.offsets.len() - MAX_JUMPS;
            self.offsets.drain(..excess);
        }
    }

    /// `<C-O>` from `current`
    pub fn go_back(&mut self, current: usize) -> Option<usize> {
        let target = match self.cursor {
            Some(0) => return None,
            Some(cursor) => cursor - 1,
            None => {
                if self.offsets.last() != Some(&current) {
                    self.offsets.push(current);
                }
                self.offsets.len().checked_sub(2)?
            }
        };
        self.cursor = Some(target);
        self.offsets.get(target).copied()
    }

    /// `<C-I>`; leaves history mode on reaching the newest entry
    pub fn go_forward(&mut self) -> Option<usize> {
        let next = self.cursor? + 1;
        let offset = *self.offsets.get(next)?;
        self.cursor = (next + 1 < self.offsets.len()).then_some(next);
        Some(offset)
    }

    /// Account for `[start, end)` being replaced by `inserted` bytes.
    /// Offsets inside the replaced span move to `start`.
    pub fn adjust(&mut self, start: usize, end: usize, inserted: usize) {
        for offset in &mut self.offsets {
            if *offset >= end {
                *offset = *offset + inserted - (end - start);
            } else if *offset > start {
                *offset = start;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(offsets: &[usize]) -> JumpList {
        let mut list = JumpList::new();
        for &offset in offsets {
            list.push(offset);
        }
        list
    }

    #[test]
    fn test_nothing_to_walk() {
        let mut jumps = JumpList::new();
        assert_eq!(jumps.go_back(5), None);
        assert_eq!(jumps.go_forward(), None);
    }

    #[test]
    fn test_walk_back_and_return_to_live_caret() {
        let mut jumps = list(&[0, 10]);

        assert_eq!(jumps.go_back(20), Some(10));
        assert_eq!(jumps.go_back(10), Some(0));
        assert_eq!(jumps.go_back(0), None);

        assert_eq!(jumps.go_forward(), Some(10));
        assert_eq!(jumps.go_forward(), Some(20));
        assert_eq!(jumps.go_forward(), None);
    }

    #[test]
    fn test_back_from_last_jump_position() {
        // The live caret equals the newest entry, so nothing is appended
        let mut jumps = list(&[4, 9]);
        assert_eq!(jumps.go_back(9), Some(4));
        assert_eq!(jumps.len(), 2);
    }

    #[test]
    fn test_repeated_offset_recorded_once() {
        let jumps = list(&[3, 3]);
        assert_eq!(jumps.len(), 1);
    }

    #[test]
    fn test_jump_after_walking_back_forgets_newer_entries() {
        let mut jumps = list(&[0, 10, 20]);
        jumps.go_back(30);
        jumps.go_back(20);

        jumps.push(15);

        assert_eq!(jumps.go_forward(), None);
        assert_eq!(jumps.go_back(40), Some(15));
        assert_eq!(jumps.go_back(15), Some(10));
    }

    #[test]
    fn test_oldest_dropped_past_limit() {
        let offsets: Vec<usize> = (0..MAX_JUMPS + 5).collect();
        let mut jumps = list(&offsets);

        assert_eq!(jumps.len(), MAX_JUMPS);
        let mut oldest = None;
        let mut current = MAX_JUMPS + 4;
        while let Some(offset) = jumps.go_back(current) {
            oldest = Some(offset);
            current = offset;
        }
        assert_eq!(oldest, Some(5));
    }

    #[test]
    fn test_adjust_shifts_and_collapses() {
        let mut jumps = list(&[2, 6, 12]);

        jumps.adjust(4, 8, 1);

        assert_eq!(jumps.go_back(0), Some(9));
        assert_eq!(jumps.go_back(9), Some(4));
        assert_eq!(jumps.go_back(4), Some(2));
    }
}
