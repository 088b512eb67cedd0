//! Mode-scoped mapping storage and resolution

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::key::{Key, KeySequence};
use crate::mode::{MappingModes, ModeIndex, PrefixLookup};

use super::{Mapping, MappingError, MappingOwner, MappingTarget};

/// How typed keys relate to the mappings of one mode
#[derive(Debug, Clone)]
pub enum Resolution {
    /// No mapping equals or extends the input
    NoMatch,
    /// The input is mapped, and a longer mapping extends it
    Ambiguous(Arc<Mapping>),
    /// The input is mapped and nothing extends it
    Match(Arc<Mapping>),
    /// Only longer mappings start with the input
    PartialMatch,
}

/// All mappings, one ordered table per mode
#[derive(Debug, Default)]
pub struct MappingTable {
    index: ModeIndex<Mapping>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a mapping for each of its modes.
    ///
    /// With `overwrite` the newest mapping replaces an existing one for the
    /// same keys; without it, modes that already map the keys are skipped.
    /// Returns the modes the mapping was installed for.
    pub fn insert(&mut self, mapping: Mapping, overwrite: bool) -> MappingModes {
        let modes = mapping
            .modes()
            .tags()
            .filter(|tag| overwrite || !self.index.contains(*tag, mapping.from.keys()))
            .fold(MappingModes::empty(), |acc, tag| acc | tag);
        self.install(mapping, modes)
    }

    /// Install a mapping only where it displaces nothing.
    ///
    /// A mode is skipped when the same keys are already mapped there, or when
    /// another mapping already targets the same keys or handler (a user
    /// binding to the same `<Plug>` key).
    pub fn insert_if_absent(&mut self, mapping: Mapping) -> MappingModes {
        let modes = mapping
            .modes()
            .tags()
            .filter(|tag| {
                !self.index.contains(*tag, mapping.from.keys())
                    && !self.has_mapping_to(*tag, &mapping.target)
            })
            .fold(MappingModes::empty(), |acc, tag| acc | tag);
        self.install(mapping, modes)
    }

    fn install(&mut self, mut mapping: Mapping, modes: MappingModes) -> MappingModes {
        if modes.is_empty() {
            debug!(keys = %mapping.from, "mapping skipped in every mode");
            return modes;
        }
        mapping.modes = modes;
        let mapping = Arc::new(mapping);
        for tag in modes.tags() {
            self.index.insert(tag, mapping.from.clone(), mapping.clone());
        }
        debug!(keys = %mapping.from, target = %mapping.target, owner = %mapping.owner, "mapping installed");
        modes
    }

    /// Remove the mapping for `from` in each of `modes` (`unmap`)
    pub fn remove(&mut self, modes: MappingModes, from: &KeySequence) -> Result<MappingModes, MappingError> {
        let removed = modes
            .tags()
            .filter(|tag| self.index.remove(*tag, from.keys()).is_some())
            .fold(MappingModes::empty(), |acc, tag| acc | tag);
        if removed.is_empty() {
            return Err(MappingError::NotFound(from.to_string()));
        }
        Ok(removed)
    }

    /// Remove every mapping installed by `owner`
    pub fn remove_owner(&mut self, owner: &MappingOwner) -> usize {
        let removed = self.index.retain(|mapping| &mapping.owner != owner);
        if removed > 0 {
            debug!(%owner, removed, "removed mappings");
        }
        removed
    }

    pub fn get(&self, mode: MappingModes, from: &[Key]) -> Option<Arc<Mapping>> {
        self.index.get(mode, from).cloned()
    }

    pub fn resolve(&self, mode: MappingModes, input: &[Key]) -> Resolution {
        match self.index.lookup(mode, input) {
            PrefixLookup::None => Resolution::NoMatch,
            PrefixLookup::Prefix => Resolution::PartialMatch,
            PrefixLookup::Exact(mapping) => Resolution::Match(mapping),
            PrefixLookup::Ambiguous(mapping) => Resolution::Ambiguous(mapping),
        }
    }

    /// Longest mapping whose keys are a prefix of (or equal to) `input`
    pub fn longest_prefix(&self, mode: MappingModes, input: &[Key]) -> Option<(usize, Arc<Mapping>)> {
        self.index.longest_prefix(mode, input)
    }

    /// Mappings of one mode that rewrite to exactly `target`
    pub fn mappings_to(&self, mode: MappingModes, target: &KeySequence) -> Vec<Arc<Mapping>> {
        self.index
            .entries(mode)
            .filter(|(_, mapping)| mapping.keys() == Some(target))
            .map(|(_, mapping)| mapping.clone())
            .collect()
    }

    pub fn has_mapping_to(&self, mode: MappingModes, target: &MappingTarget) -> bool {
        self.index
            .entries(mode)
            .any(|(_, mapping)| &mapping.target == target)
    }

    /// Every mapping installed by `owner`, once each
    pub fn by_owner(&self, owner: &MappingOwner) -> Vec<Arc<Mapping>> {
        let mut found: Vec<Arc<Mapping>> = Vec::new();
        for mapping in self.index.values() {
            if &mapping.owner == owner && !found.iter().any(|m| Arc::ptr_eq(m, mapping)) {
                found.push(mapping.clone());
            }
        }
        found
    }

    pub fn mappings(&self, mode: MappingModes) -> impl Iterator<Item = &Arc<Mapping>> {
        self.index.entries(mode).map(|(_, mapping)| mapping)
    }

    pub fn is_empty(&self) -> bool {
        self.index.values().next().is_none()
    }

    /// Check that expanding `mapping` terminates within `max_depth` levels.
    ///
    /// Walks the right-hand side the way resolution would, following every
    /// recursive mapping it meets. A mapping reached again while it is still
    /// being expanded is a cycle.
    pub fn check_expansion(
        &self,
        mode: MappingModes,
        mapping: &Mapping,
        max_depth: usize,
    ) -> Result<(), MappingError> {
        let mut path = vec![mapping.from.clone()];
        let mut heights = HashMap::new();
        let height = self.expansion_height(mode, mapping, &mut path, &mut heights, max_depth)?;
        if height > max_depth {
            return Err(cycle(&mapping.from, max_depth));
        }
        Ok(())
    }

    fn expansion_height(
        &self,
        mode: MappingModes,
        mapping: &Mapping,
        path: &mut Vec<KeySequence>,
        heights: &mut HashMap<KeySequence, usize>,
        max_depth: usize,
    ) -> Result<usize, MappingError> {
        let Some(rhs) = mapping.keys().filter(|_| mapping.recursive) else {
            return Ok(1);
        };
        let keys = rhs.keys();
        // A leading copy of the left-hand side is not remapped
        let mut i = if rhs.starts_with(mapping.from.keys()) {
            mapping.from.len()
        } else {
            0
        };

        let mut deepest = 0;
        while i < keys.len() {
            let Some((len, inner)) = self.longest_prefix(mode, &keys[i..]) else {
                i += 1;
                continue;
            };
            let height = match heights.get(&inner.from) {
                Some(height) => *height,
                None if path.contains(&inner.from) => {
                    return Err(cycle(&inner.from, max_depth));
                }
                None => {
                    path.push(inner.from.clone());
                    let height = self.expansion_height(mode, &inner, path, heights, max_depth)?;
                    path.pop();
                    heights.insert(inner.from.clone(), height);
                    height
                }
            };
            deepest = deepest.max(height);
            if deepest + 1 > max_depth {
                return Err(cycle(&mapping.from, max_depth));
            }
            i += len;
        }
        Ok(deepest + 1)
    }
}

fn cycle(keys: &KeySequence, depth: usize) -> MappingError {
    MappingError::MappingCycle {
        keys: keys.to_string(),
        depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: MappingModes = MappingModes::NORMAL;

    fn seq(s: &str) -> KeySequence {
        KeySequence::parse(s).unwrap()
    }

    fn map(from: &str, to: &str, modes: MappingModes, owner: MappingOwner) -> Mapping {
        Mapping::new(seq(from), MappingTarget::Keys(seq(to)), modes, owner, true).unwrap()
    }

    fn user(from: &str, to: &str) -> Mapping {
        map(from, to, N, MappingOwner::User)
    }

    fn plugin(name: &str) -> MappingOwner {
        MappingOwner::Plugin(name.to_string())
    }

    #[test]
    fn test_empty_modes_rejected() {
        let err = Mapping::new(
            seq("a"),
            MappingTarget::Keys(seq("b")),
            MappingModes::empty(),
            MappingOwner::User,
            true,
        );
        assert!(matches!(err, Err(MappingError::EmptyModes(_))));
    }

    #[test]
    fn test_resolve_states() {
        let mut table = MappingTable::new();
        table.insert(user("gx", "a"), true);
        table.insert(user("g", "b"), true);
        table.insert(user("zz", "c"), true);

        assert!(matches!(table.resolve(N, seq("g").keys()), Resolution::Ambiguous(_)));
        assert!(matches!(table.resolve(N, seq("gx").keys()), Resolution::Match(_)));
        assert!(matches!(table.resolve(N, seq("z").keys()), Resolution::PartialMatch));
        assert!(matches!(table.resolve(N, seq("q").keys()), Resolution::NoMatch));
        assert!(matches!(
            table.resolve(MappingModes::INSERT, seq("gx").keys()),
            Resolution::NoMatch
        ));
    }

    #[test]
    fn test_newest_insert_wins() {
        let mut table = MappingTable::new();
        table.insert(user("a", "b"), true);
        table.insert(user("a", "c"), true);
        let mapping = table.get(N, seq("a").keys()).unwrap();
        assert_eq!(mapping.keys(), Some(&seq("c")));
    }

    #[test]
    fn test_insert_without_overwrite_keeps_existing() {
        let mut table = MappingTable::new();
        table.insert(user("a", "b"), true);
        let modes = table.insert(map("a", "c", N | MappingModes::VISUAL, MappingOwner::User), false);
        assert_eq!(modes, MappingModes::VISUAL);
        assert_eq!(table.get(N, seq("a").keys()).unwrap().keys(), Some(&seq("b")));
    }

    #[test]
    fn test_installed_mapping_reports_its_modes() {
        let mut table = MappingTable::new();
        table.insert(user("a", "b"), true);
        table.insert(map("a", "c", N | MappingModes::VISUAL, MappingOwner::User), false);

        let visual = table.get(MappingModes::VISUAL, seq("a").keys()).unwrap();
        assert_eq!(visual.modes(), MappingModes::VISUAL);
        assert_eq!(table.get(N, seq("a").keys()).unwrap().modes(), N);
    }

    #[test]
    fn test_insert_if_absent_respects_user_binding_to_plug() {
        let mut table = MappingTable::new();
        table.insert(map("myKey", "<Plug>TestMissing", MappingModes::NVO, MappingOwner::User), true);

        let installed = table.insert_if_absent(map(
            "Z",
            "<Plug>TestMissing",
            N,
            plugin("test"),
        ));
        assert!(installed.is_empty());
        assert!(table.get(N, seq("Z").keys()).is_none());

        let installed = table.insert_if_absent(map(
            "L",
            "<Plug>TestMissing",
            MappingModes::INSERT,
            plugin("test"),
        ));
        assert_eq!(installed, MappingModes::INSERT);
    }

    #[test]
    fn test_insert_if_absent_never_overwrites() {
        let mut table = MappingTable::new();
        table.insert(user("Z", "x"), true);
        table.insert_if_absent(map("Z", "<Plug>Other", N, plugin("test")));
        assert_eq!(table.get(N, seq("Z").keys()).unwrap().owner, MappingOwner::User);
    }

    #[test]
    fn test_remove_owner_leaves_others() {
        let mut table = MappingTable::new();
        table.insert(user("a", "b"), true);
        table.insert(map("c", "d", N | MappingModes::VISUAL, plugin("one")), true);
        table.insert(map("e", "f", N, plugin("two")), true);

        assert_eq!(table.by_owner(&plugin("one")).len(), 1);
        assert_eq!(table.remove_owner(&plugin("one")), 2);
        assert!(table.by_owner(&plugin("one")).is_empty());
        assert_eq!(table.by_owner(&plugin("two")).len(), 1);
        assert!(table.get(N, seq("a").keys()).is_some());
    }

    #[test]
    fn test_unmap_reports_missing() {
        let mut table = MappingTable::new();
        table.insert(user("a", "b"), true);
        assert_eq!(table.remove(MappingModes::NVO, &seq("a")), Ok(N));
        assert!(matches!(
            table.remove(N, &seq("a")),
            Err(MappingError::NotFound(_))
        ));
    }

    #[test]
    fn test_mappings_to() {
        let mut table = MappingTable::new();
        table.insert(user("a", "<Plug>X"), true);
        table.insert(user("b", "<Plug>X"), true);
        table.insert(user("c", "<Plug>Y"), true);
        assert_eq!(table.mappings_to(N, &seq("<Plug>X")).len(), 2);
    }

    #[test]
    fn test_longest_prefix() {
        let mut table = MappingTable::new();
        table.insert(user("a", "x"), true);
        table.insert(user("abc", "y"), true);
        let (len, mapping) = table.longest_prefix(N, seq("abd").keys()).unwrap();
        assert_eq!(len, 1);
        assert_eq!(mapping.from, seq("a"));
    }

    #[test]
    fn test_cycle_detected() {
        let mut table = MappingTable::new();
        table.insert(user("a", "b"), true);
        table.insert(user("b", "a"), true);
        let mapping = table.get(N, seq("a").keys()).unwrap();
        assert!(matches!(
            table.check_expansion(N, &mapping, 1000),
            Err(MappingError::MappingCycle { .. })
        ));
    }

    #[test]
    fn test_rhs_starting_with_lhs_is_not_a_cycle() {
        let mut table = MappingTable::new();
        table.insert(user("j", "jzz"), true);
        let mapping = table.get(N, seq("j").keys()).unwrap();
        assert!(table.check_expansion(N, &mapping, 1000).is_ok());
    }

    #[test]
    fn test_depth_cap() {
        let mut table = MappingTable::new();
        table.insert(user("a", "b"), true);
        table.insert(user("b", "c"), true);
        table.insert(user("c", "d"), true);
        let mapping = table.get(N, seq("a").keys()).unwrap();
        assert!(table.check_expansion(N, &mapping, 3).is_ok());
        assert!(table.check_expansion(N, &mapping, 2).is_err());
    }

    #[test]
    fn test_noremap_never_cycles() {
        let mut table = MappingTable::new();
        table.insert(user("a", "b"), true);
        let mut noremap = user("b", "a");
        noremap.recursive = false;
        table.insert(noremap, true);
        let mapping = table.get(N, seq("a").keys()).unwrap();
        assert!(table.check_expansion(N, &mapping, 1000).is_ok());
    }
}
