//! Named partitions of runs used for independent or comparative fitting.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ids::{GroupName, RunId};

/// A named set of runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunGroup {
    pub name: GroupName,
    pub runs: BTreeSet<RunId>,
}

impl RunGroup {
    pub fn new(name: impl Into<GroupName>, runs: impl IntoIterator<Item = RunId>) -> Self {
        Self {
            name: name.into(),
            runs: runs.into_iter().collect(),
        }
    }

    pub fn contains(&self, run: RunId) -> bool {
        self.runs.contains(&run)
    }
}

/// Group membership for a set of runs.
///
/// A run may belong to several groups; runs in no group are excluded from
/// grouped series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunGroups {
    groups: BTreeMap<GroupName, BTreeSet<RunId>>,
}

impl RunGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run in the `"default"` group.
    pub fn single(runs: impl IntoIterator<Item = RunId>) -> Self {
        Self::new().with_group(RunGroup::new(GroupName::default_group(), runs))
    }

    /// Add (or extend) a group.
    pub fn with_group(mut self, group: RunGroup) -> Self {
        self.insert(group);
        self
    }

    pub fn insert(&mut self, group: RunGroup) {
        self.groups.entry(group.name).or_default().extend(group.runs);
    }

    /// Groups the run belongs to, in name order.
    pub fn groups_for(&self, run: RunId) -> Vec<&GroupName> {
        self.groups
            .iter()
            .filter(|(_, runs)| runs.contains(&run))
            .map(|(name, _)| name)
            .collect()
    }

    pub fn runs(&self, group: &GroupName) -> Option<&BTreeSet<RunId>> {
        self.groups.get(group)
    }

    /// Union of every group's runs.
    pub fn all_runs(&self) -> BTreeSet<RunId> {
        self.groups.values().flatten().copied().collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &GroupName> {
        self.groups.keys()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Plain `group → [run]` map, as stored alongside persisted fits.
    pub fn to_map(&self) -> BTreeMap<GroupName, Vec<RunId>> {
        self.groups
            .iter()
            .map(|(name, runs)| (name.clone(), runs.iter().copied().collect()))
            .collect()
    }
}

/// Configuration-file form of one group: explicit runs and/or LHC fills.
///
/// Fills are resolved to runs by the data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunGroupDefinition {
    #[serde(default)]
    pub runs: Vec<u32>,
    #[serde(default)]
    pub fills: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runs(ids: &[u32]) -> Vec<RunId> {
        ids.iter().copied().map(RunId::new).collect()
    }

    #[test]
    fn test_single_uses_default_group() {
        let groups = RunGroups::single(runs(&[1, 2]));
        assert_eq!(groups.groups_for(RunId::new(1)), vec![&GroupName::default_group()]);
        assert!(groups.groups_for(RunId::new(3)).is_empty());
    }

    #[test]
    fn test_run_in_multiple_groups() {
        let groups = RunGroups::single(runs(&[1, 2, 3]))
            .with_group(RunGroup::new("after_menu_change", runs(&[3, 4])));
        let names: Vec<&str> = groups
            .groups_for(RunId::new(3))
            .into_iter()
            .map(GroupName::as_str)
            .collect();
        assert_eq!(names, vec!["after_menu_change", "default"]);
        assert_eq!(groups.all_runs().len(), 4);
    }

    #[test]
    fn test_insert_extends_existing_group() {
        let mut groups = RunGroups::single(runs(&[1]));
        groups.insert(RunGroup::new(GroupName::default_group(), runs(&[2])));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.runs(&GroupName::default_group()).map(|r| r.len()), Some(2));
    }

    #[test]
    fn test_definition_parses_runs_or_fills() {
        let def: RunGroupDefinition = serde_json::from_str(r#"{"fills": [6371]}"#).unwrap();
        assert!(def.runs.is_empty());
        assert_eq!(def.fills, vec![6371]);
    }
}
