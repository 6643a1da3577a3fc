//! Ordered, deduplicated sample sequences.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ids::{GroupName, Lumisection, RunId, TriggerId};
use super::sample::Sample;

/// Samples for one `(trigger, group)` pair, ordered by run then lumisection.
///
/// No two samples share `(run, lumisection)`; when duplicates are offered the
/// first occurrence wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    trigger: TriggerId,
    group: GroupName,
    per_bunch: bool,
    samples: Vec<Sample>,
}

impl Series {
    /// Build a series, sorting and deduplicating the given samples.
    pub fn from_samples(
        trigger: TriggerId,
        group: GroupName,
        per_bunch: bool,
        samples: impl IntoIterator<Item = Sample>,
    ) -> Self {
        let mut seen = BTreeSet::new();
        let mut samples: Vec<Sample> = samples
            .into_iter()
            .filter(|s| seen.insert(s.key()))
            .collect();
        samples.sort_by_key(Sample::key);
        Self {
            trigger,
            group,
            per_bunch,
            samples,
        }
    }

    pub fn trigger(&self) -> &TriggerId {
        &self.trigger
    }

    pub fn group(&self) -> &GroupName {
        &self.group
    }

    /// Whether `y` values were divided by the colliding-bunch count.
    pub fn per_bunch(&self) -> bool {
        self.per_bunch
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn xs(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.x).collect()
    }

    pub fn ys(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.y).collect()
    }

    /// Distinct runs contributing to this series, ascending.
    pub fn runs(&self) -> Vec<RunId> {
        let runs: BTreeSet<RunId> = self.samples.iter().map(|s| s.run).collect();
        runs.into_iter().collect()
    }

    /// Samples of one run, in lumisection order.
    pub fn samples_for_run(&self, run: RunId) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(move |s| s.run == run)
    }

    pub fn contains(&self, run: RunId, lumisection: Lumisection) -> bool {
        self.samples
            .binary_search_by_key(&(run, lumisection), Sample::key)
            .is_ok()
    }

    /// Keep the samples matching `keep`, preserving order.
    pub fn retain_where<F>(&self, mut keep: F) -> Series
    where
        F: FnMut(&Sample) -> bool,
    {
        Series {
            trigger: self.trigger.clone(),
            group: self.group.clone(),
            per_bunch: self.per_bunch,
            samples: self.samples.iter().filter(|s| keep(s)).cloned().collect(),
        }
    }
}
