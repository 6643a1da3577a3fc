//! Per-run certification summary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ids::{GroupName, Lumisection, RunId, TriggerId};

/// Deviation summary for one run, certified against one fit group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub run: RunId,
    pub group: GroupName,
    /// Lumisection → number of triggers that deviated in it.
    pub bad_lumisections: BTreeMap<Lumisection, usize>,
    /// Trigger → lumisections where it deviated, ascending.
    pub deviant_triggers: BTreeMap<TriggerId, Vec<Lumisection>>,
    /// Distinct lumisections evaluated.
    pub total_lumisections: usize,
    /// Trigger-lumisection pairs evaluated.
    pub evaluated_pairs: usize,
    pub bad_pairs: usize,
    pub bad_lumisection_fraction: f64,
    pub bad_pair_fraction: f64,
    /// Triggers with observations but no model for this group.
    pub excluded_triggers: Vec<TriggerId>,
}

impl AnomalyReport {
    /// Empty report; populate with [`AnomalyReport::record`] and finish with
    /// [`AnomalyReport::finalize`].
    pub fn new(run: RunId, group: GroupName) -> Self {
        Self {
            run,
            group,
            bad_lumisections: BTreeMap::new(),
            deviant_triggers: BTreeMap::new(),
            total_lumisections: 0,
            evaluated_pairs: 0,
            bad_pairs: 0,
            bad_lumisection_fraction: 0.0,
            bad_pair_fraction: 0.0,
            excluded_triggers: Vec::new(),
        }
    }

    /// Record one evaluated trigger-lumisection pair.
    pub fn record(&mut self, trigger: &TriggerId, lumisection: Lumisection, bad: bool) {
        self.evaluated_pairs += 1;
        if !bad {
            return;
        }
        self.bad_pairs += 1;
        *self.bad_lumisections.entry(lumisection).or_insert(0) += 1;
        let lumisections = self.deviant_triggers.entry(trigger.clone()).or_default();
        if let Err(pos) = lumisections.binary_search(&lumisection) {
            lumisections.insert(pos, lumisection);
        }
    }

    pub fn exclude(&mut self, trigger: TriggerId) {
        if !self.excluded_triggers.contains(&trigger) {
            self.excluded_triggers.push(trigger);
            self.excluded_triggers.sort();
        }
    }

    /// Set the lumisection total and compute the summary ratios.
    pub fn finalize(mut self, total_lumisections: usize) -> Self {
        self.total_lumisections = total_lumisections;
        self.bad_lumisection_fraction = ratio(self.bad_lumisections.len(), total_lumisections);
        self.bad_pair_fraction = ratio(self.bad_pairs, self.evaluated_pairs);
        self
    }

    pub fn is_clean(&self) -> bool {
        self.bad_pairs == 0
    }

    /// Deviant-trigger count → lumisections with that count.
    pub fn lumisections_by_count(&self) -> BTreeMap<usize, Vec<Lumisection>> {
        let mut inverted: BTreeMap<usize, Vec<Lumisection>> = BTreeMap::new();
        for (&ls, &count) in &self.bad_lumisections {
            inverted.entry(count).or_default().push(ls);
        }
        inverted
    }

    /// Largest number of triggers that deviated in a single lumisection.
    pub fn max_deviant_count(&self) -> usize {
        self.bad_lumisections.values().copied().max().unwrap_or(0)
    }

    /// Bad lumisections of `trigger` compressed to inclusive `[first, last]`
    /// ranges.
    pub fn lumisection_ranges(&self, trigger: &TriggerId) -> Vec<(Lumisection, Lumisection)> {
        self.deviant_triggers
            .get(trigger)
            .map(|ls| compress_ranges(ls))
            .unwrap_or_default()
    }

    /// Triggers that deviated at least once.
    pub fn deviant_trigger_names(&self) -> BTreeSet<&TriggerId> {
        self.deviant_triggers.keys().collect()
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Compress ascending lumisections into contiguous inclusive ranges.
pub fn compress_ranges(lumisections: &[Lumisection]) -> Vec<(Lumisection, Lumisection)> {
    let mut ranges: Vec<(Lumisection, Lumisection)> = Vec::new();
    for &ls in lumisections {
        match ranges.last_mut() {
            Some((_, last)) if ls == *last + 1 => *last = ls,
            Some((_, last)) if ls == *last => {}
            _ => ranges.push((ls, ls)),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> AnomalyReport {
        let mut r = AnomalyReport::new(RunId::new(1), GroupName::default_group());
        let a = TriggerId::new("HLT_A");
        let b = TriggerId::new("HLT_B");
        for ls in 1..=5 {
            r.record(&a, ls, ls == 2 || ls == 3 || ls == 5);
            r.record(&b, ls, ls == 3);
        }
        r.finalize(5)
    }

    #[test]
    fn test_counts_and_fractions() {
        let r = report();
        assert_eq!(r.evaluated_pairs, 10);
        assert_eq!(r.bad_pairs, 4);
        assert_eq!(r.bad_lumisections.get(&3), Some(&2));
        assert_eq!(r.bad_lumisections.get(&2), Some(&1));
        assert!((r.bad_lumisection_fraction - 0.6).abs() < 1e-12);
        assert!((r.bad_pair_fraction - 0.4).abs() < 1e-12);
        assert_eq!(r.max_deviant_count(), 2);
        assert!(!r.is_clean());
    }

    #[test]
    fn test_lumisections_by_count() {
        let inverted = report().lumisections_by_count();
        assert_eq!(inverted.get(&1), Some(&vec![2, 5]));
        assert_eq!(inverted.get(&2), Some(&vec![3]));
    }

    #[test]
    fn test_lumisection_ranges() {
        let r = report();
        assert_eq!(r.lumisection_ranges(&"HLT_A".into()), vec![(2, 3), (5, 5)]);
        assert!(r.lumisection_ranges(&"HLT_C".into()).is_empty());
    }

    #[test]
    fn test_compress_ranges_skips_repeats() {
        assert_eq!(compress_ranges(&[1, 1, 2, 4, 5, 6, 9]), vec![(1, 2), (4, 6), (9, 9)]);
        assert!(compress_ranges(&[]).is_empty());
    }

    #[test]
    fn test_empty_report_has_zero_fractions() {
        let r = AnomalyReport::new(RunId::new(9), "g".into()).finalize(0);
        assert_eq!(r.bad_lumisection_fraction, 0.0);
        assert_eq!(r.bad_pair_fraction, 0.0);
        assert!(r.is_clean());
    }

    #[test]
    fn test_exclude_is_sorted_and_unique() {
        let mut r = AnomalyReport::new(RunId::new(1), "g".into());
        r.exclude("HLT_Z".into());
        r.exclude("HLT_A".into());
        r.exclude("HLT_Z".into());
        assert_eq!(
            r.excluded_triggers,
            vec![TriggerId::new("HLT_A"), TriggerId::new("HLT_Z")]
        );
    }
}
