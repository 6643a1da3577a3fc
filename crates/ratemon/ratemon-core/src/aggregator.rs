//! Raw per-lumisection records to per-trigger, per-group series.

use std::collections::{BTreeMap, BTreeSet};

use ratemon_api::AggregatorConfig;
use ratemon_spi::{
    Diagnostic, Diagnostics, GroupName, Lumisection, RateMonError, RateSource, RawRateRecord,
    Result, RunGroup, RunGroupDefinition, RunGroups, RunId, Sample, Series, SkipReason, SourceError,
    TriggerId, TriggerSelector,
};
use tracing::{debug, info, warn};

/// Everything usable observed in one run, independent of grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct RunObservations {
    pub run: RunId,
    /// Colliding bunches, 1 when the source had no (or a zero) count.
    pub colliding_bunches: u32,
    /// Whether sample rates were divided by `colliding_bunches`.
    pub per_bunch: bool,
    /// Samples per trigger, in lumisection order.
    pub samples: BTreeMap<TriggerId, Vec<Sample>>,
}

impl RunObservations {
    /// Factor turning a sample rate back into an absolute rate.
    pub fn bunch_factor(&self) -> f64 {
        if self.per_bunch {
            f64::from(self.colliding_bunches)
        } else {
            1.0
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }

    /// Distinct lumisections with at least one sample.
    pub fn lumisections(&self) -> BTreeSet<Lumisection> {
        self.samples
            .values()
            .flatten()
            .map(|s| s.lumisection)
            .collect()
    }
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// Group membership the series were built from.
    pub run_groups: RunGroups,
    pub series: BTreeMap<(TriggerId, GroupName), Series>,
    pub runs: BTreeMap<RunId, RunObservations>,
    pub diagnostics: Diagnostics,
}

impl Aggregation {
    pub fn series_for(&self, trigger: &TriggerId, group: &GroupName) -> Option<&Series> {
        self.series.get(&(trigger.clone(), group.clone()))
    }

    /// Triggers with at least one grouped series.
    pub fn triggers(&self) -> BTreeSet<&TriggerId> {
        self.series.keys().map(|(t, _)| t).collect()
    }

    /// Groups with at least one series.
    pub fn groups(&self) -> BTreeSet<&GroupName> {
        self.series.keys().map(|(_, g)| g).collect()
    }
}

/// A fetched run: observations, converted samples per trigger, the
/// triggers the source returned, and those that contributed nothing with the
/// reason.
struct ObservedRun {
    observations: RunObservations,
    converted: BTreeMap<TriggerId, Vec<Sample>>,
    returned: BTreeSet<TriggerId>,
    skipped: Vec<(TriggerId, String)>,
}

/// Builds series from a [`RateSource`].
#[derive(Debug, Clone, Default)]
pub struct RunGroupAggregator {
    config: AggregatorConfig,
}

impl RunGroupAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Resolve configured group definitions, expanding fills through the
    /// source. Fills that cannot be resolved are recorded and skipped.
    pub fn resolve_groups(
        source: &dyn RateSource,
        definitions: &BTreeMap<GroupName, RunGroupDefinition>,
        diagnostics: &mut Diagnostics,
    ) -> RunGroups {
        let mut groups = RunGroups::new();
        for (name, definition) in definitions {
            let mut runs: BTreeSet<RunId> = definition.runs.iter().copied().map(RunId::new).collect();
            for &fill in &definition.fills {
                match source.runs_in_fill(fill) {
                    Ok(fill_runs) => runs.extend(fill_runs),
                    Err(err) => {
                        warn!(group = %name, fill, error = %err, "cannot resolve fill");
                        diagnostics.push(Diagnostic {
                            run: None,
                            trigger: None,
                            group: Some(name.clone()),
                            reason: SkipReason::DataUnavailable {
                                detail: format!("fill {}: {}", fill, err),
                            },
                        });
                    }
                }
            }
            groups.insert(RunGroup::new(name.clone(), runs));
        }
        groups
    }

    /// Fetch every run and build one series per `(trigger, group)`.
    ///
    /// Per-run and per-trigger failures are recorded in the diagnostics.
    /// Fails with `NoValidTriggers` when none of the named triggers exist
    /// and with `NoData` when no run yields a usable sample.
    pub fn aggregate(
        &self,
        source: &dyn RateSource,
        runs: &[RunId],
        groups: &RunGroups,
        selector: &TriggerSelector,
    ) -> Result<Aggregation> {
        let selector = self.effective_selector(selector)?;
        let mut aggregation = Aggregation {
            run_groups: groups.clone(),
            ..Aggregation::default()
        };
        let mut grouped: BTreeMap<(TriggerId, GroupName), Vec<Sample>> = BTreeMap::new();
        let mut returned_triggers: BTreeSet<TriggerId> = BTreeSet::new();
        let mut fetched_any = false;

        let requested: BTreeSet<RunId> = runs.iter().copied().collect();
        for &run in &requested {
            let observed = match self.observe_run(source, run, &selector) {
                Ok(observed) => observed,
                Err(err) => {
                    warn!(run = %run, error = %err, "run skipped");
                    aggregation.diagnostics.run_skipped(run, err.to_string());
                    continue;
                }
            };
            fetched_any = true;
            let ObservedRun {
                observations,
                converted: per_trigger,
                returned,
                skipped,
            } = observed;
            for (trigger, detail) in skipped {
                warn!(run = %run, trigger = %trigger, "{}", detail);
                aggregation.diagnostics.trigger_run_skipped(run, trigger, detail);
            }
            returned_triggers.extend(returned);

            let memberships = groups.groups_for(run);
            if memberships.is_empty() {
                warn!(run = %run, "run is not a member of any run group");
                aggregation
                    .diagnostics
                    .run_skipped(run, "run is not a member of any run group");
            }
            for (trigger, samples) in per_trigger {
                for group in &memberships {
                    for sample in &samples {
                        let group = match (self.config.partition_by_prescale_column, sample.prescale_column) {
                            (true, Some(column)) => prescale_partition(group, column),
                            _ => (*group).clone(),
                        };
                        grouped
                            .entry((trigger.clone(), group))
                            .or_default()
                            .push(sample.clone());
                    }
                }
            }
            debug!(
                run = %run,
                samples = observations.sample_count(),
                bunches = observations.colliding_bunches,
                "run aggregated"
            );
            aggregation.runs.insert(run, observations);
        }

        if let TriggerSelector::Named(names) = &selector {
            if fetched_any && !names.iter().any(|t| returned_triggers.contains(t)) {
                return Err(RateMonError::NoValidTriggers(join_names(names)));
            }
        }
        if aggregation.runs.values().all(|o| o.sample_count() == 0) {
            return Err(RateMonError::NoData {
                runs: requested.into_iter().collect(),
            });
        }

        let per_bunch = self.config.normalize_bunches;
        for ((trigger, group), samples) in grouped {
            let series = Series::from_samples(trigger.clone(), group.clone(), per_bunch, samples);
            aggregation.series.insert((trigger, group), series);
        }
        info!(
            runs = aggregation.runs.len(),
            series = aggregation.series.len(),
            skipped = aggregation.diagnostics.len(),
            "aggregation complete"
        );
        Ok(aggregation)
    }

    /// Drop vetoed names from a named selector.
    fn effective_selector(&self, selector: &TriggerSelector) -> Result<TriggerSelector> {
        match selector {
            TriggerSelector::All => Ok(TriggerSelector::All),
            TriggerSelector::Named(names) => {
                let kept: Vec<TriggerId> = names
                    .iter()
                    .filter(|t| !self.config.vetoed_triggers.contains(*t))
                    .cloned()
                    .collect();
                if kept.is_empty() {
                    return Err(RateMonError::NoValidTriggers(join_names(names)));
                }
                Ok(TriggerSelector::Named(kept))
            }
        }
    }

    fn observe_run(
        &self,
        source: &dyn RateSource,
        run: RunId,
        selector: &TriggerSelector,
    ) -> std::result::Result<ObservedRun, SourceError> {
        let rates = source.fetch_rates(run, selector)?;
        let colliding_bunches = match source.colliding_bunches(run)? {
            Some(n) if n > 0 => n,
            _ => 1,
        };
        let deadtime = if self.config.correct_deadtime || self.config.max_deadtime < 1.0 {
            source.deadtime(run)?
        } else {
            BTreeMap::new()
        };

        let mut per_trigger = BTreeMap::new();
        let mut returned = BTreeSet::new();
        let mut skipped = Vec::new();
        if let TriggerSelector::Named(names) = selector {
            for name in names.iter().filter(|t| !rates.contains_key(*t)) {
                skipped.push((name.clone(), "trigger not reported for run".to_string()));
            }
        }
        for (trigger, records) in rates {
            if self.config.vetoed_triggers.contains(&trigger) || !selector.matches(&trigger) {
                continue;
            }
            returned.insert(trigger.clone());
            let converted: Vec<Sample> = records
                .iter()
                .filter_map(|r| self.convert(&trigger, run, r, colliding_bunches, &deadtime))
                .collect();
            if converted.is_empty() {
                skipped.push((
                    trigger,
                    format!("no usable samples among {} records", records.len()),
                ));
                continue;
            }
            per_trigger.insert(trigger, converted);
        }

        let observations = RunObservations {
            run,
            colliding_bunches,
            per_bunch: self.config.normalize_bunches,
            samples: per_trigger
                .iter()
                .map(|(t, samples)| {
                    let mut samples = samples.clone();
                    samples.sort_by_key(|s| s.lumisection);
                    samples.dedup_by_key(|s| s.lumisection);
                    (t.clone(), samples)
                })
                .collect(),
        };
        Ok(ObservedRun {
            observations,
            converted: per_trigger,
            returned,
            skipped,
        })
    }

    /// Apply the per-lumisection cuts and corrections to one record.
    fn convert(
        &self,
        trigger: &TriggerId,
        run: RunId,
        record: &RawRateRecord,
        colliding_bunches: u32,
        deadtime: &BTreeMap<Lumisection, f64>,
    ) -> Option<Sample> {
        let config = &self.config;
        let x = record.x.filter(|x| x.is_finite())?;
        if let Some((first, last)) = config.ls_range {
            if record.lumisection < first || record.lumisection > last {
                return None;
            }
        }
        if let Some(columns) = &config.prescale_columns {
            if !record.prescale_column.is_some_and(|c| columns.contains(&c)) {
                return None;
            }
        }
        if config.rate_ceiling.is_some_and(|ceiling| record.rate > ceiling) {
            return None;
        }

        let mut y = record.rate;
        let dead = deadtime.get(&record.lumisection).copied().unwrap_or(0.0);
        if dead > config.max_deadtime {
            return None;
        }
        if config.correct_deadtime {
            y *= 1.0 + dead;
        }
        if config.use_prescaled_rate && record.prescale != 0 {
            y /= f64::from(record.prescale);
        }
        if config.normalize_bunches {
            y /= f64::from(colliding_bunches);
        }

        Some(
            Sample::new(trigger.clone(), run, record.lumisection, x, y)
                .with_status(record.detector_ready, record.beams_stable)
                .with_prescale_column(record.prescale_column),
        )
    }
}

/// Fit group holding the samples of `group` taken in one prescale column.
pub fn prescale_partition(group: &GroupName, column: u32) -> GroupName {
    group.partition(&format!("psc{}", column))
}

fn join_names(names: &[TriggerId]) -> String {
    names
        .iter()
        .map(TriggerId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FixtureDocument, FixtureRateSource, RunFixture};

    fn rec(ls: u32, x: f64, rate: f64) -> RawRateRecord {
        RawRateRecord::new(ls, Some(x), rate)
    }

    fn source() -> FixtureRateSource {
        FixtureRateSource::new(FixtureDocument::default())
            .with_run(
                1,
                RunFixture::new(100)
                    .with_trigger(
                        "HLT_A",
                        vec![
                            rec(1, 10.0, 1000.0),
                            rec(2, 20.0, 2000.0),
                            RawRateRecord::new(3, None, 3000.0),
                            rec(4, 40.0, 4000.0),
                        ],
                    )
                    .with_trigger("HLT_Veto", vec![rec(1, 10.0, 1.0)])
                    .with_deadtime(2, 0.05)
                    .with_deadtime(4, 0.5),
            )
            .with_run(
                2,
                RunFixture::new(0).with_trigger("HLT_A", vec![rec(1, 15.0, 150.0)]),
            )
            .with_run(3, RunFixture::without_trigger_key())
    }

    fn runs(ids: &[u32]) -> Vec<RunId> {
        ids.iter().copied().map(RunId::new).collect()
    }

    fn default_series(agg: &Aggregation, trigger: &str) -> Series {
        agg.series_for(&trigger.into(), &GroupName::default_group())
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_corrections_and_cuts() {
        let aggregator = RunGroupAggregator::new(AggregatorConfig::new().veto("HLT_Veto"));
        let ids = runs(&[1, 2]);
        let agg = aggregator
            .aggregate(&source(), &ids, &RunGroups::single(ids.clone()), &TriggerSelector::All)
            .unwrap();
        let series = default_series(&agg, "HLT_A");
        // Run 1: LS 3 has no pileup, LS 4 exceeds the deadtime ceiling.
        let ys = series.ys();
        assert_eq!(series.len(), 3);
        assert!((ys[0] - 10.0).abs() < 1e-12);
        assert!((ys[1] - 2000.0 * 1.05 / 100.0).abs() < 1e-9);
        // Run 2 has a zero bunch count, treated as one.
        assert!((ys[2] - 150.0).abs() < 1e-12);
        assert!(series.per_bunch());
        assert!(agg.series_for(&"HLT_Veto".into(), &GroupName::default_group()).is_none());
        assert_eq!(agg.runs[&RunId::new(1)].colliding_bunches, 100);
        assert_eq!(agg.runs[&RunId::new(2)].colliding_bunches, 1);
        assert_eq!(agg.runs[&RunId::new(1)].bunch_factor(), 100.0);
    }

    #[test]
    fn test_raw_mode_without_corrections() {
        let config = AggregatorConfig::new()
            .normalize_bunches(false)
            .correct_deadtime(false)
            .max_deadtime(1.0);
        let ids = runs(&[1]);
        let agg = RunGroupAggregator::new(config)
            .aggregate(&source(), &ids, &RunGroups::single(ids.clone()), &TriggerSelector::All)
            .unwrap();
        let series = default_series(&agg, "HLT_A");
        assert_eq!(series.ys(), vec![1000.0, 2000.0, 4000.0]);
        assert!(!series.per_bunch());
        assert_eq!(agg.runs[&RunId::new(1)].bunch_factor(), 1.0);
    }

    #[test]
    fn test_prescale_and_window_options() {
        let src = FixtureRateSource::new(FixtureDocument::default()).with_run(
            5,
            RunFixture::new(1).with_trigger(
                "HLT_P",
                vec![
                    rec(1, 1.0, 100.0).with_prescale(2, Some(1)),
                    rec(2, 2.0, 100.0).with_prescale(0, Some(1)),
                    rec(3, 3.0, 9e9).with_prescale(1, Some(1)),
                    rec(4, 4.0, 100.0).with_prescale(1, Some(2)),
                    rec(5, 5.0, 100.0).with_prescale(1, None),
                    rec(6, 6.0, 100.0).with_prescale(4, Some(1)),
                ],
            ),
        );
        let config = AggregatorConfig::new()
            .use_prescaled_rate(true)
            .rate_ceiling(1e6)
            .prescale_columns([1])
            .ls_range(1, 5);
        let ids = runs(&[5]);
        let agg = RunGroupAggregator::new(config)
            .aggregate(&src, &ids, &RunGroups::single(ids.clone()), &TriggerSelector::All)
            .unwrap();
        let series = default_series(&agg, "HLT_P");
        let kept: Vec<(u32, f64)> = series.samples().iter().map(|s| (s.lumisection, s.y)).collect();
        assert_eq!(kept, vec![(1, 50.0), (2, 100.0)]);
    }

    #[test]
    fn test_partition_by_prescale_column() {
        let src = FixtureRateSource::new(FixtureDocument::default()).with_run(
            5,
            RunFixture::new(1).with_trigger(
                "HLT_P",
                vec![
                    rec(1, 1.0, 10.0).with_prescale(1, Some(0)),
                    rec(2, 2.0, 10.0).with_prescale(1, Some(3)),
                    rec(3, 3.0, 10.0).with_prescale(1, Some(3)),
                ],
            ),
        );
        let ids = runs(&[5]);
        let agg = RunGroupAggregator::new(AggregatorConfig::new().partition_by_prescale_column(true))
            .aggregate(&src, &ids, &RunGroups::single(ids.clone()), &TriggerSelector::All)
            .unwrap();
        let names: Vec<&str> = agg.groups().into_iter().map(GroupName::as_str).collect();
        assert_eq!(names, vec!["default/psc0", "default/psc3"]);
        let psc3 = agg
            .series_for(&"HLT_P".into(), &GroupName::new("default/psc3"))
            .unwrap();
        assert_eq!(psc3.len(), 2);
        assert!(psc3.samples().iter().all(|s| s.prescale_column == Some(3)));
        let observed = &agg.runs[&RunId::new(5)].samples[&TriggerId::new("HLT_P")];
        assert_eq!(observed[0].prescale_column, Some(0));
    }

    #[test]
    fn test_ungrouped_and_failed_runs_are_diagnosed() {
        let groups = RunGroups::single(runs(&[1, 3]));
        let agg = RunGroupAggregator::default()
            .aggregate(&source(), &runs(&[1, 2, 3, 99]), &groups, &TriggerSelector::All)
            .unwrap();
        assert_eq!(
            agg.diagnostics.skipped_runs(),
            vec![RunId::new(2), RunId::new(3), RunId::new(99)]
        );
        let reasons: Vec<String> = agg
            .diagnostics
            .entries()
            .iter()
            .map(|d| d.reason.to_string())
            .collect();
        assert!(reasons
            .iter()
            .any(|r| r.contains("run is not a member of any run group")));
        assert!(reasons.iter().any(|r| r.contains("No trigger key for run 3")));
        assert!(reasons.iter().any(|r| r.contains("Run 99 not found")));
        // Ungrouped run 2 stays available for certification.
        assert!(agg.runs.contains_key(&RunId::new(2)));
        assert!(default_series(&agg, "HLT_A").samples().iter().all(|s| s.run == RunId::new(1)));
    }

    #[test]
    fn test_trigger_without_usable_samples_is_diagnosed() {
        let src = source().with_run(
            4,
            RunFixture::new(1)
                .with_trigger("HLT_A", vec![rec(1, 1.0, 1.0)])
                .with_trigger("HLT_Null", vec![RawRateRecord::new(1, None, 1.0)]),
        );
        let ids = runs(&[4]);
        let agg = RunGroupAggregator::default()
            .aggregate(&src, &ids, &RunGroups::single(ids.clone()), &TriggerSelector::All)
            .unwrap();
        let null_trigger = TriggerId::new("HLT_Null");
        let entry = agg.diagnostics.for_trigger(&null_trigger).next().unwrap();
        assert_eq!(entry.run, Some(RunId::new(4)));
        assert!(agg.triggers().contains(&TriggerId::new("HLT_A")));
    }

    #[test]
    fn test_unknown_named_triggers_are_fatal() {
        let ids = runs(&[1]);
        let err = RunGroupAggregator::default()
            .aggregate(
                &source(),
                &ids,
                &RunGroups::single(ids.clone()),
                &TriggerSelector::named(["HLT_Missing"]),
            )
            .unwrap_err();
        assert!(matches!(err, RateMonError::NoValidTriggers(ref names) if names == "HLT_Missing"));
    }

    #[test]
    fn test_named_trigger_without_usable_records_is_no_data() {
        let src = FixtureRateSource::new(FixtureDocument::default()).with_run(
            4,
            RunFixture::new(1).with_trigger("HLT_Null", vec![RawRateRecord::new(1, None, 1.0)]),
        );
        let ids = runs(&[4]);
        let err = RunGroupAggregator::default()
            .aggregate(
                &src,
                &ids,
                &RunGroups::single(ids.clone()),
                &TriggerSelector::named(["HLT_Null"]),
            )
            .unwrap_err();
        assert!(matches!(err, RateMonError::NoData { ref runs } if *runs == vec![RunId::new(4)]));
    }

    #[test]
    fn test_only_vetoed_triggers_are_fatal() {
        let ids = runs(&[1]);
        let err = RunGroupAggregator::new(AggregatorConfig::new().veto("HLT_A"))
            .aggregate(
                &source(),
                &ids,
                &RunGroups::single(ids.clone()),
                &TriggerSelector::named(["HLT_A"]),
            )
            .unwrap_err();
        assert!(matches!(err, RateMonError::NoValidTriggers(_)));
    }

    #[test]
    fn test_no_data_is_fatal() {
        let ids = runs(&[3, 99]);
        let err = RunGroupAggregator::default()
            .aggregate(&source(), &ids, &RunGroups::single(ids.clone()), &TriggerSelector::All)
            .unwrap_err();
        assert!(matches!(err, RateMonError::NoData { ref runs } if runs.len() == 2));
    }

    #[test]
    fn test_resolve_groups_with_fills() {
        let src = source().with_fill(6371, [1, 2]);
        let definitions = BTreeMap::from([
            (
                GroupName::new("early"),
                RunGroupDefinition {
                    runs: vec![3],
                    fills: vec![6371, 1],
                },
            ),
            (GroupName::default_group(), RunGroupDefinition { runs: vec![1], fills: vec![] }),
        ]);
        let mut diagnostics = Diagnostics::new();
        let groups = RunGroupAggregator::resolve_groups(&src, &definitions, &mut diagnostics);
        let early: Vec<RunId> = groups
            .runs(&GroupName::new("early"))
            .unwrap()
            .iter()
            .copied()
            .collect();
        assert_eq!(early, runs(&[1, 2, 3]));
        assert_eq!(groups.groups_for(RunId::new(1)).len(), 2);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics.entries()[0].group, Some(GroupName::new("early")));
    }
}
