//! End-to-end monitor: aggregate, filter, fit, select and certify.
//!
//! Fits for independent `(trigger, group)` series run on the rayon pool.
//! Results are merged into a single [`FitCollection`] on the calling thread,
//! and the finished collection is published for concurrent readers.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rayon::prelude::*;
use ratemon_api::RateMonConfig;
use ratemon_spi::{
    AnomalyReport, Diagnostics, FitCollection, GroupName, RateMonError, RateSource, ReportWriter,
    Result, RunGroups, RunId, SeriesFilter, SkipReason, TriggerId, TriggerSelector,
};
use tracing::{info, warn};

use crate::aggregator::{Aggregation, RunGroupAggregator};
use crate::detector::AnomalyDetector;
use crate::filter::PointFilter;
use crate::fitter::{FitOutcome, ModelFitter};
use crate::selector::FitSelector;

// ============================================================================
// Published fits
// ============================================================================

/// The most recently completed fit collection.
///
/// Readers hold an `Arc` snapshot; publishing swaps the whole collection, so
/// a reader never observes a partially merged result.
#[derive(Debug, Default)]
pub struct PublishedFits {
    current: RwLock<Arc<FitCollection>>,
}

impl PublishedFits {
    pub fn new(fits: FitCollection) -> Self {
        Self {
            current: RwLock::new(Arc::new(fits)),
        }
    }

    pub fn current(&self) -> Arc<FitCollection> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the published collection and return the new snapshot.
    pub fn publish(&self, fits: FitCollection) -> Arc<FitCollection> {
        let next = Arc::new(fits);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::clone(&next);
        next
    }
}

// ============================================================================
// Results
// ============================================================================

/// Output of the fitting stage.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub fits: FitCollection,
    pub aggregation: Aggregation,
    /// Aggregation and fitting diagnostics, in that order.
    pub diagnostics: Diagnostics,
}

impl FitRun {
    pub fn summary(&self) -> String {
        render_summary(&[], &self.diagnostics)
    }
}

/// Output of the certification stage.
#[derive(Debug, Clone, Default)]
pub struct CertifyRun {
    pub reports: Vec<AnomalyReport>,
    pub diagnostics: Diagnostics,
}

impl CertifyRun {
    pub fn summary(&self) -> String {
        render_summary(&self.reports, &self.diagnostics)
    }
}

/// Output of a full fit-then-certify pass.
#[derive(Debug, Clone)]
pub struct MonitorRun {
    pub fits: Arc<FitCollection>,
    pub reports: Vec<AnomalyReport>,
    pub diagnostics: Diagnostics,
}

impl MonitorRun {
    pub fn summary(&self) -> String {
        let mut out = format!(
            "fits: {} models for {} triggers in {} groups\n",
            self.fits.len(),
            self.fits.triggers().count(),
            self.fits.groups().len()
        );
        out.push_str(&render_summary(&self.reports, &self.diagnostics));
        out
    }
}

/// Human-readable digest: one block per report, then every skipped item with
/// its reason.
pub fn render_summary(reports: &[AnomalyReport], diagnostics: &Diagnostics) -> String {
    let mut out = String::new();
    for report in reports {
        let _ = writeln!(
            out,
            "run {} [{}]: {}/{} bad lumisections ({:.1}%), {}/{} bad trigger-lumisections",
            report.run,
            report.group,
            report.bad_lumisections.len(),
            report.total_lumisections,
            report.bad_lumisection_fraction * 100.0,
            report.bad_pairs,
            report.evaluated_pairs
        );
        for trigger in report.deviant_triggers.keys() {
            let ranges: Vec<String> = report
                .lumisection_ranges(trigger)
                .into_iter()
                .map(|(first, last)| {
                    if first == last {
                        first.to_string()
                    } else {
                        format!("{}-{}", first, last)
                    }
                })
                .collect();
            let _ = writeln!(out, "  {}: LS {}", trigger, ranges.join(", "));
        }
        if !report.excluded_triggers.is_empty() {
            let names: Vec<&str> = report.excluded_triggers.iter().map(TriggerId::as_str).collect();
            let _ = writeln!(out, "  no model: {}", names.join(", "));
        }
    }
    if !diagnostics.is_empty() {
        let _ = writeln!(out, "skipped ({}):", diagnostics.len());
        for entry in diagnostics.entries() {
            let _ = writeln!(out, "  {}", entry);
        }
    }
    out
}

// ============================================================================
// Monitor
// ============================================================================

enum FitTask {
    Fitted(FitOutcome),
    Failed(RateMonError),
    Cancelled,
}

/// Wires the configured stages together.
pub struct RateMonitor {
    config: RateMonConfig,
    aggregator: RunGroupAggregator,
    filter: PointFilter,
    fitter: ModelFitter,
    selector: FitSelector,
    detector: AnomalyDetector,
    cancelled: Arc<AtomicBool>,
    published: PublishedFits,
}

impl RateMonitor {
    /// Validate `config` and build every stage from it.
    pub fn new(config: RateMonConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            aggregator: RunGroupAggregator::new(config.aggregator.clone()),
            filter: PointFilter::from_config(&config.filter),
            fitter: ModelFitter::new(config.fitter.clone()),
            selector: FitSelector::new(config.selection.clone()),
            detector: AnomalyDetector::new(config.detector.clone()),
            cancelled: Arc::new(AtomicBool::new(false)),
            published: PublishedFits::default(),
            config,
        })
    }

    /// Replace the point filter built from the configuration.
    pub fn with_filter(mut self, filter: PointFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Start from previously saved fits, e.g. for certification only.
    pub fn with_fits(self, fits: FitCollection) -> Self {
        self.published.publish(fits);
        self
    }

    pub fn config(&self) -> &RateMonConfig {
        &self.config
    }

    pub fn selector(&self) -> &FitSelector {
        &self.selector
    }

    pub fn published(&self) -> &PublishedFits {
        &self.published
    }

    /// Flag shared with the fitting workers. Setting it stops new fit tasks
    /// from starting; tasks already running finish normally.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Configured trigger names, or every trigger when none are named.
    pub fn trigger_selector(&self) -> TriggerSelector {
        if self.config.triggers.is_empty() {
            TriggerSelector::All
        } else {
            TriggerSelector::named(self.config.triggers.iter().cloned())
        }
    }

    /// Configured run groups, or one `"default"` group holding `runs`.
    pub fn run_groups(&self, source: &dyn RateSource, runs: &[RunId], diagnostics: &mut Diagnostics) -> RunGroups {
        if self.config.run_groups.is_empty() {
            RunGroups::single(runs.iter().copied())
        } else {
            RunGroupAggregator::resolve_groups(source, &self.config.run_groups, diagnostics)
        }
    }

    /// Aggregate `runs` (every grouped run when empty), fit every series and
    /// publish the result.
    pub fn fit(&self, source: &dyn RateSource, runs: &[RunId]) -> Result<FitRun> {
        let mut diagnostics = Diagnostics::new();
        let groups = self.run_groups(source, runs, &mut diagnostics);
        let runs: Vec<RunId> = if runs.is_empty() {
            groups.all_runs().into_iter().collect()
        } else {
            runs.to_vec()
        };
        info!(source = source.name(), runs = runs.len(), groups = groups.len(), "fitting");

        let aggregation = self
            .aggregator
            .aggregate(source, &runs, &groups, &self.trigger_selector())?;
        diagnostics.extend(aggregation.diagnostics.clone());

        let (fits, fit_diagnostics) = self.fit_aggregation(&aggregation);
        diagnostics.extend(fit_diagnostics);
        self.published.publish(fits.clone());
        info!(
            models = fits.len(),
            skipped = diagnostics.len(),
            "fitting complete"
        );
        Ok(FitRun {
            fits,
            aggregation,
            diagnostics,
        })
    }

    /// Filter and fit every series of `aggregation` in parallel.
    pub fn fit_aggregation(&self, aggregation: &Aggregation) -> (FitCollection, Diagnostics) {
        let results: Vec<(&TriggerId, &GroupName, FitTask)> = aggregation
            .series
            .par_iter()
            .map(|((trigger, group), series)| {
                if self.cancelled.load(Ordering::SeqCst) {
                    return (trigger, group, FitTask::Cancelled);
                }
                let filtered = self.filter.apply(series);
                let task = match self.fitter.fit_series(&filtered) {
                    Ok(outcome) => FitTask::Fitted(outcome),
                    Err(err) => FitTask::Failed(err),
                };
                (trigger, group, task)
            })
            .collect();

        let mut fits = FitCollection::new().with_run_groups(aggregation.run_groups.to_map());
        let mut diagnostics = Diagnostics::new();
        for (trigger, group, task) in results {
            let reason = match task {
                FitTask::Fitted(outcome) => {
                    for model in outcome.models.into_values() {
                        fits.insert(trigger.clone(), group.clone(), model);
                    }
                    for (kind, parameters) in outcome.degenerate {
                        diagnostics.fit_skipped(
                            trigger.clone(),
                            group.clone(),
                            SkipReason::DegenerateFit { kind, parameters },
                        );
                    }
                    continue;
                }
                FitTask::Failed(RateMonError::InsufficientPoints { required, actual }) => {
                    SkipReason::InsufficientPoints { required, actual }
                }
                FitTask::Failed(err) => SkipReason::DataUnavailable {
                    detail: err.to_string(),
                },
                FitTask::Cancelled => SkipReason::Cancelled,
            };
            warn!(trigger = %trigger, group = %group, reason = %reason, "fit skipped");
            diagnostics.fit_skipped(trigger.clone(), group.clone(), reason);
        }
        (fits, diagnostics)
    }

    /// Certify every run of `aggregation` against `fits`.
    ///
    /// A run is scored once per fit group that contains it; runs outside
    /// every group are scored against the configured reference group, or
    /// skipped when that group has no fits. Triggers left without a model
    /// are recorded in the diagnostics.
    pub fn certify(&self, aggregation: &Aggregation, fits: &FitCollection) -> CertifyRun {
        let reference = &self.config.detector.reference_group;
        let has_reference = fits.groups().into_iter().any(|g| reference.covers(g));
        let mut certified = CertifyRun::default();
        for (run, observations) in &aggregation.runs {
            let mut groups: Vec<&GroupName> = fits
                .run_groups()
                .iter()
                .filter(|(_, runs)| runs.contains(run))
                .map(|(name, _)| name)
                .collect();
            if groups.is_empty() {
                if !has_reference {
                    warn!(run = %run, group = %reference, "no fits for reference group");
                    certified
                        .diagnostics
                        .run_skipped(*run, format!("no fits for reference group {}", reference));
                    continue;
                }
                groups.push(reference);
            }
            for group in groups {
                let report = self
                    .detector
                    .certify_run(observations, group, fits, &self.selector);
                for trigger in &report.excluded_triggers {
                    certified.diagnostics.trigger_run_skipped(
                        *run,
                        trigger.clone(),
                        format!("no model for group {}", group),
                    );
                }
                certified.reports.push(report);
            }
        }
        certified
    }

    /// Fetch `runs` and certify them against the published fits.
    pub fn certify_runs(&self, source: &dyn RateSource, runs: &[RunId]) -> Result<CertifyRun> {
        let fits = self.published.current();
        if fits.is_empty() {
            warn!("certifying without any published fits");
        }
        let groups = RunGroups::single(runs.iter().copied());
        let aggregation = self
            .aggregator
            .aggregate(source, runs, &groups, &self.trigger_selector())?;
        let certified = self.certify(&aggregation, &fits);
        info!(
            runs = aggregation.runs.len(),
            reports = certified.reports.len(),
            flagged = certified.reports.iter().filter(|r| !r.is_clean()).count(),
            "certification complete"
        );
        let mut diagnostics = aggregation.diagnostics;
        diagnostics.extend(certified.diagnostics);
        Ok(CertifyRun {
            reports: certified.reports,
            diagnostics,
        })
    }

    /// Fit on `fit_runs`, then certify `certify_runs` (the fitted runs when
    /// empty), handing every report to `writer`.
    pub fn run(
        &self,
        source: &dyn RateSource,
        fit_runs: &[RunId],
        certify_runs: &[RunId],
        writer: &mut dyn ReportWriter,
    ) -> Result<MonitorRun> {
        let fitted = self.fit(source, fit_runs)?;
        let fits = self.published.current();
        let mut diagnostics = fitted.diagnostics;

        let certified = if certify_runs.is_empty() {
            self.certify(&fitted.aggregation, &fits)
        } else {
            self.certify_runs(source, certify_runs)?
        };
        diagnostics.extend(certified.diagnostics);
        let reports = certified.reports;
        for report in &reports {
            writer.write_report(report)?;
        }
        Ok(MonitorRun {
            fits,
            reports,
            diagnostics,
        })
    }
}
