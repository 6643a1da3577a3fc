//! Per-lumisection deviation scoring against fitted models.

use std::collections::BTreeSet;

use ratemon_api::DetectorConfig;
use ratemon_spi::{AnomalyReport, FitCollection, GroupName};
use tracing::debug;

use crate::aggregator::{prescale_partition, RunObservations};
use crate::predictor::Predictor;
use crate::selector::FitSelector;

/// Certifies runs by comparing observed rates with model predictions.
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: DetectorConfig,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Score every observed trigger of a run against the models of `group`.
    ///
    /// A lumisection is bad for a trigger when the observed rate falls
    /// strictly outside the prediction band. Rates are compared in absolute
    /// units: per-bunch observations are scaled back up by the run's bunch
    /// count, and the prediction is scaled only when the model is per bunch.
    ///
    /// When `group` has no model for a trigger, each sample falls back to the
    /// model of its prescale-column partition of `group`. Triggers with no
    /// model for any of their samples are excluded.
    pub fn certify_run(
        &self,
        observations: &RunObservations,
        group: &GroupName,
        fits: &FitCollection,
        selector: &FitSelector,
    ) -> AnomalyReport {
        let predictor = Predictor::new(self.config.effective_sigma());
        let observed_factor = observations.bunch_factor();
        let mut report = AnomalyReport::new(observations.run, group.clone());
        let mut evaluated = BTreeSet::new();

        for (trigger, samples) in &observations.samples {
            let group_model = selector.best_for(fits, trigger, group);
            let mut modelled = false;
            for sample in samples {
                let partition_model = || {
                    let column = sample.prescale_column?;
                    selector.best_for(fits, trigger, &prescale_partition(group, column))
                };
                let Some(model) = group_model.or_else(partition_model) else {
                    continue;
                };
                modelled = true;
                if self.config.require_physics_status && !sample.has_physics_status() {
                    continue;
                }
                let bunch_count = if model.per_bunch {
                    f64::from(observations.colliding_bunches)
                } else {
                    1.0
                };
                let prediction = predictor.predict(model, sample.lumisection, sample.x, bunch_count);
                let observed = sample.y * observed_factor;
                report.record(trigger, sample.lumisection, prediction.deviates(observed));
                evaluated.insert(sample.lumisection);
            }
            if !modelled {
                report.exclude(trigger.clone());
            }
        }

        let report = report.finalize(evaluated.len());
        debug!(
            run = %report.run,
            group = %report.group,
            bad_lumisections = report.bad_lumisections.len(),
            total = report.total_lumisections,
            excluded = report.excluded_triggers.len(),
            "run certified"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratemon_spi::{FitModel, ModelKind, RunId, Sample, TriggerId};
    use std::collections::BTreeMap;

    fn linear_fit(slope: f64, mse: f64, per_bunch: bool) -> FitModel {
        FitModel {
            coefficients: [0.0, slope, 0.0, 0.0],
            residual_mse: mse,
            per_bunch,
            ..FitModel::empty(ModelKind::Linear)
        }
    }

    fn fits(per_bunch: bool) -> FitCollection {
        let mut fits = FitCollection::new();
        fits.insert("HLT_A".into(), GroupName::default_group(), linear_fit(10.0, 1.0, per_bunch));
        fits
    }

    fn observations(bunches: u32, per_bunch: bool, ys: &[(u32, f64, f64)]) -> RunObservations {
        let samples = ys
            .iter()
            .map(|&(ls, x, y)| Sample::new("HLT_A".into(), RunId::new(1), ls, x, y))
            .collect();
        RunObservations {
            run: RunId::new(1),
            colliding_bunches: bunches,
            per_bunch,
            samples: BTreeMap::from([(TriggerId::new("HLT_A"), samples)]),
        }
    }

    fn certify(detector: &AnomalyDetector, obs: &RunObservations, fits: &FitCollection) -> AnomalyReport {
        detector.certify_run(obs, &GroupName::default_group(), fits, &FitSelector::default())
    }

    #[test]
    fn test_on_model_run_is_clean() {
        let obs = observations(1, false, &[(1, 10.0, 100.0), (2, 20.0, 201.0), (3, 30.0, 299.5)]);
        let report = certify(&AnomalyDetector::default(), &obs, &fits(false));
        assert!(report.is_clean());
        assert_eq!(report.total_lumisections, 3);
        assert_eq!(report.evaluated_pairs, 3);
    }

    #[test]
    fn test_deviation_is_flagged() {
        let obs = observations(1, false, &[(1, 10.0, 100.0), (2, 20.0, 250.0), (3, 30.0, 303.0)]);
        let report = certify(&AnomalyDetector::default(), &obs, &fits(false));
        assert_eq!(report.deviant_triggers[&TriggerId::new("HLT_A")], vec![2]);
        assert_eq!(report.bad_lumisections.get(&2), Some(&1));
        assert!((report.bad_lumisection_fraction - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_per_bunch_units() {
        // Per-bunch observations and model; band = 50 bunches * 3 * 1.0.
        let obs = observations(50, true, &[(1, 10.0, 100.0), (2, 10.0, 102.0), (3, 10.0, 104.0)]);
        let report = certify(&AnomalyDetector::default(), &obs, &fits(true));
        assert_eq!(report.deviant_triggers[&TriggerId::new("HLT_A")], vec![3]);
    }

    #[test]
    fn test_absolute_model_against_per_bunch_observations() {
        // Absolute-rate model: observations are scaled back up by the bunch count.
        let obs = observations(4, true, &[(1, 10.0, 25.0), (2, 10.0, 30.0)]);
        let report = certify(&AnomalyDetector::default(), &obs, &fits(false));
        assert_eq!(report.deviant_triggers[&TriggerId::new("HLT_A")], vec![2]);
    }

    #[test]
    fn test_missing_model_is_excluded() {
        let obs = observations(1, false, &[(1, 10.0, 1e6)]);
        let report = detector_with_group(&obs, "other");
        assert!(report.is_clean());
        assert_eq!(report.excluded_triggers, vec![TriggerId::new("HLT_A")]);
        assert_eq!(report.total_lumisections, 0);
    }

    #[test]
    fn test_prescale_partition_models_are_used() {
        let mut fits = FitCollection::new();
        let group = GroupName::default_group();
        fits.insert("HLT_A".into(), group.partition("psc1"), linear_fit(10.0, 1.0, false));
        fits.insert("HLT_A".into(), group.partition("psc2"), linear_fit(20.0, 1.0, false));
        let mut obs = observations(
            1,
            false,
            &[(1, 10.0, 100.0), (2, 10.0, 200.0), (3, 10.0, 100.0), (4, 10.0, 100.0)],
        );
        if let Some(samples) = obs.samples.get_mut(&TriggerId::new("HLT_A")) {
            let columns = [Some(1), Some(2), Some(2), None];
            for (sample, column) in samples.iter_mut().zip(columns) {
                sample.prescale_column = column;
            }
        }

        let report = certify(&AnomalyDetector::default(), &obs, &fits);

        assert_eq!(report.deviant_triggers[&TriggerId::new("HLT_A")], vec![3]);
        assert_eq!(report.total_lumisections, 3);
        assert!(report.excluded_triggers.is_empty());
    }

    fn detector_with_group(obs: &RunObservations, group: &str) -> AnomalyReport {
        AnomalyDetector::default().certify_run(obs, &group.into(), &fits(false), &FitSelector::default())
    }

    #[test]
    fn test_status_gating() {
        let mut obs = observations(1, false, &[(1, 10.0, 100.0), (2, 10.0, 900.0)]);
        if let Some(samples) = obs.samples.get_mut(&TriggerId::new("HLT_A")) {
            samples[1] = samples[1].clone().with_status(false, true);
        }
        let gated = certify(&AnomalyDetector::default(), &obs, &fits(false));
        assert!(gated.is_clean());
        assert_eq!(gated.total_lumisections, 1);
        let ungated = certify(
            &AnomalyDetector::new(DetectorConfig::default().require_physics_status(false)),
            &obs,
            &fits(false),
        );
        assert_eq!(ungated.bad_pairs, 1);
    }

    #[test]
    fn test_lumisections_per_point_narrows_band() {
        let obs = observations(1, false, &[(1, 10.0, 102.0)]);
        assert!(certify(&AnomalyDetector::default(), &obs, &fits(false)).is_clean());
        let averaged = AnomalyDetector::new(DetectorConfig::default().lumisections_per_point(4));
        assert!(!certify(&averaged, &obs, &fits(false)).is_clean());
    }

    #[test]
    fn test_deterministic() {
        let obs = observations(3, true, &[(1, 10.0, 100.0), (2, 20.0, 260.0), (5, 30.0, 10.0)]);
        let detector = AnomalyDetector::default();
        let first = certify(&detector, &obs, &fits(true));
        let second = certify(&detector, &obs, &fits(true));
        assert_eq!(first, second);
    }
}
