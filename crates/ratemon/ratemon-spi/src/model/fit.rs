//! Fitted rate models and their collection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::ids::{GroupName, RunId, TriggerId};
use crate::error::RateMonError;

/// Functional form of a rate-vs-pileup model.
///
/// Variant order is the tie-break priority used when two models fit equally
/// well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// `a0 + a1·x`
    Linear,
    /// `a1·x + a2·x²` (intercept pinned to 0)
    Quad,
    /// `a0 + a1·x + a2·x²`
    Quad2,
    /// `a1·x + a2·x² + a3·x³` (intercept pinned to 0)
    Cube,
    /// `a0 + a1·exp(a2 + a3·x)` (amplitude pinned to 1)
    Exp,
    /// `a1·sinh(a0·x) + a2`
    Sinh,
}

impl ModelKind {
    /// Every kind, in tie-break priority order.
    pub const ALL: [ModelKind; 6] = [
        ModelKind::Linear,
        ModelKind::Quad,
        ModelKind::Quad2,
        ModelKind::Cube,
        ModelKind::Exp,
        ModelKind::Sinh,
    ];

    /// Kinds fitted when no explicit list is configured.
    pub const DEFAULT_KINDS: [ModelKind; 5] = [
        ModelKind::Linear,
        ModelKind::Quad,
        ModelKind::Quad2,
        ModelKind::Cube,
        ModelKind::Exp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Quad => "quad",
            ModelKind::Quad2 => "quad2",
            ModelKind::Cube => "cube",
            ModelKind::Exp => "exp",
            ModelKind::Sinh => "sinh",
        }
    }

    /// Evaluate the functional form at `x`.
    pub fn evaluate(&self, a: &[f64; 4], x: f64) -> f64 {
        match self {
            ModelKind::Linear | ModelKind::Quad | ModelKind::Quad2 | ModelKind::Cube => {
                a[0] + x * (a[1] + x * (a[2] + x * a[3]))
            }
            ModelKind::Exp => a[0] + a[1] * (a[2] + a[3] * x).exp(),
            ModelKind::Sinh => a[1] * (a[0] * x).sinh() + a[2],
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = RateMonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RateMonError::InvalidParameter {
                name: "model_kind".to_string(),
                reason: format!("unknown model kind '{}'", s),
            })
    }
}

/// Result of fitting one functional form to one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitModel {
    pub kind: ModelKind,
    pub coefficients: [f64; 4],
    pub coefficient_errors: [f64; 4],
    /// Root of the mean squared residual over every fitted point.
    pub residual_mse: f64,
    pub chi_square: f64,
    pub degrees_of_freedom: usize,
    pub mean_raw_y: f64,
    #[serde(default)]
    pub n_points: usize,
    /// Coefficients describe a per-bunch rate.
    #[serde(default)]
    pub per_bunch: bool,
    /// The optimizer produced NaN values which were zeroed.
    #[serde(default)]
    pub degenerate: bool,
}

impl FitModel {
    /// A model that predicts zero everywhere.
    pub fn empty(kind: ModelKind) -> Self {
        Self {
            kind,
            coefficients: [0.0; 4],
            coefficient_errors: [0.0; 4],
            residual_mse: 0.0,
            chi_square: 0.0,
            degrees_of_freedom: 0,
            mean_raw_y: 0.0,
            n_points: 0,
            per_bunch: false,
            degenerate: false,
        }
    }

    /// Raw model value at `x` (per bunch when `per_bunch` is set).
    pub fn evaluate(&self, x: f64) -> f64 {
        self.kind.evaluate(&self.coefficients, x)
    }

    pub fn chi_square_per_dof(&self) -> Option<f64> {
        (self.degrees_of_freedom > 0).then(|| self.chi_square / self.degrees_of_freedom as f64)
    }
}

/// Models fitted for one `(trigger, group)`.
pub type GroupFits = BTreeMap<ModelKind, FitModel>;

/// `trigger → group → model_kind → FitModel`, plus the run groups the fits
/// were produced from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitCollection {
    #[serde(default)]
    run_groups: BTreeMap<GroupName, Vec<RunId>>,
    #[serde(default)]
    triggers: BTreeMap<TriggerId, BTreeMap<GroupName, GroupFits>>,
}

impl FitCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_groups(mut self, run_groups: BTreeMap<GroupName, Vec<RunId>>) -> Self {
        self.run_groups = run_groups;
        self
    }

    pub fn run_groups(&self) -> &BTreeMap<GroupName, Vec<RunId>> {
        &self.run_groups
    }

    /// Record a model. An entry that already exists is left untouched and
    /// `false` is returned.
    pub fn insert(&mut self, trigger: TriggerId, group: GroupName, model: FitModel) -> bool {
        let fits = self
            .triggers
            .entry(trigger)
            .or_default()
            .entry(group)
            .or_default();
        if fits.contains_key(&model.kind) {
            return false;
        }
        fits.insert(model.kind, model);
        true
    }

    pub fn get(&self, trigger: &TriggerId, group: &GroupName, kind: ModelKind) -> Option<&FitModel> {
        self.group_fits(trigger, group)?.get(&kind)
    }

    pub fn group_fits(&self, trigger: &TriggerId, group: &GroupName) -> Option<&GroupFits> {
        self.triggers.get(trigger)?.get(group)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &TriggerId> {
        self.triggers.keys()
    }

    /// Groups with at least one model, across all triggers.
    pub fn groups(&self) -> Vec<&GroupName> {
        let mut groups: Vec<&GroupName> = self
            .triggers
            .values()
            .flat_map(|by_group| by_group.keys())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }

    /// Every `(trigger, group, model)` entry in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&TriggerId, &GroupName, &FitModel)> {
        self.triggers.iter().flat_map(|(trigger, by_group)| {
            by_group.iter().flat_map(move |(group, fits)| {
                fits.values().map(move |model| (trigger, group, model))
            })
        })
    }

    /// Number of models stored.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Union with `other`; entries of `other` win at the `(trigger, group,
    /// kind)` level, as do its run-group definitions.
    pub fn merge(mut self, other: FitCollection) -> FitCollection {
        self.run_groups.extend(other.run_groups);
        for (trigger, by_group) in other.triggers {
            let target = self.triggers.entry(trigger).or_default();
            for (group, fits) in by_group {
                target.entry(group).or_default().extend(fits);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(kind: ModelKind, mse: f64) -> FitModel {
        FitModel {
            residual_mse: mse,
            ..FitModel::empty(kind)
        }
    }

    #[test]
    fn test_kind_priority_matches_ordering() {
        let mut kinds = ModelKind::ALL.to_vec();
        kinds.reverse();
        kinds.sort();
        assert_eq!(kinds, ModelKind::ALL.to_vec());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Quad2".parse::<ModelKind>().unwrap(), ModelKind::Quad2);
        assert!("poly7".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_evaluate_forms() {
        let poly = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(ModelKind::Cube.evaluate(&poly, 2.0), 1.0 + 4.0 + 12.0 + 32.0);
        let exp = [5.0, 1.0, 0.0, 0.0];
        assert_eq!(ModelKind::Exp.evaluate(&exp, 10.0), 6.0);
        let sinh = [0.0, 3.0, 2.0, 0.0];
        assert_eq!(ModelKind::Sinh.evaluate(&sinh, 7.0), 2.0);
    }

    #[test]
    fn test_insert_never_overwrites() {
        let mut fits = FitCollection::new();
        assert!(fits.insert("HLT_A".into(), "default".into(), model(ModelKind::Linear, 1.0)));
        assert!(!fits.insert("HLT_A".into(), "default".into(), model(ModelKind::Linear, 2.0)));
        let stored = fits
            .get(&"HLT_A".into(), &"default".into(), ModelKind::Linear)
            .unwrap();
        assert_eq!(stored.residual_mse, 1.0);
    }

    #[test]
    fn test_merge_is_right_biased_per_kind() {
        let mut a = FitCollection::new();
        a.insert("HLT_A".into(), "g".into(), model(ModelKind::Linear, 1.0));
        a.insert("HLT_A".into(), "g".into(), model(ModelKind::Quad, 1.0));
        let mut b = FitCollection::new();
        b.insert("HLT_A".into(), "g".into(), model(ModelKind::Linear, 2.0));

        let merged = a.merge(b);
        let t = TriggerId::new("HLT_A");
        let g = GroupName::new("g");
        assert_eq!(merged.get(&t, &g, ModelKind::Linear).unwrap().residual_mse, 2.0);
        assert_eq!(merged.get(&t, &g, ModelKind::Quad).unwrap().residual_mse, 1.0);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_collection_json_shape() {
        let mut fits = FitCollection::new();
        fits.insert("HLT_A".into(), "default".into(), model(ModelKind::Exp, 0.5));
        let json = serde_json::to_value(&fits).unwrap();
        assert!(json["triggers"]["HLT_A"]["default"]["exp"].is_object());
        let back: FitCollection = serde_json::from_value(json).unwrap();
        assert_eq!(back, fits);
    }
}
