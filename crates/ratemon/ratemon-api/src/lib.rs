//! Trigger-Rate Monitoring API
//!
//! Configuration types and builders for aggregation, filtering, fitting,
//! selection and certification.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// Re-export SPI types
pub use ratemon_spi::{
    GroupName, ModelKind, RateMonError, Result, RunGroupDefinition, RunId, TriggerId,
};

fn check(ok: bool, name: &str, reason: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(RateMonError::invalid_parameter(name, reason))
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// How raw per-lumisection records become series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Divide rates by the run's colliding-bunch count (default: true).
    pub normalize_bunches: bool,
    /// Scale rates by `1 + deadtime` (default: true).
    pub correct_deadtime: bool,
    /// Lumisections with a larger deadtime fraction are dropped (default: 0.10).
    pub max_deadtime: f64,
    /// Divide rates by the prescale when it is non-zero (default: false).
    pub use_prescaled_rate: bool,
    /// Raw rates above this value are dropped.
    pub rate_ceiling: Option<f64>,
    /// Keep only lumisections taken with one of these prescale columns.
    pub prescale_columns: Option<BTreeSet<u32>>,
    /// Inclusive lumisection window.
    pub ls_range: Option<(u32, u32)>,
    /// Split every group into one series per prescale column.
    pub partition_by_prescale_column: bool,
    /// Triggers that are never aggregated.
    pub vetoed_triggers: BTreeSet<TriggerId>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            normalize_bunches: true,
            correct_deadtime: true,
            max_deadtime: 0.10,
            use_prescaled_rate: false,
            rate_ceiling: None,
            prescale_columns: None,
            ls_range: None,
            partition_by_prescale_column: false,
            vetoed_triggers: BTreeSet::new(),
        }
    }
}

impl AggregatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize_bunches(mut self, enabled: bool) -> Self {
        self.normalize_bunches = enabled;
        self
    }

    pub fn correct_deadtime(mut self, enabled: bool) -> Self {
        self.correct_deadtime = enabled;
        self
    }

    pub fn max_deadtime(mut self, fraction: f64) -> Self {
        self.max_deadtime = fraction;
        self
    }

    pub fn use_prescaled_rate(mut self, enabled: bool) -> Self {
        self.use_prescaled_rate = enabled;
        self
    }

    pub fn rate_ceiling(mut self, ceiling: f64) -> Self {
        self.rate_ceiling = Some(ceiling);
        self
    }

    pub fn prescale_columns(mut self, columns: impl IntoIterator<Item = u32>) -> Self {
        self.prescale_columns = Some(columns.into_iter().collect());
        self
    }

    pub fn ls_range(mut self, first: u32, last: u32) -> Self {
        self.ls_range = Some((first, last));
        self
    }

    pub fn partition_by_prescale_column(mut self, enabled: bool) -> Self {
        self.partition_by_prescale_column = enabled;
        self
    }

    pub fn veto(mut self, trigger: impl Into<TriggerId>) -> Self {
        self.vetoed_triggers.insert(trigger.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        check(
            (0.0..=1.0).contains(&self.max_deadtime),
            "max_deadtime",
            "must be a fraction in [0, 1]",
        )?;
        if let Some(ceiling) = self.rate_ceiling {
            check(ceiling > 0.0, "rate_ceiling", "must be positive")?;
        }
        if let Some((first, last)) = self.ls_range {
            check(first <= last, "ls_range", "first lumisection is after the last")?;
        }
        if let Some(columns) = &self.prescale_columns {
            check(!columns.is_empty(), "prescale_columns", "mask keeps nothing")?;
        }
        Ok(())
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Sigma-clip thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmaClipConfig {
    /// Pileup threshold in standard deviations (default: 6.0).
    pub k_x: f64,
    /// Rate threshold in standard deviations (default: 4.0).
    pub k_y: f64,
}

impl Default for SigmaClipConfig {
    fn default() -> Self {
        Self { k_x: 6.0, k_y: 4.0 }
    }
}

impl SigmaClipConfig {
    pub fn new(k_x: f64, k_y: f64) -> Self {
        Self { k_x, k_y }
    }
}

/// Which point filters run before fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Keep only detector-ready, stable-beam samples (default: true).
    pub require_physics_status: bool,
    /// Drop samples whose rate equals `zero_sentinel` (default: true).
    pub remove_zero_rates: bool,
    pub zero_sentinel: f64,
    /// `None` disables sigma clipping.
    pub sigma_clip: Option<SigmaClipConfig>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            require_physics_status: true,
            remove_zero_rates: true,
            zero_sentinel: 0.0,
            sigma_clip: Some(SigmaClipConfig::default()),
        }
    }
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every filter disabled.
    pub fn none() -> Self {
        Self {
            require_physics_status: false,
            remove_zero_rates: false,
            zero_sentinel: 0.0,
            sigma_clip: None,
        }
    }

    pub fn require_physics_status(mut self, enabled: bool) -> Self {
        self.require_physics_status = enabled;
        self
    }

    pub fn remove_zero_rates(mut self, enabled: bool) -> Self {
        self.remove_zero_rates = enabled;
        self
    }

    pub fn zero_sentinel(mut self, sentinel: f64) -> Self {
        self.zero_sentinel = sentinel;
        self
    }

    pub fn sigma_clip(mut self, clip: Option<SigmaClipConfig>) -> Self {
        self.sigma_clip = clip;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(clip) = self.sigma_clip {
            check(clip.k_x > 0.0, "k_x", "must be positive")?;
            check(clip.k_y > 0.0, "k_y", "must be positive")?;
        }
        Ok(())
    }
}

// ============================================================================
// Fitting
// ============================================================================

/// Model fitting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitterConfig {
    /// Functional forms to fit (default: linear, quad, quad2, cube, exp).
    pub kinds: Vec<ModelKind>,
    /// Fewer filtered points than this skips the fit (default: 10).
    pub min_points: usize,
    /// Share of points with the smallest residuals kept by the robust loop
    /// (default: 0.9).
    pub robust_fraction: f64,
    /// Bound on robust reweighting passes (default: 20).
    pub robust_iterations: usize,
    /// Bound on Levenberg-Marquardt steps per fit (default: 200).
    pub max_iterations: usize,
    /// Relative convergence tolerance (default: 1e-10).
    pub tolerance: f64,
    /// Fit `y·N` instead of `y`; coefficients are mapped back.
    pub normalization: Option<f64>,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            kinds: ModelKind::DEFAULT_KINDS.to_vec(),
            min_points: 10,
            robust_fraction: 0.9,
            robust_iterations: 20,
            max_iterations: 200,
            tolerance: 1e-10,
            normalization: None,
        }
    }
}

impl FitterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit only the given kinds.
    pub fn with_kinds(kinds: impl IntoIterator<Item = ModelKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn min_points(mut self, min_points: usize) -> Self {
        self.min_points = min_points;
        self
    }

    pub fn robust_fraction(mut self, fraction: f64) -> Self {
        self.robust_fraction = fraction;
        self
    }

    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations.max(1);
        self
    }

    pub fn normalization(mut self, factor: f64) -> Self {
        self.normalization = Some(factor);
        self
    }

    pub fn validate(&self) -> Result<()> {
        check(!self.kinds.is_empty(), "kinds", "at least one model kind is required")?;
        check(self.min_points >= 1, "min_points", "must be at least 1")?;
        check(
            self.robust_fraction > 0.0 && self.robust_fraction <= 1.0,
            "robust_fraction",
            "must be in (0, 1]",
        )?;
        check(
            self.tolerance.is_finite() && self.tolerance > 0.0,
            "tolerance",
            "must be positive",
        )?;
        if let Some(n) = self.normalization {
            check(n.is_finite() && n > 0.0, "normalization", "must be positive")?;
        }
        Ok(())
    }
}

// ============================================================================
// Selection
// ============================================================================

/// How a best model is chosen among those fitted for a `(trigger, group)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Smallest residual MSE; ties go to the earlier kind.
    #[default]
    BestByMse,
    /// Always the given kind, or `BestByMse` when it was not fitted.
    Fixed { kind: ModelKind },
    /// Smallest `|mse - best| / best + penalty(kind)`.
    Weighted { penalties: BTreeMap<ModelKind, f64> },
}

impl SelectionPolicy {
    pub fn fixed(kind: ModelKind) -> Self {
        SelectionPolicy::Fixed { kind }
    }

    /// Weighted selection with the penalties used for online monitoring:
    /// higher-order forms must beat a linear fit by 3%.
    pub fn weighted() -> Self {
        SelectionPolicy::Weighted {
            penalties: BTreeMap::from([
                (ModelKind::Linear, 0.0),
                (ModelKind::Quad, 0.03),
                (ModelKind::Quad2, 0.03),
                (ModelKind::Cube, 0.03),
                (ModelKind::Exp, 0.03),
                (ModelKind::Sinh, 0.03),
            ]),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let SelectionPolicy::Weighted { penalties } = self {
            check(
                penalties.values().all(|p| p.is_finite() && *p >= 0.0),
                "penalties",
                "must be finite and non-negative",
            )?;
        }
        Ok(())
    }
}

// ============================================================================
// Certification
// ============================================================================

/// Deviation detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Error band half-width in residual-MSE units (default: 3.0).
    pub sigma_multiplier: f64,
    /// Lumisections averaged into one observation (default: 1).
    pub lumisections_per_point: u32,
    /// Evaluate only detector-ready, stable-beam lumisections (default: true).
    pub require_physics_status: bool,
    /// Fit group used for runs outside every fitted group (default: "default").
    pub reference_group: GroupName,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sigma_multiplier: 3.0,
            lumisections_per_point: 1,
            require_physics_status: true,
            reference_group: GroupName::default_group(),
        }
    }
}

impl DetectorConfig {
    pub fn new(sigma_multiplier: f64) -> Self {
        Self {
            sigma_multiplier,
            ..Default::default()
        }
    }

    pub fn lumisections_per_point(mut self, count: u32) -> Self {
        self.lumisections_per_point = count;
        self
    }

    pub fn require_physics_status(mut self, enabled: bool) -> Self {
        self.require_physics_status = enabled;
        self
    }

    pub fn reference_group(mut self, group: impl Into<GroupName>) -> Self {
        self.reference_group = group.into();
        self
    }

    /// Band multiplier after averaging: `sigma / sqrt(lumisections_per_point)`.
    pub fn effective_sigma(&self) -> f64 {
        self.sigma_multiplier / f64::from(self.lumisections_per_point.max(1)).sqrt()
    }

    pub fn validate(&self) -> Result<()> {
        check(
            self.sigma_multiplier.is_finite() && self.sigma_multiplier > 0.0,
            "sigma_multiplier",
            "must be positive",
        )?;
        check(
            self.lumisections_per_point >= 1,
            "lumisections_per_point",
            "must be at least 1",
        )
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Complete configuration of a monitoring pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateMonConfig {
    /// Triggers to monitor; empty means every trigger the source reports.
    pub triggers: Vec<TriggerId>,
    /// Named run groups. Empty means every requested run in `"default"`.
    pub run_groups: BTreeMap<GroupName, RunGroupDefinition>,
    pub aggregator: AggregatorConfig,
    pub filter: FilterConfig,
    pub fitter: FitterConfig,
    pub selection: SelectionPolicy,
    pub detector: DetectorConfig,
}

impl RateMonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_triggers(mut self, triggers: impl IntoIterator<Item = impl Into<TriggerId>>) -> Self {
        self.triggers = triggers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_run_group(mut self, name: impl Into<GroupName>, definition: RunGroupDefinition) -> Self {
        self.run_groups.insert(name.into(), definition);
        self
    }

    pub fn with_aggregator(mut self, aggregator: AggregatorConfig) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_fitter(mut self, fitter: FitterConfig) -> Self {
        self.fitter = fitter;
        self
    }

    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.aggregator.validate()?;
        self.filter.validate()?;
        self.fitter.validate()?;
        self.selection.validate()?;
        self.detector.validate()
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RateMonError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RateMonError::Serialization(e.to_string()))
    }
}
