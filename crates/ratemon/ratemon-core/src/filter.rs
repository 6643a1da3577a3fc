//! Point filters applied to a series before fitting.

use ratemon_api::FilterConfig;
use ratemon_spi::{Series, SeriesFilter};

/// Population mean and standard deviation (divisor N).
///
/// Returns `None` for an empty slice.
pub fn population_stats(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

// ============================================================================
// Individual filters
// ============================================================================

/// Keeps samples taken with the detector ready and stable beams.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusFilter;

impl SeriesFilter for StatusFilter {
    fn name(&self) -> &str {
        "status"
    }

    fn apply(&self, series: &Series) -> Series {
        series.retain_where(|s| s.has_physics_status())
    }
}

/// Drops samples whose rate equals a sentinel value.
#[derive(Debug, Clone, Copy)]
pub struct ZeroRateFilter {
    sentinel: f64,
}

impl ZeroRateFilter {
    pub fn new(sentinel: f64) -> Self {
        Self { sentinel }
    }
}

impl Default for ZeroRateFilter {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl SeriesFilter for ZeroRateFilter {
    fn name(&self) -> &str {
        "zero_rate"
    }

    fn apply(&self, series: &Series) -> Series {
        series.retain_where(|s| s.y != self.sentinel)
    }
}

/// Drops samples far from the mean in rate or pileup.
///
/// A sample survives only if `|y - mean_y| < k_y·σ_y` and
/// `|x - mean_x| < k_x·σ_x`. The cut is repeated on the survivors until it
/// removes nothing. Series with fewer than two samples pass unchanged.
#[derive(Debug, Clone, Copy)]
pub struct SigmaClipFilter {
    k_x: f64,
    k_y: f64,
}

impl SigmaClipFilter {
    pub fn new(k_x: f64, k_y: f64) -> Self {
        Self { k_x, k_y }
    }

    fn clip_once(&self, series: &Series) -> Series {
        let (Some((mean_x, sigma_x)), Some((mean_y, sigma_y))) =
            (population_stats(&series.xs()), population_stats(&series.ys()))
        else {
            return series.clone();
        };
        series.retain_where(|s| {
            (s.y - mean_y).abs() < self.k_y * sigma_y && (s.x - mean_x).abs() < self.k_x * sigma_x
        })
    }
}

impl Default for SigmaClipFilter {
    fn default() -> Self {
        Self::new(6.0, 4.0)
    }
}

impl SeriesFilter for SigmaClipFilter {
    fn name(&self) -> &str {
        "sigma_clip"
    }

    fn apply(&self, series: &Series) -> Series {
        let mut current = series.clone();
        while current.len() >= 2 {
            let next = self.clip_once(&current);
            if next.len() == current.len() {
                break;
            }
            current = next;
        }
        current
    }
}

// ============================================================================
// Composition
// ============================================================================

/// Ordered chain of series filters.
pub struct PointFilter {
    steps: Vec<Box<dyn SeriesFilter>>,
}

impl PointFilter {
    /// An empty chain (identity).
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Status, zero-rate and sigma-clip filters as enabled in `config`, in
    /// that order.
    pub fn from_config(config: &FilterConfig) -> Self {
        let mut chain = Self::new();
        if config.require_physics_status {
            chain.add_step(Box::new(StatusFilter));
        }
        if config.remove_zero_rates {
            chain.add_step(Box::new(ZeroRateFilter::new(config.zero_sentinel)));
        }
        if let Some(clip) = config.sigma_clip {
            chain.add_step(Box::new(SigmaClipFilter::new(clip.k_x, clip.k_y)));
        }
        chain
    }

    pub fn add_step(&mut self, step: Box<dyn SeriesFilter>) {
        self.steps.push(step);
    }

    pub fn with_step(mut self, step: Box<dyn SeriesFilter>) -> Self {
        self.add_step(step);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl Default for PointFilter {
    fn default() -> Self {
        Self::from_config(&FilterConfig::default())
    }
}

impl SeriesFilter for PointFilter {
    fn name(&self) -> &str {
        "point_filter"
    }

    fn apply(&self, series: &Series) -> Series {
        self.steps
            .iter()
            .fold(series.clone(), |current, step| step.apply(&current))
    }
}
