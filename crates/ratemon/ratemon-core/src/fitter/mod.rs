//! Multi-model regression of trigger rate against pileup.
//!
//! Every form is fitted in rescaled coordinates (`x / max|x|`, `y·N`) and
//! mapped back exactly. Robustness comes from a trimmed-squares
//! concentration loop: the worst residuals get zero weight and the fit is
//! repeated until the kept set stops changing.

mod least_squares;
pub mod linalg;
mod spec;

pub use spec::{ParamConstraint, RegressionSpec};

use ratemon_api::FitterConfig;
use ratemon_spi::{FitModel, GroupFits, ModelKind, RateMonError, Result, Series};
use tracing::{debug, warn};

use least_squares::{levenberg_marquardt, linear_fit, normal_equations, seeds, weighted_sse};
use linalg::invert;

/// Models fitted for one series.
#[derive(Debug, Clone, Default)]
pub struct FitOutcome {
    pub models: GroupFits,
    /// Kinds whose non-finite parameters were zeroed, with the parameter
    /// indices.
    pub degenerate: Vec<(ModelKind, Vec<usize>)>,
}

/// Fits the configured functional forms to filtered series.
#[derive(Debug, Clone, Default)]
pub struct ModelFitter {
    config: FitterConfig,
}

impl ModelFitter {
    pub fn new(config: FitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    /// Fit every configured kind to `series`.
    ///
    /// Fails with `InsufficientPoints` when the series is shorter than the
    /// configured minimum.
    pub fn fit_series(&self, series: &Series) -> Result<FitOutcome> {
        let n = series.len();
        if n < self.config.min_points {
            return Err(RateMonError::InsufficientPoints {
                required: self.config.min_points,
                actual: n,
            });
        }

        let x = series.xs();
        let y = series.ys();
        let mut outcome = FitOutcome::default();
        for &kind in &self.config.kinds {
            if outcome.models.contains_key(&kind) {
                continue;
            }
            let (mut model, zeroed) = self.fit_kind(kind, &x, &y);
            model.per_bunch = series.per_bunch();
            if !zeroed.is_empty() {
                warn!(
                    trigger = %series.trigger(),
                    group = %series.group(),
                    kind = %kind,
                    parameters = ?zeroed,
                    "NaN fit parameters zeroed"
                );
                outcome.degenerate.push((kind, zeroed));
            }
            debug!(
                trigger = %series.trigger(),
                group = %series.group(),
                kind = %kind,
                mse = model.residual_mse,
                points = n,
                "fitted"
            );
            outcome.models.insert(kind, model);
        }
        Ok(outcome)
    }

    /// Fit one form to raw points.
    ///
    /// Returns the model and the indices of coefficients that came out
    /// non-finite and were zeroed.
    pub fn fit_kind(&self, kind: ModelKind, x: &[f64], y: &[f64]) -> (FitModel, Vec<usize>) {
        let spec = RegressionSpec::for_kind(kind);
        let n = x.len().min(y.len());
        let (x, y) = (&x[..n], &y[..n]);
        if n == 0 {
            let model = FitModel {
                coefficients: spec.enforce([0.0; 4]),
                degenerate: true,
                ..FitModel::empty(kind)
            };
            return (model, Vec::new());
        }

        let x_scale = match x.iter().fold(0.0_f64, |m, v| m.max(v.abs())) {
            s if s.is_finite() && s > 0.0 => s,
            _ => 1.0,
        };
        let y_scale = self.config.normalization.unwrap_or(1.0);
        let u: Vec<f64> = x.iter().map(|v| v / x_scale).collect();
        let v: Vec<f64> = y.iter().map(|w| w * y_scale).collect();

        let keep_count = trimmed_count(n, self.config.robust_fraction, spec.n_free());
        let mut keep = vec![true; n];
        let mut b = self.solve(&spec, &u, &v, &keep, None);
        for _ in 0..self.config.robust_iterations {
            if keep_count >= n {
                break;
            }
            let next = trim_mask(&spec, &b, &u, &v, keep_count);
            if next == keep {
                break;
            }
            keep = next;
            b = self.solve(&spec, &u, &v, &keep, Some(b));
        }

        let kept = keep.iter().filter(|k| **k).count();
        let dof = kept.saturating_sub(spec.n_free());
        let scaled_chi_square = weighted_sse(&spec, &b, &u, &v, &keep);
        let mut scaled_errors = [0.0; 4];
        if dof > 0 && scaled_chi_square.is_finite() {
            let (jtj, _) = normal_equations(&spec, &b, &u, &v, &keep);
            if let Some(inverse) = invert(&jtj) {
                let variance = scaled_chi_square / dof as f64;
                for (row, &p) in spec.free_indices().iter().enumerate() {
                    scaled_errors[p] = (inverse[row][row] * variance).max(0.0).sqrt();
                }
            }
        }

        let (mut coefficients, mut errors) = spec.rescale(b, scaled_errors, x_scale, y_scale);
        let zeroed: Vec<usize> = (0..4).filter(|&k| !coefficients[k].is_finite()).collect();
        for &k in &zeroed {
            coefficients[k] = 0.0;
        }
        for e in errors.iter_mut().filter(|e| !e.is_finite()) {
            *e = 0.0;
        }

        let residual_mse = (x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| (yi - kind.evaluate(&coefficients, xi)).powi(2))
            .sum::<f64>()
            / n as f64)
            .sqrt();

        let model = FitModel {
            kind,
            coefficients,
            coefficient_errors: errors,
            residual_mse,
            chi_square: weighted_sse(&spec, &coefficients, x, y, &keep),
            degrees_of_freedom: dof,
            mean_raw_y: y.iter().sum::<f64>() / n as f64,
            n_points: n,
            per_bunch: false,
            degenerate: !zeroed.is_empty(),
        };
        (model, zeroed)
    }

    fn solve(
        &self,
        spec: &RegressionSpec,
        x: &[f64],
        y: &[f64],
        keep: &[bool],
        previous: Option<[f64; 4]>,
    ) -> [f64; 4] {
        if spec.is_linear() {
            return linear_fit(spec, x, y, keep);
        }
        let starts: Vec<[f64; 4]> = previous
            .filter(|p| p.iter().all(|v| v.is_finite()))
            .into_iter()
            .chain(seeds(spec, x, y, keep))
            .collect();
        starts
            .into_iter()
            .map(|start| {
                levenberg_marquardt(
                    spec,
                    x,
                    y,
                    keep,
                    start,
                    self.config.max_iterations,
                    self.config.tolerance,
                )
            })
            .map(|a| (weighted_sse(spec, &a, x, y, keep), a))
            .min_by(|(sa, _), (sb, _)| nan_last(*sa).total_cmp(&nan_last(*sb)))
            .map(|(_, a)| a)
            .unwrap_or_else(|| spec.assemble(&vec![f64::NAN; spec.n_free()]))
    }
}

fn nan_last(v: f64) -> f64 {
    if v.is_nan() {
        f64::INFINITY
    } else {
        v
    }
}

/// Points kept by the trimmed loop: `ceil(fraction·n)`, at least one more
/// than the free parameters, at most `n`.
fn trimmed_count(n: usize, fraction: f64, n_free: usize) -> usize {
    let count = (fraction * n as f64 - 1e-9).ceil().max(0.0) as usize;
    count.max(n_free + 1).min(n)
}

/// Mask of the `keep_count` smallest absolute residuals (ties by position).
fn trim_mask(spec: &RegressionSpec, a: &[f64; 4], x: &[f64], y: &[f64], keep_count: usize) -> Vec<bool> {
    let mut order: Vec<(f64, usize)> = x
        .iter()
        .zip(y)
        .enumerate()
        .map(|(i, (&xi, &yi))| (nan_last((yi - spec.evaluate(a, xi)).abs()), i))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    let mut mask = vec![false; x.len()];
    for &(_, i) in order.iter().take(keep_count) {
        mask[i] = true;
    }
    mask
}
