//! Weighted least-squares solvers over a [`RegressionSpec`].
//!
//! Weights are 0/1 masks produced by the trimmed-squares loop in the fitter.

use super::linalg::solve;
use super::spec::RegressionSpec;
use ratemon_spi::ModelKind;

/// Marquardt damping bounds.
const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e12;

/// Sum of squared residuals over the kept points.
pub(crate) fn weighted_sse(spec: &RegressionSpec, a: &[f64; 4], x: &[f64], y: &[f64], keep: &[bool]) -> f64 {
    x.iter()
        .zip(y)
        .zip(keep)
        .filter(|(_, &k)| k)
        .map(|((&xi, &yi), _)| (yi - spec.evaluate(a, xi)).powi(2))
        .sum()
}

/// `JᵀWJ` and `JᵀW·r` restricted to the free parameters.
pub(crate) fn normal_equations(
    spec: &RegressionSpec,
    a: &[f64; 4],
    x: &[f64],
    y: &[f64],
    keep: &[bool],
) -> (Vec<Vec<f64>>, Vec<f64>) {
    let free = spec.free_indices();
    let m = free.len();
    let mut jtj = vec![vec![0.0; m]; m];
    let mut jtr = vec![0.0; m];
    for ((&xi, &yi), _) in x.iter().zip(y).zip(keep).filter(|(_, &k)| k) {
        let grad = spec.gradient(a, xi);
        let residual = yi - spec.evaluate(a, xi);
        for (row, &p) in free.iter().enumerate() {
            jtr[row] += grad[p] * residual;
            for (col, &q) in free.iter().enumerate() {
                jtj[row][col] += grad[p] * grad[q];
            }
        }
    }
    (jtj, jtr)
}

/// Exact solution for forms linear in their free parameters.
///
/// Starting from the fixed-only model, one Gauss-Newton step is the
/// least-squares solution. Returns NaN in the free slots when the system is
/// singular.
pub(crate) fn linear_fit(spec: &RegressionSpec, x: &[f64], y: &[f64], keep: &[bool]) -> [f64; 4] {
    let base = spec.assemble(&vec![0.0; spec.n_free()]);
    let (jtj, jtr) = normal_equations(spec, &base, x, y, keep);
    match solve(jtj, jtr) {
        Some(free) => spec.assemble(&free),
        None => spec.assemble(&vec![f64::NAN; spec.n_free()]),
    }
}

/// Damped Gauss-Newton (Levenberg-Marquardt) refinement from `start`.
pub(crate) fn levenberg_marquardt(
    spec: &RegressionSpec,
    x: &[f64],
    y: &[f64],
    keep: &[bool],
    start: [f64; 4],
    max_iterations: usize,
    tolerance: f64,
) -> [f64; 4] {
    let free = spec.free_indices();
    let mut a = start;
    let mut sse = weighted_sse(spec, &a, x, y, keep);
    if !sse.is_finite() {
        return a;
    }
    let mut lambda = LAMBDA_START;

    for _ in 0..max_iterations {
        let (jtj, jtr) = normal_equations(spec, &a, x, y, keep);
        let mut step = None;
        while lambda <= LAMBDA_MAX {
            let mut damped = jtj.clone();
            for (i, row) in damped.iter_mut().enumerate() {
                let diag = jtj[i][i];
                row[i] = if diag > 0.0 { diag * (1.0 + lambda) } else { lambda };
            }
            if let Some(delta) = solve(damped, jtr.clone()) {
                let mut candidate = a;
                for (&p, d) in free.iter().zip(&delta) {
                    candidate[p] += d;
                }
                let candidate_sse = weighted_sse(spec, &candidate, x, y, keep);
                if candidate_sse.is_finite() && candidate_sse < sse {
                    step = Some((candidate, candidate_sse));
                    break;
                }
            }
            lambda *= 10.0;
        }

        let Some((candidate, candidate_sse)) = step else {
            break;
        };
        let improvement = (sse - candidate_sse) / sse.max(f64::MIN_POSITIVE);
        a = candidate;
        sse = candidate_sse;
        lambda = (lambda / 10.0).max(f64::EPSILON);
        if improvement < tolerance {
            break;
        }
    }
    a
}

/// Closed-form `y = c + d·x` over the kept points.
fn simple_regression(x: &[f64], z: &[f64], keep: &[bool]) -> Option<(f64, f64)> {
    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(z)
        .zip(keep)
        .filter(|(_, &k)| k)
        .map(|((&xi, &zi), _)| (xi, zi))
        .collect();
    let n = points.len() as f64;
    if points.is_empty() {
        return None;
    }
    let sum_x: f64 = points.iter().map(|p| p.0).sum();
    let sum_z: f64 = points.iter().map(|p| p.1).sum();
    let sum_xx: f64 = points.iter().map(|p| p.0 * p.0).sum();
    let sum_xz: f64 = points.iter().map(|p| p.0 * p.1).sum();
    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < 1e-12 * (n * sum_xx).max(1.0) {
        return Some((sum_z / n, 0.0));
    }
    let slope = (n * sum_xz - sum_x * sum_z) / denominator;
    Some(((sum_z - slope * sum_x) / n, slope))
}

/// Starting points for the nonlinear forms, best first.
///
/// Expects `x` already scaled to roughly unit range.
pub(crate) fn seeds(spec: &RegressionSpec, x: &[f64], y: &[f64], keep: &[bool]) -> Vec<[f64; 4]> {
    let kept_y: Vec<f64> = y.iter().zip(keep).filter(|(_, &k)| k).map(|(&v, _)| v).collect();
    let (min_y, max_y) = kept_y
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !min_y.is_finite() || !max_y.is_finite() {
        return vec![spec.assemble(&vec![0.0; spec.n_free()])];
    }
    let span = (max_y - min_y).max(min_y.abs() * 1e-6).max(1e-9);

    let mut candidates = Vec::new();
    match spec.kind() {
        ModelKind::Exp => {
            let mut offsets = vec![min_y - 0.1 * span, min_y - span];
            if min_y > 0.0 {
                offsets.insert(0, 0.0);
            }
            for offset in offsets {
                let z: Vec<f64> = y.iter().map(|&v| (v - offset).max(f64::MIN_POSITIVE).ln()).collect();
                if let Some((c, d)) = simple_regression(x, &z, keep) {
                    candidates.push(spec.enforce([offset, 1.0, c, d]));
                }
            }
        }
        ModelKind::Sinh => {
            for rate in [0.5, 1.0, 2.0, 4.0] {
                let s: Vec<f64> = x.iter().map(|&v| (rate * v).sinh()).collect();
                if let Some((c, d)) = simple_regression(&s, y, keep) {
                    candidates.push(spec.enforce([rate, d, c, 0.0]));
                }
            }
        }
        _ => candidates.push(linear_fit(spec, x, y, keep)),
    }
    candidates.sort_by(|a, b| {
        let sa = weighted_sse(spec, a, x, y, keep);
        let sb = weighted_sse(spec, b, x, y, keep);
        sa.total_cmp(&sb)
    });
    candidates
}
