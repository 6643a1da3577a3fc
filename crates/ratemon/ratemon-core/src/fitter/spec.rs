//! Per-kind parameter constraints.

use ratemon_spi::ModelKind;

/// Role of one of the four coefficient slots in a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamConstraint {
    Free,
    Fixed(f64),
    Unused,
}

/// Functional form plus the constraint on each coefficient.
///
/// Fixed values are zero or the `exp` amplitude of one; both are unchanged
/// by the pileup and rate rescaling the fitter applies.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionSpec {
    kind: ModelKind,
    constraints: [ParamConstraint; 4],
}

impl RegressionSpec {
    pub fn for_kind(kind: ModelKind) -> Self {
        use ParamConstraint::{Fixed, Free, Unused};
        let constraints = match kind {
            ModelKind::Linear => [Free, Free, Unused, Unused],
            ModelKind::Quad => [Fixed(0.0), Free, Free, Unused],
            ModelKind::Quad2 => [Free, Free, Free, Unused],
            ModelKind::Cube => [Fixed(0.0), Free, Free, Free],
            ModelKind::Exp => [Free, Fixed(1.0), Free, Free],
            ModelKind::Sinh => [Free, Free, Free, Unused],
        };
        Self { kind, constraints }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn constraints(&self) -> &[ParamConstraint; 4] {
        &self.constraints
    }

    /// Polynomial forms are linear in their free parameters.
    pub fn is_linear(&self) -> bool {
        matches!(
            self.kind,
            ModelKind::Linear | ModelKind::Quad | ModelKind::Quad2 | ModelKind::Cube
        )
    }

    pub fn free_indices(&self) -> Vec<usize> {
        self.constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, ParamConstraint::Free))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn n_free(&self) -> usize {
        self.free_indices().len()
    }

    /// Full coefficient array from free values (in `free_indices` order).
    pub fn assemble(&self, free: &[f64]) -> [f64; 4] {
        let mut coefficients = [0.0; 4];
        let mut values = free.iter();
        for (slot, constraint) in coefficients.iter_mut().zip(self.constraints.iter()) {
            *slot = match constraint {
                ParamConstraint::Free => values.next().copied().unwrap_or(0.0),
                ParamConstraint::Fixed(v) => *v,
                ParamConstraint::Unused => 0.0,
            };
        }
        coefficients
    }

    /// Pin fixed and unused slots to their required values.
    pub fn enforce(&self, mut coefficients: [f64; 4]) -> [f64; 4] {
        for (slot, constraint) in coefficients.iter_mut().zip(self.constraints.iter()) {
            match constraint {
                ParamConstraint::Free => {}
                ParamConstraint::Fixed(v) => *slot = *v,
                ParamConstraint::Unused => *slot = 0.0,
            }
        }
        coefficients
    }

    pub fn evaluate(&self, a: &[f64; 4], x: f64) -> f64 {
        self.kind.evaluate(a, x)
    }

    /// Partial derivatives of the model with respect to each coefficient.
    pub fn gradient(&self, a: &[f64; 4], x: f64) -> [f64; 4] {
        match self.kind {
            ModelKind::Linear | ModelKind::Quad | ModelKind::Quad2 | ModelKind::Cube => {
                [1.0, x, x * x, x * x * x]
            }
            ModelKind::Exp => {
                let e = (a[2] + a[3] * x).exp();
                [1.0, e, a[1] * e, a[1] * x * e]
            }
            ModelKind::Sinh => [a[1] * x * (a[0] * x).cosh(), (a[0] * x).sinh(), 1.0, 0.0],
        }
    }

    /// Per-coefficient factors mapping a fit of `y·y_scale` against
    /// `x / x_scale` back to `y` against `x`; also returns the additive shift
    /// (only `exp` has one, on `a2`).
    fn rescale_factors(&self, x_scale: f64, y_scale: f64) -> ([f64; 4], [f64; 4]) {
        match self.kind {
            ModelKind::Linear | ModelKind::Quad | ModelKind::Quad2 | ModelKind::Cube => {
                let mut factors = [0.0; 4];
                for (k, f) in factors.iter_mut().enumerate() {
                    *f = 1.0 / (x_scale.powi(k as i32) * y_scale);
                }
                (factors, [0.0; 4])
            }
            ModelKind::Exp => (
                [1.0 / y_scale, 1.0, 1.0, 1.0 / x_scale],
                [0.0, 0.0, -y_scale.ln(), 0.0],
            ),
            ModelKind::Sinh => ([1.0 / x_scale, 1.0 / y_scale, 1.0 / y_scale, 0.0], [0.0; 4]),
        }
    }

    /// Map coefficients and their errors from the scaled fit back to the
    /// original units.
    pub fn rescale(
        &self,
        coefficients: [f64; 4],
        errors: [f64; 4],
        x_scale: f64,
        y_scale: f64,
    ) -> ([f64; 4], [f64; 4]) {
        let (factors, shifts) = self.rescale_factors(x_scale, y_scale);
        let mut a = [0.0; 4];
        let mut e = [0.0; 4];
        for k in 0..4 {
            a[k] = coefficients[k] * factors[k] + shifts[k];
            e[k] = errors[k] * factors[k].abs();
        }
        (self.enforce(a), e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_indices() {
        assert_eq!(RegressionSpec::for_kind(ModelKind::Linear).free_indices(), vec![0, 1]);
        assert_eq!(RegressionSpec::for_kind(ModelKind::Quad).free_indices(), vec![1, 2]);
        assert_eq!(RegressionSpec::for_kind(ModelKind::Cube).free_indices(), vec![1, 2, 3]);
        assert_eq!(RegressionSpec::for_kind(ModelKind::Exp).free_indices(), vec![0, 2, 3]);
        assert_eq!(RegressionSpec::for_kind(ModelKind::Sinh).n_free(), 3);
    }

    #[test]
    fn test_assemble_fills_fixed_slots() {
        let exp = RegressionSpec::for_kind(ModelKind::Exp);
        assert_eq!(exp.assemble(&[5.0, 0.5, 0.1]), [5.0, 1.0, 0.5, 0.1]);
        let quad = RegressionSpec::for_kind(ModelKind::Quad);
        assert_eq!(quad.assemble(&[2.0, 3.0]), [0.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        for kind in [ModelKind::Exp, ModelKind::Sinh, ModelKind::Cube] {
            let spec = RegressionSpec::for_kind(kind);
            let a = [0.3, 1.2, -0.4, 0.7];
            let x = 0.8;
            let grad = spec.gradient(&a, x);
            for k in 0..4 {
                let h = 1e-6;
                let mut up = a;
                let mut down = a;
                up[k] += h;
                down[k] -= h;
                let numeric = (spec.evaluate(&up, x) - spec.evaluate(&down, x)) / (2.0 * h);
                assert!((numeric - grad[k]).abs() < 1e-6, "{kind} a{k}");
            }
        }
    }

    #[test]
    fn test_rescale_preserves_predictions() {
        let (s, n) = (40.0, 8.0);
        for kind in [ModelKind::Quad2, ModelKind::Exp, ModelKind::Sinh] {
            let spec = RegressionSpec::for_kind(kind);
            let scaled = spec.enforce([2.0, 1.0, 0.5, 0.3]);
            let (a, _) = spec.rescale(scaled, [0.0; 4], s, n);
            for x in [5.0, 20.0, 35.0] {
                let expected = spec.evaluate(&scaled, x / s) / n;
                assert!((spec.evaluate(&a, x) - expected).abs() < 1e-9 * expected.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_rescale_keeps_fixed_values_exact() {
        let exp = RegressionSpec::for_kind(ModelKind::Exp);
        let (a, _) = exp.rescale([1.0, 1.0, 2.0, 3.0], [0.1; 4], 55.0, 3.0);
        assert_eq!(a[1], 1.0);
        let cube = RegressionSpec::for_kind(ModelKind::Cube);
        let (a, _) = cube.rescale([0.0, 1.0, 2.0, 3.0], [0.1; 4], 55.0, 3.0);
        assert_eq!(a[0], 0.0);
    }
}
