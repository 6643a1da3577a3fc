//! Model predictions with a symmetric error band.

use ratemon_spi::{FitModel, Lumisection, Prediction};

/// Rate predicted by `fit` at `x` and the band half-width.
///
/// The model value is scaled by `bunch_count`; negative or NaN predictions
/// are clamped to 0. The error is `bunch_count · sigma_multiplier · mse`.
pub fn predict(fit: &FitModel, x: f64, bunch_count: f64, sigma_multiplier: f64) -> (f64, f64) {
    let raw = bunch_count * fit.evaluate(x);
    let predicted = if raw > 0.0 { raw } else { 0.0 };
    (predicted, bunch_count * sigma_multiplier * fit.residual_mse)
}

/// Evaluates fits over lumisections at a fixed band multiplier.
#[derive(Debug, Clone, Copy)]
pub struct Predictor {
    sigma_multiplier: f64,
}

impl Predictor {
    pub fn new(sigma_multiplier: f64) -> Self {
        Self { sigma_multiplier }
    }

    pub fn sigma_multiplier(&self) -> f64 {
        self.sigma_multiplier
    }

    pub fn predict(&self, fit: &FitModel, lumisection: Lumisection, x: f64, bunch_count: f64) -> Prediction {
        let (predicted_y, error_y) = predict(fit, x, bunch_count, self.sigma_multiplier);
        Prediction::new(lumisection, predicted_y, error_y)
    }

    /// One prediction per `(lumisection, x)` pair, in input order.
    pub fn curve(
        &self,
        fit: &FitModel,
        points: impl IntoIterator<Item = (Lumisection, f64)>,
        bunch_count: f64,
    ) -> Vec<Prediction> {
        points
            .into_iter()
            .map(|(ls, x)| self.predict(fit, ls, x, bunch_count))
            .collect()
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new(3.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use ratemon_spi::ModelKind;

    fn linear(a0: f64, a1: f64, mse: f64) -> FitModel {
        FitModel {
            coefficients: [a0, a1, 0.0, 0.0],
            residual_mse: mse,
            ..FitModel::empty(ModelKind::Linear)
        }
    }

    #[test]
    fn test_predict_scales_by_bunches() {
        let fit = linear(1.0, 2.0, 0.5);
        let (y, err) = predict(&fit, 10.0, 100.0, 3.0);
        assert_eq!(y, 2100.0);
        assert_eq!(err, 150.0);
    }

    #[test]
    fn test_negative_prediction_is_clamped() {
        let fit = linear(-50.0, 1.0, 1.0);
        assert_eq!(predict(&fit, 10.0, 1.0, 3.0).0, 0.0);
        let nan = linear(f64::NAN, 1.0, 1.0);
        assert_eq!(predict(&nan, 10.0, 1.0, 3.0).0, 0.0);
    }

    #[test]
    fn test_never_negative() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let fit = FitModel {
                coefficients: [
                    rng.gen_range(-100.0..100.0),
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-0.1..0.1),
                ],
                ..FitModel::empty(ModelKind::Cube)
            };
            let x = rng.gen_range(0.0..60.0);
            assert!(predict(&fit, x, rng.gen_range(1.0..2500.0), 3.0).0 >= 0.0);
        }
    }

    #[test]
    fn test_curve_keeps_order() {
        let predictor = Predictor::default();
        let curve = predictor.curve(&linear(0.0, 1.0, 2.0), [(3, 30.0), (1, 10.0)], 1.0);
        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0], Prediction::new(3, 30.0, 6.0));
        assert_eq!(curve[1].lumisection, 1);
    }
}
