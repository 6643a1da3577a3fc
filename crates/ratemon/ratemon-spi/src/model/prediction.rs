//! Predicted rate with a symmetric error band.

use serde::{Deserialize, Serialize};

use super::ids::Lumisection;

/// Model prediction for one lumisection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub lumisection: Lumisection,
    pub predicted_y: f64,
    pub error_y: f64,
}

impl Prediction {
    pub fn new(lumisection: Lumisection, predicted_y: f64, error_y: f64) -> Self {
        Self {
            lumisection,
            predicted_y,
            error_y,
        }
    }

    pub fn lower(&self) -> f64 {
        self.predicted_y - self.error_y
    }

    pub fn upper(&self) -> f64 {
        self.predicted_y + self.error_y
    }

    /// Strictly outside the band.
    pub fn deviates(&self, observed: f64) -> bool {
        (observed - self.predicted_y).abs() > self.error_y
    }
}
