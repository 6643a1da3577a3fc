//! Per-lumisection observations.

use serde::{Deserialize, Serialize};

use super::ids::{Lumisection, RunId, TriggerId};

/// One usable rate observation for a trigger in one lumisection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub trigger: TriggerId,
    pub run: RunId,
    pub lumisection: Lumisection,
    /// Pileup (or instantaneous luminosity).
    pub x: f64,
    /// Observed rate after the aggregator's corrections.
    pub y: f64,
    pub detector_ready: bool,
    pub beams_stable: bool,
    /// Prescale column active when the sample was recorded.
    #[serde(default)]
    pub prescale_column: Option<u32>,
}

impl Sample {
    pub fn new(
        trigger: TriggerId,
        run: RunId,
        lumisection: Lumisection,
        x: f64,
        y: f64,
    ) -> Self {
        Self {
            trigger,
            run,
            lumisection,
            x,
            y,
            detector_ready: true,
            beams_stable: true,
            prescale_column: None,
        }
    }

    pub fn with_prescale_column(mut self, column: Option<u32>) -> Self {
        self.prescale_column = column;
        self
    }

    /// Override the status flags.
    pub fn with_status(mut self, detector_ready: bool, beams_stable: bool) -> Self {
        self.detector_ready = detector_ready;
        self.beams_stable = beams_stable;
        self
    }

    /// Whether every subsystem was in and beams were declared stable.
    pub fn has_physics_status(&self) -> bool {
        self.detector_ready && self.beams_stable
    }

    /// Key under which a series deduplicates samples.
    pub fn key(&self) -> (RunId, Lumisection) {
        (self.run, self.lumisection)
    }
}

/// Raw per-lumisection row as delivered by a [`RateSource`](crate::RateSource).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRateRecord {
    pub lumisection: Lumisection,
    /// Pileup or luminosity; `None` when the luminosity system had no value.
    pub x: Option<f64>,
    /// Recorded rate in Hz.
    pub rate: f64,
    /// Prescale applied in this lumisection (0 means masked).
    #[serde(default = "default_prescale")]
    pub prescale: u32,
    /// Index of the active prescale column.
    #[serde(default)]
    pub prescale_column: Option<u32>,
    #[serde(default = "default_true")]
    pub detector_ready: bool,
    #[serde(default = "default_true")]
    pub beams_stable: bool,
}

fn default_prescale() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl RawRateRecord {
    pub fn new(lumisection: Lumisection, x: Option<f64>, rate: f64) -> Self {
        Self {
            lumisection,
            x,
            rate,
            prescale: 1,
            prescale_column: None,
            detector_ready: true,
            beams_stable: true,
        }
    }

    pub fn with_prescale(mut self, prescale: u32, column: Option<u32>) -> Self {
        self.prescale = prescale;
        self.prescale_column = column;
        self
    }

    pub fn with_status(mut self, detector_ready: bool, beams_stable: bool) -> Self {
        self.detector_ready = detector_ready;
        self.beams_stable = beams_stable;
        self
    }
}
