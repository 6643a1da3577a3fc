//! Trigger-Rate Monitoring Core
//!
//! Run-group aggregation, point filtering, rate-model fitting, model
//! selection, prediction and per-lumisection certification.

pub mod aggregator;
pub mod detector;
pub mod filter;
pub mod fitter;
pub mod persistence;
pub mod pipeline;
pub mod predictor;
pub mod selector;
pub mod source;

pub use aggregator::{prescale_partition, Aggregation, RunGroupAggregator, RunObservations};
pub use detector::AnomalyDetector;
pub use filter::{population_stats, PointFilter, SigmaClipFilter, StatusFilter, ZeroRateFilter};
pub use fitter::{FitOutcome, ModelFitter, ParamConstraint, RegressionSpec};
pub use persistence::{load_fits, read_reports, save_fits, JsonReportWriter};
pub use pipeline::{render_summary, CertifyRun, FitRun, MonitorRun, PublishedFits, RateMonitor};
pub use predictor::{predict, Predictor};
pub use selector::{choose_by_mse, merge_fits, FitSelector};
pub use source::{FixtureDocument, FixtureRateSource, RunFixture};
