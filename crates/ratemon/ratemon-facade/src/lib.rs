//! Trigger-Rate Monitoring Facade
//!
//! Unified re-exports for the rate-monitoring module:
//! - Data model, `RateSource`/`ReportWriter` contracts and errors from SPI
//! - Configuration types from API
//! - Aggregator, filters, fitter, selector, predictor, detector and the
//!   `RateMonitor` pipeline from Core

// Re-export everything from SPI
pub use ratemon_spi::*;

// Re-export everything from API
pub use ratemon_api::*;

// Re-export everything from Core
pub use ratemon_core::*;
