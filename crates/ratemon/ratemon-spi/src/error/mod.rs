//! Error types for trigger-rate monitoring.
//!
//! `RateMonError` covers the pipeline; `SourceError` covers data-source
//! collaborators and is always recovered locally.

mod ratemon_error;
mod source_error;

pub use ratemon_error::{RateMonError, Result};
pub use source_error::SourceError;
