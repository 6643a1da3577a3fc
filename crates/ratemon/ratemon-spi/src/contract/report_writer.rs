//! Certification report sink.

use crate::error::Result;
use crate::model::AnomalyReport;

/// Receives one [`AnomalyReport`] per certified run.
pub trait ReportWriter {
    fn write_report(&mut self, report: &AnomalyReport) -> Result<()>;
}

impl ReportWriter for Vec<AnomalyReport> {
    fn write_report(&mut self, report: &AnomalyReport) -> Result<()> {
        self.push(report.clone());
        Ok(())
    }
}
