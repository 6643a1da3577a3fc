//! JSON persistence for fit collections and certification reports.

use std::fs;
use std::io::Write;
use std::path::Path;

use ratemon_spi::{AnomalyReport, FitCollection, RateMonError, ReportWriter, Result};
use tracing::debug;

/// Write `fits` (models and run groups) as pretty-printed JSON.
pub fn save_fits(fits: &FitCollection, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(fits)
        .map_err(|e| RateMonError::Serialization(e.to_string()))?;
    fs::write(path, json)
        .map_err(|e| RateMonError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
    debug!(path = %path.display(), models = fits.len(), "fits saved");
    Ok(())
}

/// Read a collection written by [`save_fits`].
pub fn load_fits(path: impl AsRef<Path>) -> Result<FitCollection> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| RateMonError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content).map_err(|e| RateMonError::Serialization(e.to_string()))
}

/// Writes one JSON object per report, one per line.
pub struct JsonReportWriter<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonReportWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonReportWriter<fs::File> {
    /// Create (or truncate) `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::create(path)
            .map_err(|e| RateMonError::Io(format!("Failed to create {}: {}", path.display(), e)))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> ReportWriter for JsonReportWriter<W> {
    fn write_report(&mut self, report: &AnomalyReport) -> Result<()> {
        let line =
            serde_json::to_string(report).map_err(|e| RateMonError::Serialization(e.to_string()))?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

/// Parse the output of [`JsonReportWriter`].
pub fn read_reports(content: &str) -> Result<Vec<AnomalyReport>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| RateMonError::Serialization(e.to_string())))
        .collect()
}
