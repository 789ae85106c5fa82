//! JSON report

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;

use super::{total_samples, SampleRecord};
use crate::domain::ExportError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonReport {
    pub pid: i32,
    pub duration_secs: u64,
    pub total_samples: u64,
    /// Kernel-side counters by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub diagnostics: BTreeMap<String, u64>,
    pub samples: Vec<SampleRecord>,
}

impl JsonReport {
    /// Report over `samples`, most frequent first.
    #[must_use]
    pub fn new(pid: i32, duration_secs: u64, mut samples: Vec<SampleRecord>) -> Self {
        samples.sort_by(|a, b| b.count.cmp(&a.count));
        Self { pid, duration_secs, total_samples: total_samples(&samples), diagnostics: BTreeMap::new(), samples }
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: BTreeMap<String, u64>) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// # Errors
/// Returns an error if serialization or writing fails
pub fn write_json<W: Write>(writer: &mut W, report: &JsonReport) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut *writer, report)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(count: u64) -> SampleRecord {
        SampleRecord {
            comm: "nginx".to_string(),
            pid: 3,
            count,
            native: vec![],
            lua: vec!["init.lua:1".to_string()],
            kernel: vec![],
        }
    }

    #[test]
    fn test_report_sorted_and_totalled() {
        let report = JsonReport::new(3, 10, vec![sample(1), sample(7)]);
        assert_eq!(report.total_samples, 8);
        assert_eq!(report.samples[0].count, 7);
    }

    #[test]
    fn test_report_round_trips_through_serde() {
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("samples".to_string(), 12);
        let report = JsonReport::new(3, 10, vec![sample(2)]).with_diagnostics(diagnostics);

        let mut out = Vec::new();
        write_json(&mut out, &report).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["total_samples"], 2);
        assert_eq!(value["diagnostics"]["samples"], 12);
        assert_eq!(value["samples"][0]["lua"][0], "init.lua:1");
    }
}
