//! Report output for a stress-test run.
//!
//! Two files are written per run, sharing the `stress_test_<YYYYmmdd-HHMMSS>`
//! stem:
//!
//! - a CSV with one row per configuration and a closing `TOTAL` row that sums
//!   the success and failure counts;
//! - a JSON document with run metadata, system information and the full
//!   statistics (including duration percentiles).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::metrics::TestStatistics;

const CSV_HEADER: [&str; 10] = [
    "Number",
    "Operation",
    "Volume (MB)",
    "Client Worker Pool",
    "Server Worker Pool",
    "Avg Duration per Client (s)",
    "Avg Throughput per Client (bytes/s)",
    "Successful Workers",
    "Failed Workers",
    "Executor Type",
];

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Run metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub total_tests: usize,
    pub system_info: SystemInfo,
}

/// Totals across every configuration in the run
#[derive(Debug, Serialize, Deserialize)]
pub struct OverallSummary {
    pub total_success: usize,
    pub total_fail: usize,
}

/// The JSON report document
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalReport {
    pub metadata: ReportMetadata,
    pub results: Vec<TestStatistics>,
    pub summary: OverallSummary,
}

/// Paths of the files written by [`ResultsManager::finalize`].
#[derive(Debug, Clone)]
pub struct ReportFiles {
    pub csv: PathBuf,
    pub json: PathBuf,
}

/// Collects statistics during a run and writes the reports at the end.
pub struct ResultsManager {
    output_dir: PathBuf,
    results: Vec<TestStatistics>,
}

impl ResultsManager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            results: Vec::new(),
        }
    }

    /// Add the statistics of one finished configuration
    pub fn add(&mut self, stats: TestStatistics) {
        debug!("Adding results for {}", stats.configuration);
        self.results.push(stats);
    }

    pub fn results(&self) -> &[TestStatistics] {
        &self.results
    }

    /// Write the CSV and JSON reports stamped with the current local time.
    pub fn finalize(&self) -> Result<ReportFiles> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        self.write_reports(&stamp)
    }

    /// Write both reports as `stress_test_<stamp>.{csv,json}`.
    pub fn write_reports(&self, stamp: &str) -> Result<ReportFiles> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory {:?}", self.output_dir))?;

        let csv = self.output_dir.join(format!("stress_test_{}.csv", stamp));
        let json = self.output_dir.join(format!("stress_test_{}.json", stamp));
        self.write_csv(&csv)?;
        self.write_json(&json)?;

        info!("Results already saved to {:?}", csv);
        Ok(ReportFiles { csv, json })
    }

    fn write_csv(&self, path: &Path) -> Result<()> {
        std::fs::write(path, render_csv(&self.results))
            .with_context(|| format!("Failed to write CSV report {:?}", path))
    }

    fn write_json(&self, path: &Path) -> Result<()> {
        let report = FinalReport {
            metadata: ReportMetadata {
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                total_tests: self.results.len(),
                system_info: SystemInfo::default(),
            },
            results: self.results.clone(),
            summary: self.overall_summary(),
        };

        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write JSON report {:?}", path))
    }

    fn overall_summary(&self) -> OverallSummary {
        OverallSummary {
            total_success: self.results.iter().map(|s| s.success_count).sum(),
            total_fail: self.results.iter().map(|s| s.fail_count).sum(),
        }
    }
}

/// Render statistics as CSV: header, one numbered row each, then `TOTAL`.
pub fn render_csv(results: &[TestStatistics]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", CSV_HEADER.map(csv_field).join(","));

    let mut total_success = 0;
    let mut total_fail = 0;
    for (i, stats) in results.iter().enumerate() {
        let c = &stats.configuration;
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{}",
            i + 1,
            c.operation,
            c.file_size_mb,
            c.client_pool_size,
            c.server_pool_size,
            stats.avg_duration,
            stats.avg_throughput,
            stats.success_count,
            stats.fail_count,
            c.executor
        );
        total_success += stats.success_count;
        total_fail += stats.fail_count;
    }

    let _ = writeln!(out, "TOTAL,,,,,,,{},{},", total_success, total_fail);
    out
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{ExecutorType, Operation};
    use crate::metrics::TestConfiguration;
    use tempfile::tempdir;

    fn stats(operation: Operation, success: usize, fail: usize) -> TestStatistics {
        TestStatistics {
            configuration: TestConfiguration {
                operation,
                file_size_mb: 10,
                client_pool_size: success + fail,
                server_pool_size: 5,
                executor: ExecutorType::Process,
            },
            avg_duration: 1.5,
            avg_throughput: 2048.0,
            success_count: success,
            fail_count: fail,
            percentiles: None,
        }
    }

    #[test]
    fn test_render_csv_rows_and_total() {
        let csv = render_csv(&[stats(Operation::Upload, 4, 1), stats(Operation::List, 2, 0)]);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Number,Operation,Volume (MB),"));
        assert_eq!(lines[1], "1,upload,10,5,5,1.5,2048,4,1,process");
        assert_eq!(lines[2], "2,list,10,2,5,1.5,2048,2,0,process");
        assert_eq!(lines[3], "TOTAL,,,,,,,6,1,");
        assert_eq!(lines[3].split(',').count(), CSV_HEADER.len());
    }

    #[test]
    fn test_render_csv_empty_run() {
        let csv = render_csv(&[]);
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.ends_with("TOTAL,,,,,,,0,0,\n"));
    }

    #[test]
    fn test_write_reports() {
        let dir = tempdir().unwrap();
        let mut manager = ResultsManager::new(dir.path().join("out"));
        manager.add(stats(Operation::Download, 3, 0));

        let files = manager.write_reports("20240101-120000").unwrap();
        assert_eq!(files.csv.file_name().unwrap(), "stress_test_20240101-120000.csv");
        assert!(files.csv.exists());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&files.json).unwrap()).unwrap();
        assert_eq!(json["metadata"]["total_tests"], 1);
        assert_eq!(json["summary"]["total_success"], 3);
        assert_eq!(json["results"][0]["configuration"]["operation"], "download");
    }

    #[test]
    fn test_system_info_default() {
        let info = SystemInfo::default();
        assert!(!info.os.is_empty());
        assert!(info.cpu_cores > 0);
    }
}
