//! Per-worker result records and per-configuration statistics.
//!
//! A [`ResultRecord`] is what a single worker invocation produces, success or
//! failure. [`TestStatistics`] folds the records of one configuration into
//! averages and counts: averages only consider `OK` records, counts span all
//! of them. Duration percentiles come from an HDR histogram at microsecond
//! resolution.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::cli::{ExecutorType, Operation};

/// Largest duration the percentile histogram tracks exactly (one hour, in µs).
/// Longer durations are clamped.
const MAX_TRACKED_MICROS: u64 = 3_600_000_000;

/// Outcome of one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Ok => write!(f, "OK"),
            RecordStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of a single worker invocation.
///
/// `file_size` is the payload size in bytes (0 for `list` and for failed
/// downloads) and `throughput` is bytes per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub worker_id: usize,
    pub operation: Operation,
    pub file_size: u64,
    pub duration: Duration,
    pub throughput: f64,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultRecord {
    pub fn success(
        worker_id: usize,
        operation: Operation,
        file_size: u64,
        duration: Duration,
    ) -> Self {
        Self {
            worker_id,
            operation,
            file_size,
            duration,
            throughput: throughput_of(file_size, duration),
            status: RecordStatus::Ok,
            error: None,
        }
    }

    /// A failed invocation. Throughput is always 0.
    pub fn failure(
        worker_id: usize,
        operation: Operation,
        file_size: u64,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            worker_id,
            operation,
            file_size,
            duration,
            throughput: 0.0,
            status: RecordStatus::Error,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RecordStatus::Ok
    }
}

/// Bytes per second, 0 when nothing measurable elapsed.
pub fn throughput_of(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

/// One point of the sweep matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfiguration {
    pub operation: Operation,
    pub file_size_mb: u64,
    pub client_pool_size: usize,
    pub server_pool_size: usize,
    pub executor: ExecutorType,
}

impl fmt::Display for TestConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}MB, {} {} workers, server pool {}",
            self.operation,
            self.file_size_mb,
            self.client_pool_size,
            self.executor,
            self.server_pool_size
        )
    }
}

/// Duration distribution of the successful workers, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationPercentiles {
    pub min_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub max_us: u64,
}

/// Aggregated outcome of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatistics {
    pub configuration: TestConfiguration,
    /// Mean duration of `OK` records, seconds.
    pub avg_duration: f64,
    /// Mean throughput of `OK` records, bytes per second.
    pub avg_throughput: f64,
    pub success_count: usize,
    pub fail_count: usize,
    /// `None` when no worker succeeded.
    pub percentiles: Option<DurationPercentiles>,
}

impl TestStatistics {
    pub fn from_records(configuration: TestConfiguration, records: &[ResultRecord]) -> Self {
        let ok: Vec<&ResultRecord> = records.iter().filter(|r| r.is_ok()).collect();
        let success_count = ok.len();
        let fail_count = records.len() - success_count;

        let (avg_duration, avg_throughput) = if ok.is_empty() {
            (0.0, 0.0)
        } else {
            let n = ok.len() as f64;
            (
                ok.iter().map(|r| r.duration.as_secs_f64()).sum::<f64>() / n,
                ok.iter().map(|r| r.throughput).sum::<f64>() / n,
            )
        };

        Self {
            configuration,
            avg_duration,
            avg_throughput,
            success_count,
            fail_count,
            percentiles: duration_percentiles(&ok),
        }
    }

    pub fn total_workers(&self) -> usize {
        self.success_count + self.fail_count
    }
}

fn duration_percentiles(records: &[&ResultRecord]) -> Option<DurationPercentiles> {
    if records.is_empty() {
        return None;
    }
    // Only invalid bounds make construction fail.
    let mut histogram = Histogram::<u64>::new_with_bounds(1, MAX_TRACKED_MICROS, 3).ok()?;
    for record in records {
        let micros = u64::try_from(record.duration.as_micros()).unwrap_or(u64::MAX);
        histogram.saturating_record(micros);
    }

    Some(DurationPercentiles {
        min_us: histogram.min(),
        p50_us: histogram.value_at_quantile(0.50),
        p95_us: histogram.value_at_quantile(0.95),
        max_us: histogram.max(),
    })
}
