//! # Benchmark Orchestrator
//!
//! Drives the client side of a stress test: it expands the CLI lists into a
//! matrix of [`TestConfiguration`]s, runs each one through a worker executor
//! and hands the resulting [`TestStatistics`] to the results manager.
//!
//! ## Sweep Order
//!
//! ```text
//! server pool ─► executor ─► operation ─► file size ─► client pool
//! ```
//!
//! The server's pool size is fixed when it starts, so the client cannot
//! change it. When the sweep covers more than one server pool size, the
//! runner enters [`SweepPhase::AwaitingServer`] before each one and blocks on
//! a [`ReadyGate`] until the operator has restarted the server with the
//! matching `--pool-size`. With a single server pool size there is nothing to
//! restart and the gate is skipped.
//!
//! ## One Configuration
//!
//! 1. Generate (or reuse) the local test file for upload and download.
//! 2. For download, upload the file once as worker 0 so there is something to
//!    fetch. If that fails the configuration is skipped and yields no row.
//! 3. Launch `client_pool_size` workers through the executor and join all.
//! 4. Fold the records into statistics.
//!
//! When every list-valued option holds exactly one value the runner performs
//! that single configuration without consulting the gate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cli::{ClientArgs, ExecutorType, Operation};
use crate::executor::{executor_for, WorkerExecutor};
use crate::metrics::{ResultRecord, TestConfiguration, TestStatistics};
use crate::results::ResultsManager;
use crate::utils::{ensure_test_file, format_duration, format_rate, validate_port};
use crate::worker::{run_worker, WorkerJob};

/// Configuration for a stress-test run
///
/// All list-valued fields are already expanded: no `Operation::All` and no
/// `ExecutorType::Both`.
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub host: String,
    pub port: u16,
    pub operations: Vec<Operation>,
    pub file_sizes_mb: Vec<u64>,
    pub client_pools: Vec<usize>,
    /// Labels only; the server is reconfigured by hand between them.
    pub server_pools: Vec<usize>,
    pub executors: Vec<ExecutorType>,
    pub testfiles_dir: PathBuf,
    pub downloads_dir: PathBuf,
    /// Bound on every socket operation of a worker.
    pub io_timeout: Duration,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            host: crate::defaults::CLIENT_HOST.to_string(),
            port: crate::defaults::PORT,
            operations: Operation::expand_all(vec![Operation::All]),
            file_sizes_mb: crate::defaults::FILE_SIZES_MB.to_vec(),
            client_pools: crate::defaults::CLIENT_POOLS.to_vec(),
            server_pools: crate::defaults::SERVER_POOLS.to_vec(),
            executors: vec![ExecutorType::Thread],
            testfiles_dir: PathBuf::from(crate::defaults::TESTFILES_DIR),
            downloads_dir: PathBuf::from(crate::defaults::DOWNLOADS_DIR),
            io_timeout: crate::defaults::WORKER_IO_TIMEOUT,
        }
    }
}

impl BenchmarkConfig {
    /// Build and validate the run configuration from CLI arguments.
    pub fn from_args(args: &ClientArgs) -> Result<Self> {
        validate_port(args.port)?;
        if args.operation.is_empty() {
            anyhow::bail!("--operation needs at least one value");
        }
        ensure_positive("--file-sizes", &args.file_sizes)?;
        ensure_positive("--client-pools", &args.client_pools)?;
        ensure_positive("--server-pools", &args.server_pools)?;
        if args.timeout_secs == 0 {
            anyhow::bail!("--timeout-secs must be at least 1");
        }

        Ok(Self {
            host: args.host.clone(),
            port: args.port,
            operations: Operation::expand_all(args.operation.clone()),
            file_sizes_mb: args.file_sizes.clone(),
            client_pools: args.client_pools.clone(),
            server_pools: args.server_pools.clone(),
            executors: args.executor.expand_both(),
            testfiles_dir: args.testfiles_dir.clone(),
            downloads_dir: args.downloads_dir.clone(),
            io_timeout: Duration::from_secs(args.timeout_secs),
        })
    }

    /// `host:port` of the file server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True when the options describe exactly one configuration.
    pub fn is_single_run(&self) -> bool {
        self.operations.len() == 1
            && self.file_sizes_mb.len() == 1
            && self.client_pools.len() == 1
            && self.server_pools.len() == 1
            && self.executors.len() == 1
    }

    /// Number of configurations a full sweep measures.
    pub fn total_configurations(&self) -> usize {
        self.server_pools.len()
            * self.executors.len()
            * self.operations.len()
            * self.file_sizes_mb.len()
            * self.client_pools.len()
    }
}

fn ensure_positive<T: Copy + Default + PartialEq>(flag: &str, values: &[T]) -> Result<()> {
    if values.is_empty() {
        anyhow::bail!("{} needs at least one value", flag);
    }
    if values.iter().any(|v| *v == T::default()) {
        anyhow::bail!("{} values must be greater than zero", flag);
    }
    Ok(())
}

/// Blocks the sweep until the server is running with the next pool size.
#[async_trait]
pub trait ReadyGate: Send + Sync {
    async fn wait_ready(&self, server_pool_size: usize) -> Result<()>;
}

/// Asks the operator on the terminal and waits for Enter.
#[derive(Debug, Default)]
pub struct OperatorPrompt;

#[async_trait]
impl ReadyGate for OperatorPrompt {
    async fn wait_ready(&self, server_pool_size: usize) -> Result<()> {
        info!(
            "Restart the server with --pool-size {} to continue",
            server_pool_size
        );
        println!("Press Enter when the server is ready...");

        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|n| (n, line))
        })
        .await
        .context("Operator prompt task failed")?
        .context("Failed to read operator confirmation")?;

        if read.0 == 0 {
            anyhow::bail!("stdin closed before the server was confirmed ready");
        }
        Ok(())
    }
}

/// Proceeds immediately.
#[derive(Debug, Default)]
pub struct NoWait;

#[async_trait]
impl ReadyGate for NoWait {
    async fn wait_ready(&self, _server_pool_size: usize) -> Result<()> {
        Ok(())
    }
}

/// Where the sweep currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    /// Blocked on the ready gate for this server pool size.
    AwaitingServer(usize),
    /// Measuring configurations against this server pool size.
    Measuring(usize),
    Finished,
}

/// Runs configurations and sweeps.
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    gate: Box<dyn ReadyGate>,
    phase: SweepPhase,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig, gate: Box<dyn ReadyGate>) -> Self {
        let first_pool = config.server_pools.first().copied().unwrap_or_default();
        Self {
            config,
            gate,
            phase: SweepPhase::AwaitingServer(first_pool),
        }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    /// Run everything the configuration describes, adding each statistics
    /// row to `results`.
    ///
    /// Only a failing ready gate ends the run early; failed workers and
    /// skipped configurations do not.
    pub async fn run(&mut self, results: &mut ResultsManager) -> Result<()> {
        if self.config.is_single_run() {
            let configuration = TestConfiguration {
                operation: self.config.operations[0],
                file_size_mb: self.config.file_sizes_mb[0],
                client_pool_size: self.config.client_pools[0],
                server_pool_size: self.config.server_pools[0],
                executor: self.config.executors[0],
            };
            info!("Running a single test: {}", configuration);
            self.phase = SweepPhase::Measuring(configuration.server_pool_size);
            if let Some(stats) = self.run_stress_test(configuration).await {
                results.add(stats);
            }
        } else {
            self.run_sweep(results).await?;
        }

        self.phase = SweepPhase::Finished;
        Ok(())
    }

    async fn run_sweep(&mut self, results: &mut ResultsManager) -> Result<()> {
        info!(
            "Running {} configurations against {} server pool sizes",
            self.config.total_configurations(),
            self.config.server_pools.len()
        );

        let server_pools = self.config.server_pools.clone();
        let restarts_server = server_pools.len() > 1;
        for server_pool_size in server_pools {
            self.phase = SweepPhase::AwaitingServer(server_pool_size);
            info!("Tests for server pool size: {}", server_pool_size);
            if restarts_server {
                self.gate.wait_ready(server_pool_size).await?;
            }
            self.phase = SweepPhase::Measuring(server_pool_size);

            for &executor in &self.config.executors {
                for &operation in &self.config.operations {
                    for &file_size_mb in &self.config.file_sizes_mb {
                        for &client_pool_size in &self.config.client_pools {
                            let configuration = TestConfiguration {
                                operation,
                                file_size_mb,
                                client_pool_size,
                                server_pool_size,
                                executor,
                            };
                            if let Some(stats) = self.run_stress_test(configuration).await {
                                results.add(stats);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Measure one configuration.
    ///
    /// Returns `None` when the configuration had to be skipped: the local
    /// test file could not be prepared, or download priming failed.
    pub async fn run_stress_test(
        &self,
        configuration: TestConfiguration,
    ) -> Option<TestStatistics> {
        info!("Starting stress test: {}", configuration);

        let test_file = if configuration.operation.uses_test_file() {
            let dir = self.config.testfiles_dir.clone();
            let size_mb = configuration.file_size_mb;
            match tokio::task::spawn_blocking(move || ensure_test_file(&dir, size_mb)).await {
                Ok(Ok(path)) => Some(path),
                Ok(Err(e)) => {
                    error!("Skipping {}: {:#}", configuration, e);
                    return None;
                }
                Err(e) => {
                    error!("Skipping {}: test file task failed: {}", configuration, e);
                    return None;
                }
            }
        } else {
            None
        };

        let job = |worker_id: usize, operation: Operation| WorkerJob {
            worker_id,
            operation,
            server: self.config.server_addr(),
            test_file: test_file.clone(),
            download_dir: self.config.downloads_dir.clone(),
            io_timeout: self.config.io_timeout,
        };

        if configuration.operation == Operation::Download {
            info!("Ensuring test file exists on server for download test");
            let primed = run_worker(&job(0, Operation::Upload)).await;
            if !primed.is_ok() {
                error!(
                    "Upload failed: {}; skipping {}",
                    primed.error.as_deref().unwrap_or("unknown error"),
                    configuration
                );
                return None;
            }
        }

        let jobs: Vec<WorkerJob> = (0..configuration.client_pool_size)
            .map(|worker_id| job(worker_id, configuration.operation))
            .collect();

        let records = match executor_for(configuration.executor) {
            Ok(executor) => self.execute(executor.as_ref(), jobs).await,
            Err(e) => {
                error!("Cannot start {} executor: {:#}", configuration.executor, e);
                jobs.iter()
                    .map(|j| {
                        ResultRecord::failure(
                            j.worker_id,
                            j.operation,
                            0,
                            Duration::ZERO,
                            format!("{:#}", e),
                        )
                    })
                    .collect()
            }
        };

        let stats = TestStatistics::from_records(configuration, &records);
        log_statistics(&stats);
        Some(stats)
    }

    async fn execute(
        &self,
        executor: &dyn WorkerExecutor,
        jobs: Vec<WorkerJob>,
    ) -> Vec<ResultRecord> {
        let expected = jobs.len();
        let records = executor.execute(jobs).await;
        if records.len() != expected {
            warn!(
                "{} executor returned {} records for {} workers",
                executor.kind(),
                records.len(),
                expected
            );
        }
        records
    }
}

fn log_statistics(stats: &TestStatistics) {
    info!(
        "Test complete: {} of {} workers succeeded, {} failed",
        stats.success_count,
        stats.total_workers(),
        stats.fail_count
    );
    info!(
        "Average duration: {:.2}s, Average throughput: {}",
        stats.avg_duration,
        format_rate(stats.avg_throughput)
    );
    if let Some(p) = &stats.percentiles {
        info!(
            "Duration min {} / p50 {} / p95 {} / max {}",
            format_duration(Duration::from_micros(p.min_us)),
            format_duration(Duration::from_micros(p.p50_us)),
            format_duration(Duration::from_micros(p.p95_us)),
            format_duration(Duration::from_micros(p.max_us))
        );
    }
}
