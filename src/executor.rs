//! # Worker Executors
//!
//! An executor launches one batch of worker jobs concurrently and waits for
//! all of them. The batch is the only synchronization point: a worker that
//! fails, panics or whose process dies becomes an `ERROR` record and never
//! cancels its siblings.
//!
//! ## Thread executor
//!
//! Each job runs as a tokio task on the shared runtime.
//!
//! ## Process executor
//!
//! Each job runs in its own child process: the `file-stress` binary started
//! with the hidden `--internal-run-as-worker <job-json>` flag. The child
//! performs the job, prints its [`ResultRecord`] as one JSON line on stdout
//! and exits. Stdout is connected to an `os_pipe` so the parent reads exactly
//! what the child wrote; child logging goes to stderr.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::cli::ExecutorType;
use crate::error::TransferError;
use crate::metrics::ResultRecord;
use crate::worker::{run_worker, WorkerJob};

const WORKER_BINARY: &str = "file-stress";

/// Runs a batch of worker jobs and collects one record per job.
#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    fn kind(&self) -> ExecutorType;

    /// Run every job concurrently and wait for all of them.
    ///
    /// Returns exactly one record per job, in job order.
    async fn execute(&self, jobs: Vec<WorkerJob>) -> Vec<ResultRecord>;
}

/// Build the executor for a concrete (already expanded) type.
pub fn executor_for(kind: ExecutorType) -> Result<Box<dyn WorkerExecutor>> {
    match kind {
        ExecutorType::Thread => Ok(Box::new(ThreadExecutor)),
        ExecutorType::Process => Ok(Box::new(ProcessExecutor::from_current_exe()?)),
        ExecutorType::Both => anyhow::bail!("'both' must be expanded before choosing an executor"),
    }
}

/// Workers as tokio tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadExecutor;

#[async_trait]
impl WorkerExecutor for ThreadExecutor {
    fn kind(&self) -> ExecutorType {
        ExecutorType::Thread
    }

    async fn execute(&self, jobs: Vec<WorkerJob>) -> Vec<ResultRecord> {
        let launched = Instant::now();
        let handles: Vec<(WorkerJob, JoinHandle<ResultRecord>)> = jobs
            .into_iter()
            .map(|job| {
                let task_job = job.clone();
                let handle = tokio::spawn(async move { run_worker(&task_job).await });
                (job, handle)
            })
            .collect();

        let mut records = Vec::with_capacity(handles.len());
        for (job, handle) in handles {
            let record = match handle.await {
                Ok(record) => record,
                Err(e) => {
                    error!("Worker {} task failed: {}", job.worker_id, e);
                    lost_worker(&job, launched.elapsed(), format!("worker task failed: {}", e))
                }
            };
            records.push(record);
        }
        records
    }
}

/// Workers as child processes of the `file-stress` binary.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
}

impl ProcessExecutor {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate the `file-stress` binary.
    ///
    /// Under `cargo test` the current executable is the test harness, not
    /// the application, so resolution tries in order:
    /// 1) the current executable, if its name matches;
    /// 2) `CARGO_BIN_EXE_file-stress`;
    /// 3) `target/debug/file-stress` under the manifest directory.
    pub fn from_current_exe() -> Result<Self> {
        let current_exe =
            std::env::current_exe().context("Failed to get current executable path")?;
        let exe_name = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);

        if current_exe.file_name().and_then(|n| n.to_str()) == Some(exe_name.as_str()) {
            return Ok(Self::with_program(current_exe));
        }

        if let Ok(p) = std::env::var(format!("CARGO_BIN_EXE_{}", WORKER_BINARY)) {
            let path = PathBuf::from(p);
            if path.exists() {
                return Ok(Self::with_program(path));
            }
        }

        let fallback = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("target")
            .join("debug")
            .join(&exe_name);
        if fallback.exists() {
            return Ok(Self::with_program(fallback));
        }

        anyhow::bail!(
            "Could not resolve '{}' binary for the process executor. Build it with \
             `cargo build --bin {}` first.",
            WORKER_BINARY,
            WORKER_BINARY
        )
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Start one child and return a handle that resolves to its record.
    fn spawn_worker(&self, job: &WorkerJob) -> Result<JoinHandle<Result<ResultRecord>>> {
        let job_json = serde_json::to_string(job)?;
        let (mut reader, writer) =
            os_pipe::pipe().context("Failed to create OS pipe for worker output")?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--internal-run-as-worker")
            .arg(job_json)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(Stdio::inherit());
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn worker {} process", job.worker_id))?;
        // The Command still owns the pipe's write end; drop it so the reader
        // sees EOF once the child exits.
        drop(cmd);

        debug!("Worker {} running as pid {}", job.worker_id, child.id());
        Ok(tokio::task::spawn_blocking(move || {
            let mut output = String::new();
            reader
                .read_to_string(&mut output)
                .context("Failed to read worker output")?;
            let status = child.wait().context("Failed to wait for worker process")?;
            parse_worker_output(&output)
                .with_context(|| format!("worker process exited with {}", status))
        }))
    }
}

#[async_trait]
impl WorkerExecutor for ProcessExecutor {
    fn kind(&self) -> ExecutorType {
        ExecutorType::Process
    }

    async fn execute(&self, jobs: Vec<WorkerJob>) -> Vec<ResultRecord> {
        let launched = Instant::now();
        debug!(
            "Launching {} worker processes from {:?}",
            jobs.len(),
            self.program()
        );
        // Every child is started before any is awaited.
        let spawned: Vec<(WorkerJob, Result<JoinHandle<Result<ResultRecord>>>)> = jobs
            .into_iter()
            .map(|job| {
                let handle = self.spawn_worker(&job);
                (job, handle)
            })
            .collect();

        let mut records = Vec::with_capacity(spawned.len());
        for (job, handle) in spawned {
            let outcome = match handle {
                Ok(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(anyhow::anyhow!("worker reader task failed: {}", e)),
                },
                Err(e) => Err(e),
            };

            let record = match outcome {
                Ok(record) => record,
                Err(e) => {
                    error!("Worker {} process failed: {:#}", job.worker_id, e);
                    lost_worker(&job, launched.elapsed(), format!("{:#}", e))
                }
            };
            records.push(record);
        }
        records
    }
}

/// Parse the record a worker child printed; the last non-empty line wins.
pub fn parse_worker_output(output: &str) -> Result<ResultRecord> {
    let line = output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .context("worker produced no result record")?;
    serde_json::from_str(line).context("worker printed an unreadable result record")
}

/// Entry point of a worker child: run the job and print its record.
pub async fn run_as_worker(job_json: &str) -> Result<()> {
    let job: WorkerJob = serde_json::from_str(job_json)
        .map_err(|e| TransferError::InvalidJob(e.to_string()))?;
    let record = run_worker(&job).await;
    println!("{}", serde_json::to_string(&record)?);
    Ok(())
}

/// Record for a worker whose outcome was lost (panic, crash, spawn failure).
fn lost_worker(job: &WorkerJob, elapsed: Duration, error: String) -> ResultRecord {
    ResultRecord::failure(job.worker_id, job.operation, 0, elapsed, error)
}
