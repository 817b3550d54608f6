//! # File Server Stress Test Client - Main Entry Point
//!
//! Runs a sweep of upload / download / list configurations against a running
//! `file-server` and writes the CSV and JSON reports.
//!
//! ## Modes
//!
//! - **Sweep / single run** (default): parse options, set up console and
//!   file logging, run the benchmark, write the reports.
//! - **Worker** (`--internal-run-as-worker <job-json>`, hidden): used by the
//!   process executor. Runs one job, prints its result record as a JSON line
//!   on stdout and exits. Logging goes to stderr so stdout carries nothing
//!   else.

use anyhow::Result;
use clap::Parser;
use file_stress::{
    benchmark::{BenchmarkConfig, BenchmarkRunner, NoWait, OperatorPrompt, ReadyGate},
    cli::ClientArgs,
    executor::run_as_worker,
    logging::{init_client_logging, init_worker_logging},
    results::ResultsManager,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ClientArgs::parse();

    if let Some(job_json) = &args.internal_run_as_worker {
        init_worker_logging(args.debug)?;
        return run_as_worker(job_json).await;
    }

    // Held until exit so buffered log lines reach the file.
    let _log_guard = init_client_logging(args.debug, &args.log_file)?;

    info!("Starting File Server Stress Test Client");
    info!("Configuration: {:?}", args);

    let config = BenchmarkConfig::from_args(&args)?;
    std::fs::create_dir_all(&config.testfiles_dir)?;
    std::fs::create_dir_all(&config.downloads_dir)?;

    let gate: Box<dyn ReadyGate> = if args.no_wait {
        Box::new(NoWait)
    } else {
        Box::new(OperatorPrompt)
    };

    let mut results = ResultsManager::new(&args.output_dir);
    let mut runner = BenchmarkRunner::new(config, gate);
    info!(
        "Target server {}, {} configurations planned",
        runner.config().server_addr(),
        runner.config().total_configurations()
    );
    let outcome = runner.run(&mut results).await;

    // Whatever was measured before a failure is still reported.
    let files = results.finalize()?;
    info!("CSV report: {:?}", files.csv);
    info!("JSON report: {:?}", files.json);

    if let Err(e) = outcome {
        error!("Stress test stopped early: {:#}", e);
        return Err(e);
    }

    info!("Stress test completed");
    Ok(())
}
