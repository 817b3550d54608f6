//! # File Server Stress Test Suite Library
//!
//! A framed-TCP file service and the load harness used to measure it. The
//! server answers three text commands (`LIST`, `UPLOAD`, `GET`) from a bounded
//! pool of connection slots; the client sweeps a matrix of operations, file
//! sizes and concurrency levels against it and reports per-configuration
//! duration and throughput statistics.
//!
//! ## Architecture Overview
//!
//! The library is organized into the following modules:
//!
//! - `protocol`: Sentinel framing, command parsing and the JSON response type
//! - `server`: Connection acceptor, per-connection sessions and the command processor
//! - `worker`: One client operation against the server, producing a `ResultRecord`
//! - `executor`: Runs a batch of workers as tokio tasks or as child processes
//! - `benchmark`: Sweep orchestration, download priming and the operator ready gate
//! - `metrics`: Result records and per-configuration statistics
//! - `results`: CSV and JSON report output
//! - `cli`, `logging`, `utils`: Argument parsing, log setup and formatting helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use file_stress::{
//!     benchmark::{BenchmarkConfig, BenchmarkRunner, NoWait},
//!     cli::{ExecutorType, Operation},
//!     results::ResultsManager,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BenchmarkConfig {
//!         operations: vec![Operation::Upload],
//!         file_sizes_mb: vec![10],
//!         client_pools: vec![4],
//!         executors: vec![ExecutorType::Thread],
//!         ..BenchmarkConfig::default()
//!     };
//!
//!     let mut results = ResultsManager::new(".");
//!     let mut runner = BenchmarkRunner::new(config, Box::new(NoWait));
//!     runner.run(&mut results).await?;
//!     results.finalize()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Model
//!
//! Failures never cross a worker boundary as errors. Every request cycle ends
//! in exactly one `ResultRecord` (status `OK` or `ERROR`), and every server
//! command ends in exactly one JSON response, so a single bad worker or bad
//! command cannot stop a sweep or a server.

/// Sweep orchestration
///
/// Contains `BenchmarkConfig`, `BenchmarkRunner` and the `ReadyGate` used to
/// pause between server pool sizes.
pub mod benchmark;

/// Command-line interface for both binaries
pub mod cli;

/// Typed errors for the request cycle and for command parsing
pub mod error;

/// Worker executors (tokio tasks or child processes)
pub mod executor;

/// Console and file logging setup
pub mod logging;

/// Result records and aggregated statistics
pub mod metrics;

/// Sentinel framing, commands and responses
pub mod protocol;

/// CSV and JSON report output
pub mod results;

/// File server: acceptor, sessions, command processor
pub mod server;

pub mod utils;

/// A single client operation against the server
pub mod worker;

pub use benchmark::{BenchmarkConfig, BenchmarkRunner};
pub use cli::{ClientArgs, ExecutorType, Operation, ServerArgs};
pub use error::{CommandError, TransferError};
pub use metrics::{RecordStatus, ResultRecord, TestConfiguration, TestStatistics};
pub use results::ResultsManager;
pub use server::{CommandProcessor, FileProtocol, FileServer, ServerConfig};

/// The current version of the stress test suite
///
/// Populated from Cargo.toml and written into the JSON report.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Shared by the CLI parsers and the programmatic `Default` impls so the two
/// never drift apart.
pub mod defaults {
    use std::time::Duration;

    /// Port shared by the server and the client.
    pub const PORT: u16 = 6666;

    /// The server listens on every interface.
    pub const SERVER_HOST: &str = "0.0.0.0";

    pub const CLIENT_HOST: &str = "localhost";

    /// Default server worker pool size
    ///
    /// A single slot serializes all clients, which is the baseline every
    /// sweep compares against.
    pub const SERVER_POOL_SIZE: usize = 1;

    /// Kernel listen backlog for the accept socket.
    ///
    /// Clients beyond the pool size wait here, so it must exceed the largest
    /// client pool in a typical sweep.
    pub const LISTEN_BACKLOG: i32 = 128;

    /// Session inactivity timeout (30 minutes)
    pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);

    /// How long a stopping server waits for in-flight sessions
    pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

    /// Bound on each client socket operation (10 minutes)
    ///
    /// Large uploads against a saturated server legitimately wait in the
    /// backlog for a long time.
    pub const WORKER_IO_TIMEOUT: Duration = Duration::from_secs(600);

    pub const FILE_SIZES_MB: [u64; 3] = [10, 50, 100];

    pub const CLIENT_POOLS: [usize; 3] = [1, 5, 10];

    pub const SERVER_POOLS: [usize; 3] = [1, 5, 10];

    /// Where generated test files are kept between runs
    pub const TESTFILES_DIR: &str = "testfiles";

    /// Where downloaded files are written
    pub const DOWNLOADS_DIR: &str = "downloads";

    /// Server-side storage directory
    pub const STORAGE_DIR: &str = "files";

    pub const LOG_FILE: &str = "checking.log";
}
