use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// File Server Stress Test Client - drives the file server with concurrent workers
#[derive(Parser, Debug, Clone)]
#[clap(name = "file-stress", version, about, long_about = None)]
pub struct ClientArgs {
    /// Server host
    #[clap(long, default_value = crate::defaults::CLIENT_HOST, help_heading = "Target")]
    pub host: String,

    /// Server port
    #[clap(long, default_value_t = crate::defaults::PORT, help_heading = "Target")]
    pub port: u16,

    /// Operations to test (space-separated: upload, download, list, or all)
    #[clap(long, value_enum, num_args = 1.., default_values_t = vec![Operation::All], help_heading = "Sweep")]
    pub operation: Vec<Operation>,

    /// File sizes in MB
    #[clap(long, num_args = 1.., default_values_t = crate::defaults::FILE_SIZES_MB.to_vec(), help_heading = "Sweep")]
    pub file_sizes: Vec<u64>,

    /// Client worker pool sizes
    #[clap(long, num_args = 1.., default_values_t = crate::defaults::CLIENT_POOLS.to_vec(), help_heading = "Sweep")]
    pub client_pools: Vec<usize>,

    /// Server worker pool sizes to test against (the server is restarted by hand between them)
    #[clap(long, num_args = 1.., default_values_t = crate::defaults::SERVER_POOLS.to_vec(), help_heading = "Sweep")]
    pub server_pools: Vec<usize>,

    /// Executor type for the client workers
    #[clap(long, value_enum, default_value_t = ExecutorType::Thread, help_heading = "Sweep")]
    pub executor: ExecutorType,

    /// Enable debug logging
    #[clap(long, default_value_t = false)]
    pub debug: bool,

    /// Directory holding generated test files
    #[clap(long, default_value = crate::defaults::TESTFILES_DIR)]
    pub testfiles_dir: PathBuf,

    /// Directory receiving downloaded files
    #[clap(long, default_value = crate::defaults::DOWNLOADS_DIR)]
    pub downloads_dir: PathBuf,

    /// Directory receiving the CSV and JSON reports
    #[clap(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Log file written in addition to the console
    #[clap(long, default_value = crate::defaults::LOG_FILE)]
    pub log_file: PathBuf,

    /// Per-socket-operation timeout in seconds
    #[clap(long, default_value_t = crate::defaults::WORKER_IO_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// Do not wait for operator confirmation between server pool sizes
    #[clap(long, default_value_t = false)]
    pub no_wait: bool,

    /// Run one worker job (JSON) and print its result record to stdout.
    /// Used by the process executor.
    #[clap(long, hide = true)]
    pub internal_run_as_worker: Option<String>,
}

/// File Server - serves LIST / UPLOAD / GET over framed TCP with a bounded worker pool
#[derive(Parser, Debug, Clone)]
#[clap(name = "file-server", version, about, long_about = None)]
pub struct ServerArgs {
    /// Server port
    #[clap(long, default_value_t = crate::defaults::PORT)]
    pub port: u16,

    /// Worker pool size (connections served concurrently)
    #[clap(long, default_value_t = crate::defaults::SERVER_POOL_SIZE)]
    pub pool_size: usize,

    /// Listen address
    #[clap(long, default_value = crate::defaults::SERVER_HOST)]
    pub host: String,

    /// Directory where uploaded files are stored
    #[clap(long, default_value = crate::defaults::STORAGE_DIR)]
    pub storage_dir: PathBuf,

    /// Enable debug logging
    #[clap(long, default_value_t = false)]
    pub debug: bool,
}

/// Benchmark operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Upload a generated test file
    #[clap(name = "upload")]
    Upload,

    /// Download a previously uploaded test file
    #[clap(name = "download")]
    Download,

    /// List files on the server
    #[clap(name = "list")]
    List,

    /// All operations
    #[clap(name = "all")]
    All,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Upload => write!(f, "upload"),
            Operation::Download => write!(f, "download"),
            Operation::List => write!(f, "list"),
            Operation::All => write!(f, "all"),
        }
    }
}

impl Operation {
    /// Expand the "All" variant to list, download, upload
    pub fn expand_all(operations: Vec<Operation>) -> Vec<Operation> {
        if operations.contains(&Operation::All) {
            vec![Operation::List, Operation::Download, Operation::Upload]
        } else {
            operations
        }
    }

    /// Whether this operation needs a local test file.
    pub fn uses_test_file(&self) -> bool {
        matches!(self, Operation::Upload | Operation::Download)
    }
}

/// How the client workers are executed
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorType {
    /// Concurrent tasks sharing this process
    #[clap(name = "thread")]
    Thread,

    /// One isolated child process per worker
    #[clap(name = "process")]
    Process,

    /// Both executors, one after the other
    #[clap(name = "both")]
    Both,
}

impl std::fmt::Display for ExecutorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorType::Thread => write!(f, "thread"),
            ExecutorType::Process => write!(f, "process"),
            ExecutorType::Both => write!(f, "both"),
        }
    }
}

impl ExecutorType {
    /// Expand the "Both" variant to thread, process
    pub fn expand_both(self) -> Vec<ExecutorType> {
        match self {
            ExecutorType::Both => vec![ExecutorType::Thread, ExecutorType::Process],
            other => vec![other],
        }
    }
}
