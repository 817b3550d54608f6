//! # Benchmark Worker
//!
//! A worker performs exactly one operation against the file server over a
//! fresh connection and reports it as a [`ResultRecord`]. It never returns
//! an error: refused connections, timeouts, truncated frames, undecodable
//! responses and server-side `ERROR` statuses all become `ERROR` records
//! carrying the time spent up to the failure.
//!
//! ## Timing
//!
//! The clock starts just before the request is written and stops once the
//! full response has arrived. Reading and base64-encoding the upload source,
//! and decoding and persisting a download, happen outside the measured window.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::cli::Operation;
use crate::error::TransferError;
use crate::metrics::ResultRecord;
use crate::protocol::{read_frame, write_frame, Command, FrameBuffer, Response};
use crate::utils::{download_path, format_bytes, format_duration, format_rate};

/// Everything a worker needs, serializable so it can be handed to a child
/// process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerJob {
    pub worker_id: usize,
    pub operation: Operation,
    /// `host:port` of the file server.
    pub server: String,
    /// Local source for uploads; its file name is what downloads fetch.
    pub test_file: Option<PathBuf>,
    pub download_dir: PathBuf,
    pub io_timeout: Duration,
}

/// Send one command over a new connection and return the parsed response.
///
/// Connect, write and each read are individually bounded by `io_timeout`.
/// A response with status `ERROR` is returned as-is; see [`request`] for the
/// variant that treats it as a failure.
pub async fn send_command(
    server: &str,
    command: &[u8],
    io_timeout: Duration,
) -> Result<Response, TransferError> {
    let connect_started = Instant::now();
    let mut stream = match timeout(io_timeout, TcpStream::connect(server)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
            return Err(TransferError::ConnectionRefused {
                addr: server.to_string(),
            })
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(TransferError::Timeout {
                after: io_timeout,
                during: "connecting",
            })
        }
    };
    debug!(
        "Connection established in {}",
        format_duration(connect_started.elapsed())
    );
    stream.set_nodelay(true)?;

    write_frame(&mut stream, command, io_timeout).await?;

    let mut frames = FrameBuffer::new();
    let payload = read_frame(&mut stream, &mut frames, io_timeout).await?;
    Ok(Response::from_bytes(&payload)?)
}

/// Like [`send_command`], but an `ERROR` response becomes
/// [`TransferError::Rejected`].
pub async fn request(
    server: &str,
    command: &Command,
    io_timeout: Duration,
) -> Result<Response, TransferError> {
    let response = send_command(server, command.to_line().as_bytes(), io_timeout).await?;
    if response.is_ok() {
        Ok(response)
    } else {
        Err(TransferError::Rejected(response.error_message()))
    }
}

/// Run one job to completion. Always yields a record.
pub async fn run_worker(job: &WorkerJob) -> ResultRecord {
    let record = match job.operation {
        Operation::List => remote_list(job).await,
        Operation::Upload => remote_upload(job).await,
        Operation::Download => remote_download(job).await,
        Operation::All => ResultRecord::failure(
            job.worker_id,
            job.operation,
            0,
            Duration::ZERO,
            TransferError::InvalidJob("'all' must be expanded before dispatch".to_string())
                .to_string(),
        ),
    };

    if let Some(e) = &record.error {
        error!(
            "Worker {}: {} failed after {}: {}",
            job.worker_id,
            job.operation,
            format_duration(record.duration),
            e
        );
    }
    record
}

async fn remote_list(job: &WorkerJob) -> ResultRecord {
    let start = Instant::now();
    let outcome = request(&job.server, &Command::List, job.io_timeout).await;
    let duration = start.elapsed();

    match outcome {
        Ok(response) => {
            let file_count = match &response.data {
                Some(serde_json::Value::Array(names)) => names.len(),
                _ => 0,
            };
            info!(
                "Worker {}: List successful - {} files in {}",
                job.worker_id,
                file_count,
                format_duration(duration)
            );
            ResultRecord::success(job.worker_id, Operation::List, 0, duration)
        }
        Err(e) => {
            ResultRecord::failure(job.worker_id, Operation::List, 0, duration, e.to_string())
        }
    }
}

async fn remote_upload(job: &WorkerJob) -> ResultRecord {
    let path = match test_file(job) {
        Ok(path) => path,
        Err(e) => {
            return ResultRecord::failure(
                job.worker_id,
                Operation::Upload,
                0,
                Duration::ZERO,
                e.to_string(),
            )
        }
    };
    let filename = file_name_of(path);

    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) => {
            return ResultRecord::failure(
                job.worker_id,
                Operation::Upload,
                0,
                Duration::ZERO,
                format!("cannot read {:?}: {}", path, e),
            )
        }
    };
    let file_size = content.len() as u64;
    info!(
        "Worker {}: Starting upload of {} ({})",
        job.worker_id,
        filename,
        format_bytes(file_size)
    );

    let command = Command::Upload {
        filename: filename.clone(),
        content: B64.encode(&content),
    };
    drop(content);

    let start = Instant::now();
    let outcome = request(&job.server, &command, job.io_timeout).await;
    let duration = start.elapsed();

    match outcome {
        Ok(_) => {
            let record =
                ResultRecord::success(job.worker_id, Operation::Upload, file_size, duration);
            info!(
                "Worker {}: Upload successful - {} ({}) in {} - {}",
                job.worker_id,
                filename,
                format_bytes(file_size),
                format_duration(duration),
                format_rate(record.throughput)
            );
            record
        }
        Err(e) => ResultRecord::failure(
            job.worker_id,
            Operation::Upload,
            file_size,
            duration,
            e.to_string(),
        ),
    }
}

async fn remote_download(job: &WorkerJob) -> ResultRecord {
    let filename = match test_file(job) {
        Ok(path) => file_name_of(path),
        Err(e) => {
            return ResultRecord::failure(
                job.worker_id,
                Operation::Download,
                0,
                Duration::ZERO,
                e.to_string(),
            )
        }
    };
    info!("Worker {}: Starting download of {}", job.worker_id, filename);

    let command = Command::Get {
        filename: filename.clone(),
    };
    let start = Instant::now();
    let outcome = request(&job.server, &command, job.io_timeout).await;
    let duration = start.elapsed();

    let saved = match outcome {
        Ok(response) => persist_download(job, &filename, response).await,
        Err(e) => Err(e),
    };

    match saved {
        Ok(file_size) => {
            let record =
                ResultRecord::success(job.worker_id, Operation::Download, file_size, duration);
            info!(
                "Worker {}: Download successful - {} ({}) in {} - {}",
                job.worker_id,
                filename,
                format_bytes(file_size),
                format_duration(duration),
                format_rate(record.throughput)
            );
            record
        }
        Err(e) => ResultRecord::failure(
            job.worker_id,
            Operation::Download,
            0,
            duration,
            e.to_string(),
        ),
    }
}

/// Decode the `data_file` payload and write it to the worker's download path.
async fn persist_download(
    job: &WorkerJob,
    filename: &str,
    response: Response,
) -> Result<u64, TransferError> {
    let encoded = response.data_file.ok_or_else(|| {
        TransferError::Rejected("response carries no data_file".to_string())
    })?;
    let content = B64.decode(encoded)?;

    tokio::fs::create_dir_all(&job.download_dir).await?;
    let target = download_path(&job.download_dir, job.worker_id, filename);
    tokio::fs::write(&target, &content).await?;
    debug!("Worker {}: saved {:?}", job.worker_id, target);

    Ok(content.len() as u64)
}

fn test_file(job: &WorkerJob) -> Result<&Path, TransferError> {
    job.test_file.as_deref().ok_or_else(|| {
        TransferError::InvalidJob(format!("{} job without a test file", job.operation))
    })
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordStatus;
    use crate::server::{FileProtocol, FileServer, ServerConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn job(
        server: String,
        operation: Operation,
        test_file: Option<PathBuf>,
        download_dir: &Path,
    ) -> WorkerJob {
        WorkerJob {
            worker_id: 1,
            operation,
            server,
            test_file,
            download_dir: download_dir.to_path_buf(),
            io_timeout: Duration::from_secs(5),
        }
    }

    /// Start a server on an ephemeral port; it runs until the test ends.
    async fn spawn_server(storage: &Path) -> String {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            pool_size: 4,
            ..ServerConfig::default()
        };
        let processor = Arc::new(FileProtocol::new(storage).unwrap());
        let server = FileServer::bind(config, processor).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.run_until(std::future::pending()));
        addr
    }

    /// An address nothing listens on.
    async fn dead_address() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_refused_connection_is_an_error_record() {
        let dir = tempdir().unwrap();
        let list = job(dead_address().await, Operation::List, None, dir.path());
        let record = run_worker(&list).await;

        assert_eq!(record.status, RecordStatus::Error);
        assert_eq!(record.throughput, 0.0);
        assert!(record.error.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let storage = tempdir().unwrap();
        let local = tempdir().unwrap();
        let addr = spawn_server(storage.path()).await;

        let source = local.path().join("payload.bin");
        std::fs::write(&source, vec![7u8; 4096]).unwrap();

        let upload = job(addr.clone(), Operation::Upload, Some(source.clone()), local.path());
        let uploaded = run_worker(&upload).await;
        assert!(uploaded.is_ok(), "{:?}", uploaded.error);
        assert_eq!(uploaded.file_size, 4096);
        assert_eq!(std::fs::read(storage.path().join("payload.bin")).unwrap().len(), 4096);

        let download = job(addr.clone(), Operation::Download, Some(source), local.path());
        let downloaded = run_worker(&download).await;
        assert!(downloaded.is_ok(), "{:?}", downloaded.error);
        assert_eq!(downloaded.file_size, 4096);
        let saved = std::fs::read(local.path().join("worker1_payload.bin")).unwrap();
        assert_eq!(saved, vec![7u8; 4096]);

        let listed = run_worker(&job(addr, Operation::List, None, local.path())).await;
        assert!(listed.is_ok());
        assert_eq!(listed.file_size, 0);
    }

    #[tokio::test]
    async fn test_download_of_missing_file_fails() {
        let storage = tempdir().unwrap();
        let local = tempdir().unwrap();
        let addr = spawn_server(storage.path()).await;

        let record = run_worker(&job(
            addr,
            Operation::Download,
            Some(PathBuf::from("absent.bin")),
            local.path(),
        ))
        .await;
        assert_eq!(record.status, RecordStatus::Error);
        assert_eq!(record.file_size, 0);
        assert!(record.error.unwrap().contains("file not found"));
    }

    #[tokio::test]
    async fn test_upload_without_test_file() {
        let dir = tempdir().unwrap();
        let upload = job(dead_address().await, Operation::Upload, None, dir.path());
        let record = run_worker(&upload).await;
        assert_eq!(record.status, RecordStatus::Error);
        assert!(record.error.unwrap().contains("without a test file"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out_as_error_record() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // Reads the command and never answers.
        let silent = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut socket, &mut sink).await;
        });

        let dir = tempdir().unwrap();
        let mut list = job(addr, Operation::List, None, dir.path());
        list.io_timeout = Duration::from_millis(300);
        let record = run_worker(&list).await;

        assert_eq!(record.status, RecordStatus::Error);
        assert_eq!(record.throughput, 0.0);
        assert!(record.duration >= Duration::from_millis(300));
        assert!(record.duration < Duration::from_secs(5));
        assert!(record.error.unwrap().contains("timed out"));
        silent.abort();
    }

    #[tokio::test]
    async fn test_truncated_response_is_an_error_record() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
            // Half a JSON body, no sentinel, then close.
            let _ = tokio::io::AsyncWriteExt::write_all(&mut socket, b"{\"status\": \"OK").await;
        });

        let dir = tempdir().unwrap();
        let record = run_worker(&job(addr, Operation::List, None, dir.path())).await;

        assert_eq!(record.status, RecordStatus::Error);
        assert_eq!(record.throughput, 0.0);
        assert!(record.duration < Duration::from_secs(5));
        assert!(record.error.unwrap().contains("connection closed"));
    }
}
