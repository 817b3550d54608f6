//! # Command Processor
//!
//! The processor is the only component shared between connection sessions.
//! Sessions hold it as `Arc<dyn CommandProcessor>` and call it concurrently,
//! so implementations must be `Send + Sync` and must not rely on per-call
//! mutable state.
//!
//! [`FileProtocol`] is the filesystem-backed implementation used by the
//! `file-server` binary: every file lives directly inside one storage
//! directory.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::CommandError;
use crate::protocol::{Command, Response};

/// Executes one decoded command string.
///
/// Failures are reported in the returned [`Response`] (status `ERROR`); a
/// processor never signals failure any other way.
#[async_trait]
pub trait CommandProcessor: Send + Sync {
    async fn process(&self, command: &str) -> Response;
}

/// `LIST` / `UPLOAD` / `GET` over a single storage directory.
#[derive(Debug, Clone)]
pub struct FileProtocol {
    storage_dir: PathBuf,
}

impl FileProtocol {
    /// Create a processor rooted at `storage_dir`, creating it if needed.
    pub fn new(storage_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let storage_dir = storage_dir.into();
        std::fs::create_dir_all(&storage_dir)?;
        Ok(Self { storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    async fn list(&self) -> Response {
        let mut entries = match tokio::fs::read_dir(&self.storage_dir).await {
            Ok(entries) => entries,
            Err(e) => return Response::error(format!("cannot read storage directory: {}", e)),
        };

        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry
                        .file_type()
                        .await
                        .map(|t| t.is_file())
                        .unwrap_or(false);
                    if is_file {
                        names.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
                Ok(None) => break,
                Err(e) => return Response::error(format!("cannot list files: {}", e)),
            }
        }
        names.sort();

        Response::ok_with_data(Value::Array(names.into_iter().map(Value::String).collect()))
    }

    async fn upload(&self, filename: &str, content: &str) -> Response {
        let bytes = match B64.decode(content) {
            Ok(bytes) => bytes,
            Err(e) => return Response::error(format!("invalid base64 content: {}", e)),
        };

        let path = self.storage_dir.join(filename);
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => {
                debug!("Stored {} ({} bytes)", filename, bytes.len());
                Response::ok()
            }
            Err(e) => Response::error(format!("cannot write {}: {}", filename, e)),
        }
    }

    async fn get(&self, filename: &str) -> Response {
        let path = self.storage_dir.join(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Response::ok_with_file(B64.encode(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Response::error(format!("file not found: {}", filename))
            }
            Err(e) => Response::error(format!("cannot read {}: {}", filename, e)),
        }
    }
}

#[async_trait]
impl CommandProcessor for FileProtocol {
    async fn process(&self, command: &str) -> Response {
        let parsed = match Command::parse(command) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Rejected command: {}", e);
                return command_error(e);
            }
        };

        debug!("Processing {} command", parsed.verb());
        match parsed {
            Command::List => self.list().await,
            Command::Upload { filename, content } => self.upload(&filename, &content).await,
            Command::Get { filename } => self.get(&filename).await,
        }
    }
}

fn command_error(error: CommandError) -> Response {
    Response::error(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_get_list() {
        let dir = tempdir().unwrap();
        let processor = FileProtocol::new(dir.path()).unwrap();

        let content = B64.encode(b"hello file server");
        let uploaded = processor
            .process(&format!("UPLOAD greeting.txt {}", content))
            .await;
        assert_eq!(uploaded, Response::ok());

        let fetched = processor.process("GET greeting.txt").await;
        assert!(fetched.is_ok());
        let decoded = B64.decode(fetched.data_file.unwrap()).unwrap();
        assert_eq!(decoded, b"hello file server");

        processor
            .process(&format!("UPLOAD another.bin {}", B64.encode([0u8, 1, 2])))
            .await;
        let listed = processor.process("LIST").await;
        assert_eq!(listed.data, Some(json!(["another.bin", "greeting.txt"])));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error_response() {
        let dir = tempdir().unwrap();
        let processor = FileProtocol::new(dir.path()).unwrap();

        let response = processor.process("GET nowhere.bin").await;
        assert_eq!(response.status, Status::Error);
        assert!(response.error_message().contains("file not found"));
    }

    #[tokio::test]
    async fn test_bad_commands_are_error_responses() {
        let dir = tempdir().unwrap();
        let processor = FileProtocol::new(dir.path()).unwrap();

        for command in ["", "FETCH x", "GET ../secret", "UPLOAD a.bin !!!notbase64"] {
            let response = processor.process(command).await;
            assert_eq!(response.status, Status::Error, "command {:?}", command);
        }
        assert!(!dir.path().join("a.bin").exists());
    }
}
