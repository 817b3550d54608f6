//! Typed errors for the two protocol boundaries.
//!
//! [`TransferError`] covers one client request cycle (connect, send, receive,
//! decode). The benchmark worker never lets it escape: it is rendered into the
//! `error` field of an ERROR result record.
//!
//! [`CommandError`] covers parsing and validating a command on the server.
//! It is turned into a `{"status":"ERROR"}` response and never closes the
//! connection.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single request/response cycle against the file server.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("connection refused by {addr}. Is the server running?")]
    ConnectionRefused { addr: String },

    #[error("timed out after {after:?} while {during}")]
    Timeout {
        after: Duration,
        during: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream before the sentinel arrived.
    #[error("connection closed before a complete frame arrived ({received} bytes pending)")]
    IncompleteFrame { received: usize },

    #[error("malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    /// The server answered with `{"status":"ERROR"}`.
    #[error("server reported an error: {0}")]
    Rejected(String),

    #[error("invalid worker job: {0}")]
    InvalidJob(String),
}

/// A command string the processor cannot execute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    UnknownVerb(String),

    #[error("missing argument <{0}>")]
    MissingArgument(&'static str),

    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),
}
