//! Wire protocol shared by the file server and the stress-test client.
//!
//! Requests are text commands (`LIST`, `UPLOAD <name> <base64>`,
//! `GET <name>`), responses are JSON objects, and both are framed with the
//! `\r\n\r\n` sentinel by [`framing`].

pub mod command;
pub mod framing;
pub mod response;

pub use command::Command;
pub use framing::{decode_stream, encode, read_frame, write_frame, FrameBuffer, SENTINEL};
pub use response::{Response, Status};
