//! Error taxonomy for the wire layer.
//!
//! Codec errors are protocol violations and are always fatal to the stream.
//! `Cancelled` and `Terminated` are recognized peer signals, not failures;
//! callers match on them to unwind a compilation cleanly.

use thiserror::Error;

use super::message::MessageType;
use super::wire::DataKind;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("buffer truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("message too large: max {max} got {got}")]
    Oversized { max: usize, got: usize },
    #[error("too many data points: max {max} got {got}")]
    TooManyPoints { max: usize, got: usize },
    #[error("nesting depth {depth} exceeds limit {max}")]
    DepthExceeded { depth: usize, max: usize },
    #[error("unknown message type code {code}")]
    UnknownMessageType { code: u32 },
    #[error("unknown data kind code {code}")]
    UnknownDataKind { code: u32 },
    #[error("data kind mismatch: expected {expected:?} got {found:?}")]
    Kind { expected: DataKind, found: DataKind },
    #[error("argument count mismatch: message carries {declared}, caller requested {requested}")]
    Arity { declared: usize, requested: usize },
    #[error("declared payload size disagrees with content: declared {declared} walked {walked}")]
    SizeMismatch { declared: usize, walked: usize },
    #[error("frame has {remaining} trailing bytes after the last data point")]
    TrailingBytes { remaining: usize },
    #[error("string payload is not utf-8")]
    BadUtf8,
    #[error("missing value: {what}")]
    MissingValue { what: &'static str },
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("io failure on compile stream: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("reply type mismatch: expected {expected:?} got {found:?}")]
    TypeMismatch {
        expected: Option<MessageType>,
        found: MessageType,
    },
    #[error("protocol version mismatch: ours {ours:#x} peer {theirs:#x}")]
    VersionMismatch { ours: u64, theirs: u64 },
    #[error("compilation aborted by peer")]
    Cancelled,
    #[error("client {client_id} terminated the session")]
    Terminated { client_id: u64 },
}

impl StreamError {
    /// True for the cooperative signals that end an exchange without being
    /// stream failures.
    pub fn is_signal(&self) -> bool {
        matches!(self, StreamError::Cancelled | StreamError::Terminated { .. })
    }
}
