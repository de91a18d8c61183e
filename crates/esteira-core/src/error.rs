use crate::api::SqsApiError;

/// Configuration errors, raised before any connection is attempted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by `SqsReader::read`.
///
/// `EndOfInput` is the orderly end of the stream (soft stop fired or the
/// hand-off channel closed). `Cancelled` means the read was short-circuited
/// by a malformed message and the caller should simply read again.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("reader is not connected")]
    NotConnected,

    #[error("end of input")]
    EndOfInput,

    #[error("read cancelled")]
    Cancelled,
}

/// Errors surfaced when resolving an `Acker`.
///
/// Only the direct shutdown-time flush can fail; the normal path hands the
/// message off to the ack loop, which logs per-entry failures itself.
#[derive(Debug, thiserror::Error)]
pub enum AckError {
    #[error(transparent)]
    Api(#[from] SqsApiError),
}

/// Errors surfaced by `SqsReader::close`.
#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    #[error("shutdown deadline exceeded")]
    DeadlineExceeded,
}
