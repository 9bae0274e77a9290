//! Per-packet error taxonomy. Every variant is isolated to the datagram that
//! produced it; only the socket bind at startup is allowed to be fatal.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: {0} bytes, need at least 12")]
    TooShort(usize),

    #[error("unsupported question count: {0}")]
    UnsupportedQuestionCount(u16),

    /// A label length byte would read past the end of the buffer, or the
    /// qtype/qclass tail is missing.
    #[error("malformed question section")]
    MalformedQuestion,
}

#[derive(Debug, Error)]
#[error("instance address '{0}' is not a usable ip address")]
pub struct EncodeError(pub String);

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("backend i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
}

/// Everything that can go wrong while serving a single datagram.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("malformed query: {0}")]
    MalformedQuery(#[from] DecodeError),

    #[error("answer encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
