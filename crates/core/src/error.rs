//! Error types for the framecast library.

use std::fmt;

/// Errors that can occur in the framecast library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
/// - **Media**: [`Codec`](Self::Codec), [`MuxerNotReady`](Self::MuxerNotReady),
///   [`EncoderUnavailable`](Self::EncoderUnavailable).
/// - **Registry**: [`StreamNotFound`](Self::StreamNotFound).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning),
///   [`InvalidBindAddress`](Self::InvalidBindAddress).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// SETUP named a stream no producer has published.
    #[error("no stream published under name: {0}")]
    StreamNotFound(String),

    /// No encoder factory was installed in the server configuration.
    #[error("no HEVC encoder configured")]
    EncoderUnavailable,

    /// Encoder submission or drain failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// A packet was offered to the muxer before its stream parameters
    /// (VPS/SPS/PPS) were written.
    #[error("muxer header not written (parameter sets missing)")]
    MuxerNotReady,

    /// [`Server::start`](crate::Server::start) rejected the configured address.
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
