//! Error types for zogg

use thiserror::Error;

/// Result type alias for zogg operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors.
///
/// Everything recoverable about a damaged bitstream is an [`Anomaly`]
/// delivered through the demuxer's event stream instead; an `Error` means
/// the current call cannot proceed.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the underlying sink or source
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Submission to a logical stream that already ended, or to a closed
    /// muxer
    #[error("Stream {serial} is closed")]
    StreamClosed { serial: u32 },

    /// Malformed codec-level packet contents
    #[error("Bad packet: {0}")]
    BadPacket(String),

    /// Probe-level failure such as report serialization
    #[error("Probe error: {0}")]
    Probe(String),
}

impl Error {
    /// Create a bad-packet error
    pub fn bad_packet<S: Into<String>>(msg: S) -> Self {
        Error::BadPacket(msg.into())
    }
}

/// Non-fatal bitstream diagnostics.
///
/// An anomaly reports damage in the incoming byte stream. The reader has
/// already recovered (resynchronized, dropped the unusable bytes) by the time
/// one is returned, and no anomaly on one logical stream disturbs any other.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// Capture pattern or version byte invalid where a page was expected;
    /// `offset` is the absolute input position of the bad bytes
    #[error("Malformed page header at input offset {offset}")]
    MalformedHeader { offset: u64 },

    /// Page checksum did not match; the page was discarded
    #[error("Checksum mismatch on stream {serial} page {sequence}")]
    ChecksumMismatch { serial: u32, sequence: u32 },

    /// Page sequence numbers skipped; pages were lost in transit
    #[error("Stream {serial} skipped from page {expected} to {got}")]
    SequenceGap { serial: u32, expected: u32, got: u32 },

    /// Continuation flags disagree with reassembly state; the partial
    /// packet was dropped
    #[error("Stream {serial} lost packet continuity")]
    Desync { serial: u32 },

    /// Input ended before the stream's final packet
    #[error("Stream {serial} ended without an EOS packet")]
    TruncatedStream { serial: u32 },
}
