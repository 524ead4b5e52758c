//! zogg - An Ogg container library written in Rust
//!
//! zogg frames packets into the Ogg bitstream format and recovers them
//! again, handling multiplexed logical streams, page checksums, and
//! resynchronization after corruption.
//!
//! # Architecture
//!
//! zogg is organized into several key modules:
//!
//! - `page`: Page structures and wire serialization
//! - `packet`: The packet type callers produce and consume
//! - `muxer`: Packet-to-page framing across logical streams
//! - `demuxer`: Page capture, validation, and packet reassembly
//! - `segment`: Lacing arithmetic shared by both directions
//! - `crc`: The Ogg CRC-32 checksum
//! - `opus`: Opus encapsulation headers and a write-side adapter
//! - `probe`: Whole-file inspection and stream summaries

pub mod crc;
pub mod demuxer;
pub mod error;
pub mod muxer;
pub mod opus;
pub mod packet;
pub mod page;
pub mod probe;
pub mod segment;

pub use demuxer::{DemuxEvent, Demuxer, PageOut, PageReader};
pub use error::{Anomaly, Error, Result};
pub use muxer::{Muxer, MuxerConfig};
pub use packet::{Packet, NO_GRANULE};
pub use page::{Page, PageHeader};

/// zogg version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Configuration for the zogg library
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

/// Initialize the zogg library with the given configuration
pub fn init(config: Config) -> Result<()> {
    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt().with_env_filter(level).init();
    }
    Ok(())
}
