//! Page writer and stream multiplexer
//!
//! The muxer turns submitted packets into a physical Ogg byte stream. Each
//! logical stream (keyed by serial number) accumulates segmented packet data
//! into a pending page; pages are written to the sink when the segment table
//! fills, when the body reaches the configured size target, when a packet
//! flagged `eos` arrives, or on an explicit flush.
//!
//! Within a logical stream packets are never reordered and pages carry
//! strictly increasing sequence numbers. Across streams, pages appear in
//! submission order, which is what makes interleaved (multiplexed) output
//! work: each stream's pages are self-contained and tagged with its serial.

use crate::error::{Error, Result};
use crate::packet::{Packet, NO_GRANULE};
use crate::page::{flags, Page, PageHeader, MAX_BODY_SIZE, MAX_SEGMENTS};
use crate::segment;
use std::collections::HashMap;
use std::io::Write;
use tracing::{debug, trace};

/// Muxer tuning knobs
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Emit a page once its body holds at least this many bytes. Lower
    /// values reduce latency, higher values reduce header overhead. 0
    /// disables the target so pages fill to the 255-segment cap; values
    /// above the cap are clamped to it.
    pub page_size_target: usize,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        MuxerConfig {
            page_size_target: 4096,
        }
    }
}

impl MuxerConfig {
    fn effective_target(&self) -> usize {
        self.page_size_target.min(MAX_BODY_SIZE)
    }
}

/// Per-stream page assembly state
#[derive(Debug)]
struct StreamWriter {
    serial: u32,
    /// Sequence number the pending page will carry
    sequence: u32,
    /// Packets accepted so far
    packet_number: u64,
    /// Lacing values of the pending page
    segment_table: Vec<u8>,
    /// Body bytes of the pending page
    body: Vec<u8>,
    /// Granule position of the last packet completed in the pending page
    page_granule: i64,
    /// Pending page opens mid-packet
    continued: bool,
    /// An eos packet was accepted; the stream takes no more input
    eos_seen: bool,
}

impl StreamWriter {
    fn new(serial: u32) -> Self {
        StreamWriter {
            serial,
            sequence: 0,
            packet_number: 0,
            segment_table: Vec::new(),
            body: Vec::new(),
            page_granule: NO_GRANULE,
            continued: false,
            eos_seen: false,
        }
    }

    /// Detach the pending page and reset for the next one.
    fn take_page(&mut self, eos: bool) -> Page {
        let mut header_type = 0u8;
        if self.continued {
            header_type |= flags::CONTINUED;
        }
        if self.sequence == 0 {
            header_type |= flags::BOS;
        }
        if eos {
            header_type |= flags::EOS;
        }

        let segment_table = std::mem::take(&mut self.segment_table);
        let body = std::mem::take(&mut self.body);
        // a page ending on a 255 lacing value hands its packet to the next one
        self.continued = segment_table.last() == Some(&255);

        let header = PageHeader {
            header_type,
            granule_position: self.page_granule,
            serial: self.serial,
            sequence: self.sequence,
            checksum: 0,
            segment_table,
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.page_granule = NO_GRANULE;
        Page { header, body }
    }
}

/// Ogg page writer over any [`Write`] sink.
///
/// Streams open implicitly on the first `submit_packet` for a new serial
/// (or explicitly via [`Muxer::allocate_serial`]); the first page written for
/// a stream carries the BOS flag and the page flushed by an `eos` packet
/// carries the EOS flag. Submitting to a stream after its `eos` packet, or
/// to a closed muxer, fails with [`Error::StreamClosed`].
pub struct Muxer<W: Write> {
    sink: W,
    config: MuxerConfig,
    streams: HashMap<u32, StreamWriter>,
    next_serial: u32,
    closed: bool,
}

impl<W: Write> Muxer<W> {
    /// Create a muxer with the default configuration
    pub fn new(sink: W) -> Self {
        Muxer::with_config(sink, MuxerConfig::default())
    }

    /// Create a muxer with an explicit configuration
    pub fn with_config(sink: W, config: MuxerConfig) -> Self {
        Muxer {
            sink,
            config,
            streams: HashMap::new(),
            next_serial: 0,
            closed: false,
        }
    }

    /// Hand out a serial number no open stream is using
    pub fn allocate_serial(&mut self) -> u32 {
        let mut serial = self.next_serial;
        while self.streams.contains_key(&serial) {
            serial = serial.wrapping_add(1);
        }
        self.next_serial = serial.wrapping_add(1);
        serial
    }

    /// Append a packet to the logical stream `serial`.
    ///
    /// The packet is segmented into the stream's pending page, spilling onto
    /// follow-on pages (flagged `continued`) whenever the segment table
    /// fills. Pages ready per the configuration are written to the sink
    /// before this returns; an `eos` packet flushes everything pending for
    /// the stream.
    pub fn submit_packet(&mut self, serial: u32, packet: Packet) -> Result<()> {
        if self.closed {
            return Err(Error::StreamClosed { serial });
        }
        let target = self.config.effective_target();
        let stream = self.streams.entry(serial).or_insert_with(|| {
            debug!("logical stream {} opened", serial);
            StreamWriter::new(serial)
        });
        if stream.eos_seen {
            return Err(Error::StreamClosed { serial });
        }

        let lacing = segment::lacing_values(packet.len());
        let mut offset = 0usize;
        for &value in &lacing {
            let full = stream.segment_table.len() == MAX_SEGMENTS
                || (target > 0 && stream.body.len() >= target);
            if full {
                let page = stream.take_page(false);
                write_page(&mut self.sink, page)?;
            }
            stream.segment_table.push(value);
            let len = value as usize;
            stream.body.extend_from_slice(&packet.data[offset..offset + len]);
            offset += len;
        }

        // the packet's terminating segment sits in the pending page, so the
        // pending page's granule is now this packet's
        stream.page_granule = packet.granule_position;
        stream.packet_number += 1;
        trace!(
            "packet {} on stream {}: {} bytes, granule {}",
            stream.packet_number - 1,
            serial,
            packet.len(),
            packet.granule_position
        );

        if packet.eos {
            stream.eos_seen = true;
            let packets = stream.packet_number;
            let page = stream.take_page(true);
            write_page(&mut self.sink, page)?;
            debug!("logical stream {} ended after {} packets", serial, packets);
        } else if stream.segment_table.len() == MAX_SEGMENTS
            || (target > 0 && stream.body.len() >= target)
        {
            let page = stream.take_page(false);
            write_page(&mut self.sink, page)?;
        }
        Ok(())
    }

    /// Write out the pending page of one stream even if it is not full.
    ///
    /// Header packets are flushed this way so they land on their own pages
    /// instead of waiting for following data. A stream with nothing pending
    /// (or an unknown serial) is a no-op.
    pub fn flush_stream(&mut self, serial: u32) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(stream) = self.streams.get_mut(&serial) {
            if !stream.segment_table.is_empty() {
                let page = stream.take_page(false);
                write_page(&mut self.sink, page)?;
            }
        }
        Ok(())
    }

    /// Write out the pending pages of every stream, in ascending serial order
    pub fn flush(&mut self) -> Result<()> {
        let mut serials: Vec<u32> = self.streams.keys().copied().collect();
        serials.sort_unstable();
        for serial in serials {
            self.flush_stream(serial)?;
        }
        Ok(())
    }

    /// Flush everything and refuse further submissions
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.sink.flush()?;
        self.closed = true;
        Ok(())
    }

    /// Borrow the underlying sink
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Consume the muxer and hand back the sink
    pub fn into_inner(self) -> W {
        self.sink
    }
}

fn write_page<W: Write>(sink: &mut W, page: Page) -> Result<()> {
    trace!(
        "page out: serial={} seq={} segments={} body={} flags={:#04x}",
        page.header.serial,
        page.header.sequence,
        page.header.segment_table.len(),
        page.body.len(),
        page.header.header_type
    );
    sink.write_all(&page.into_bytes())?;
    Ok(())
}
