//! Page reader, packet reassembler, and stream demultiplexer
//!
//! Two layers share this module. [`PageReader`] turns an arbitrarily-chunked
//! byte stream into validated pages: it scans for the capture pattern,
//! verifies headers and checksums, and resynchronizes past damage.
//! [`Demuxer`] sits on top, groups pages by serial number, reassembles
//! packets that span page boundaries, and reports stream lifecycle and
//! damage through [`DemuxEvent`]s.
//!
//! Both layers are pull-based: push input whenever it arrives, then pull
//! until the layer asks for more data. The unconsumed remainder is retained
//! internally, so feeding input one byte at a time behaves identically to
//! feeding it whole.

use crate::crc;
use crate::error::Anomaly;
use crate::packet::{Packet, NO_GRANULE};
use crate::page::{Page, PageHeader, CAPTURE_PATTERN, CHECKSUM_OFFSET, HEADER_SIZE};
use bytes::Bytes;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

/// Result of one [`PageReader::next_page`] pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOut {
    /// A validated page
    Page(Page),
    /// Not enough input buffered; push more and pull again
    NeedData,
    /// Damage was found and skipped; pulling again may yield a page
    Anomaly(Anomaly),
}

/// Scanning page parser over a pushed byte stream.
///
/// The reader expects a page wherever the last one ended. Where that
/// expectation fails it reports one anomaly for the spot, then quietly scans
/// forward for the next capture pattern; input that never contains a capture
/// pattern drains to [`PageOut::NeedData`] without complaint.
#[derive(Debug, Default)]
pub struct PageReader {
    buf: Vec<u8>,
    /// Absolute input offset of `buf[0]`
    consumed: u64,
    /// `buf[0]` is where the next page should start
    at_boundary: bool,
    eof: bool,
}

impl PageReader {
    pub fn new() -> Self {
        PageReader {
            buf: Vec::new(),
            consumed: 0,
            at_boundary: true,
            eof: false,
        }
    }

    /// Append input bytes. Any chunking is legal, single bytes included.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mark the input as exhausted: buffered bytes that cannot form a page
    /// will never be completed and may be discarded.
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Total bytes consumed from the input so far
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Pull the next page out of the buffered input.
    pub fn next_page(&mut self) -> PageOut {
        loop {
            if !self.at_boundary {
                // resynchronize: quietly skip to the next capture candidate
                match find_capture(&self.buf) {
                    Some(pos) => {
                        self.skip(pos);
                        self.at_boundary = true;
                    }
                    None => {
                        let keep = if self.eof {
                            0
                        } else {
                            capture_prefix_len(&self.buf)
                        };
                        let drop = self.buf.len() - keep;
                        self.skip(drop);
                        return PageOut::NeedData;
                    }
                }
            }

            if self.buf.len() < CAPTURE_PATTERN.len() {
                if CAPTURE_PATTERN.starts_with(&self.buf) {
                    return PageOut::NeedData;
                }
                let offset = self.consumed;
                warn!("lost page sync at input offset {}", offset);
                self.at_boundary = false;
                return PageOut::Anomaly(Anomaly::MalformedHeader { offset });
            }
            if self.buf[0..4] != CAPTURE_PATTERN {
                let offset = self.consumed;
                warn!("lost page sync at input offset {}", offset);
                self.at_boundary = false;
                return PageOut::Anomaly(Anomaly::MalformedHeader { offset });
            }

            if self.buf.len() < HEADER_SIZE {
                return PageOut::NeedData;
            }
            let segments = self.buf[26] as usize;
            let header_len = HEADER_SIZE + segments;
            if self.buf.len() < header_len {
                return PageOut::NeedData;
            }
            let body_len: usize = self.buf[HEADER_SIZE..header_len]
                .iter()
                .map(|&v| v as usize)
                .sum();
            let total = header_len + body_len;
            if self.buf.len() < total {
                return PageOut::NeedData;
            }

            let header = match PageHeader::from_bytes(&self.buf[..header_len]) {
                Ok(header) => header,
                Err(reason) => {
                    let offset = self.consumed;
                    warn!("bad page header at input offset {}: {}", offset, reason);
                    // resume scanning one byte past this capture match
                    self.skip(1);
                    self.at_boundary = false;
                    return PageOut::Anomaly(Anomaly::MalformedHeader { offset });
                }
            };

            // the stored checksum is computed with its own field zeroed
            let mut checksum = crc::update(0, &self.buf[..CHECKSUM_OFFSET]);
            checksum = crc::update(checksum, &[0u8; 4]);
            checksum = crc::update(checksum, &self.buf[CHECKSUM_OFFSET + 4..total]);
            if checksum != header.checksum {
                warn!(
                    "checksum mismatch on stream {} page {}, resynchronizing",
                    header.serial, header.sequence
                );
                let anomaly = Anomaly::ChecksumMismatch {
                    serial: header.serial,
                    sequence: header.sequence,
                };
                self.skip(1);
                self.at_boundary = false;
                return PageOut::Anomaly(anomaly);
            }

            let body = self.buf[header_len..total].to_vec();
            self.skip(total);
            trace!(
                "page in: serial={} seq={} segments={} body={}",
                header.serial,
                header.sequence,
                segments,
                body.len()
            );
            return PageOut::Page(Page { header, body });
        }
    }

    fn skip(&mut self, count: usize) {
        self.buf.drain(..count);
        self.consumed += count as u64;
    }
}

fn find_capture(buf: &[u8]) -> Option<usize> {
    buf.windows(CAPTURE_PATTERN.len())
        .position(|window| window == CAPTURE_PATTERN)
}

/// Longest buffer suffix that could still grow into a capture pattern
fn capture_prefix_len(buf: &[u8]) -> usize {
    for keep in (1..CAPTURE_PATTERN.len()).rev() {
        if buf.len() >= keep && buf[buf.len() - keep..] == CAPTURE_PATTERN[..keep] {
            return keep;
        }
    }
    0
}

/// Consumer-facing demultiplexer events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    /// First page of a logical stream arrived
    StreamBegin { serial: u32 },
    /// A packet was fully reassembled
    Packet { serial: u32, packet: Packet },
    /// The logical stream's final page was processed
    StreamEnd { serial: u32 },
    /// Damage was detected and skipped
    Anomaly(Anomaly),
}

/// Per-serial reassembly state
#[derive(Debug)]
struct LogicalStream {
    /// Last seen page sequence number; the first page is the baseline
    sequence: Option<u32>,
    /// Packet bytes carried over from previous pages
    partial: Vec<u8>,
    /// The last lacing value seen was 255
    mid_packet: bool,
    /// Discarding a packet whose start was never seen; holds until a
    /// lacing value below 255 consumes its tail
    skipping: bool,
    /// Granule position exposed to packets that complete before the last
    /// one on a page
    last_granule: i64,
    /// Next packet number to assign
    packet_number: u64,
    /// The first completed packet still needs its bos flag
    bos_pending: bool,
    /// EOS page processed; the stream takes no more pages
    ended: bool,
}

impl LogicalStream {
    fn new(bos: bool) -> Self {
        LogicalStream {
            sequence: None,
            partial: Vec::new(),
            mid_packet: false,
            skipping: false,
            last_granule: NO_GRANULE,
            packet_number: 0,
            bos_pending: bos,
            ended: false,
        }
    }
}

/// Stream demultiplexer and packet reassembler.
///
/// Owns a [`PageReader`] plus per-serial reassembly state. Push bytes with
/// [`Demuxer::push`], pull events with [`Demuxer::next_event`] until it
/// returns `None`, repeat; call [`Demuxer::finish`] once the input is over
/// to flush remaining events and learn which streams never ended.
#[derive(Debug, Default)]
pub struct Demuxer {
    reader: PageReader,
    streams: HashMap<u32, LogicalStream>,
    /// Serials in first-seen order
    order: Vec<u32>,
    pending: VecDeque<DemuxEvent>,
    finished: bool,
}

impl Demuxer {
    pub fn new() -> Self {
        Demuxer {
            reader: PageReader::new(),
            streams: HashMap::new(),
            order: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Append input bytes
    pub fn push(&mut self, data: &[u8]) {
        self.reader.push(data);
    }

    /// Pull the next event; `None` means push more input (or finish)
    pub fn next_event(&mut self) -> Option<DemuxEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            match self.reader.next_page() {
                PageOut::Page(page) => self.ingest_page(page),
                PageOut::Anomaly(anomaly) => return Some(DemuxEvent::Anomaly(anomaly)),
                PageOut::NeedData => return None,
            }
        }
    }

    /// Declare the input complete.
    ///
    /// Drains every event still reconstructable from buffered input, then
    /// reports a [`Anomaly::TruncatedStream`] for each stream whose EOS
    /// never arrived. Packets fully received are never dropped.
    pub fn finish(&mut self) -> Vec<DemuxEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.reader.set_eof();
        while let Some(event) = self.next_event() {
            events.push(event);
        }
        for &serial in &self.order {
            if let Some(stream) = self.streams.get(&serial) {
                if !stream.ended {
                    warn!("stream {} truncated: input ended before EOS", serial);
                    events.push(DemuxEvent::Anomaly(Anomaly::TruncatedStream { serial }));
                }
            }
        }
        self.finished = true;
        events
    }

    /// Serial numbers seen so far, in order of first appearance
    pub fn streams(&self) -> &[u32] {
        &self.order
    }

    fn ingest_page(&mut self, page: Page) {
        let serial = page.header.serial;
        let header = &page.header;

        let stream = match self.streams.entry(serial) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!("logical stream {} began", serial);
                self.order.push(serial);
                self.pending.push_back(DemuxEvent::StreamBegin { serial });
                entry.insert(LogicalStream::new(page.is_bos()))
            }
        };
        if stream.ended {
            warn!(
                "stream {} received page {} after EOS, ignoring",
                serial, header.sequence
            );
            return;
        }

        // sequence continuity; a packet split across the gap is gone
        if let Some(prev) = stream.sequence {
            let expected = prev.wrapping_add(1);
            if header.sequence != expected {
                warn!(
                    "stream {} skipped from page {} to {}",
                    serial, expected, header.sequence
                );
                self.pending.push_back(DemuxEvent::Anomaly(Anomaly::SequenceGap {
                    serial,
                    expected,
                    got: header.sequence,
                }));
                if stream.mid_packet {
                    if !stream.skipping {
                        self.pending
                            .push_back(DemuxEvent::Anomaly(Anomaly::Desync { serial }));
                    }
                    stream.partial.clear();
                    stream.mid_packet = false;
                    // a continued lead-in belongs to the lost packet
                    stream.skipping = page.is_continued();
                }
            }
        }
        stream.sequence = Some(header.sequence);

        // continuation flags must agree with reassembly state; a drop in
        // progress stays quiet until the dropped packet's tail is consumed
        let mut skipping = stream.skipping;
        if page.is_continued() {
            if skipping {
                // already reported; keep dropping
            } else if stream.mid_packet {
                // expected continuation
            } else {
                warn!(
                    "stream {} page {} continues a packet that never started",
                    serial, header.sequence
                );
                self.pending
                    .push_back(DemuxEvent::Anomaly(Anomaly::Desync { serial }));
                skipping = true;
            }
        } else {
            if stream.mid_packet {
                if !skipping {
                    warn!(
                        "stream {} page {} starts fresh while a packet was in progress",
                        serial, header.sequence
                    );
                    self.pending
                        .push_back(DemuxEvent::Anomaly(Anomaly::Desync { serial }));
                }
                stream.partial.clear();
                stream.mid_packet = false;
            }
            // a fresh page boundary cancels any drop still pending
            skipping = false;
        }

        // walk the segment table; a lacing value below 255 ends a packet
        let mut completed: Vec<Vec<u8>> = Vec::new();
        let mut offset = 0usize;
        for &value in &header.segment_table {
            let len = value as usize;
            let chunk = &page.body[offset..offset + len];
            offset += len;
            if skipping {
                if value < 255 {
                    // the lost packet's tail is fully consumed
                    skipping = false;
                }
                continue;
            }
            stream.partial.extend_from_slice(chunk);
            if value < 255 {
                completed.push(std::mem::take(&mut stream.partial));
            }
        }
        if let Some(&last) = header.segment_table.last() {
            stream.mid_packet = last == 255;
        }
        stream.skipping = skipping;

        // only the last packet completed on a page takes the page's granule
        // position; earlier ones repeat the stream's prior known value
        let count = completed.len();
        let page_eos = page.is_eos();
        for (index, data) in completed.into_iter().enumerate() {
            let last_in_page = index + 1 == count;
            let packet = Packet {
                data: Bytes::from(data),
                granule_position: if last_in_page {
                    header.granule_position
                } else {
                    stream.last_granule
                },
                packet_number: stream.packet_number,
                bos: stream.bos_pending,
                eos: page_eos && last_in_page && !stream.mid_packet,
            };
            stream.bos_pending = false;
            stream.packet_number += 1;
            self.pending.push_back(DemuxEvent::Packet { serial, packet });
        }
        if count > 0 {
            stream.last_granule = header.granule_position;
        }

        if page_eos {
            if stream.mid_packet {
                if !stream.skipping {
                    warn!(
                        "stream {} ended mid-packet, dropping {} buffered bytes",
                        serial,
                        stream.partial.len()
                    );
                    self.pending
                        .push_back(DemuxEvent::Anomaly(Anomaly::Desync { serial }));
                }
                stream.partial.clear();
                stream.mid_packet = false;
                stream.skipping = false;
            }
            stream.ended = true;
            debug!("logical stream {} ended", serial);
            self.pending.push_back(DemuxEvent::StreamEnd { serial });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::muxer::{Muxer, MuxerConfig};
    use crate::page::flags;

    fn page_bytes(
        serial: u32,
        sequence: u32,
        header_type: u8,
        granule: i64,
        segment_table: Vec<u8>,
        body: Vec<u8>,
    ) -> Vec<u8> {
        Page {
            header: PageHeader {
                header_type,
                granule_position: granule,
                serial,
                sequence,
                checksum: 0,
                segment_table,
            },
            body,
        }
        .into_bytes()
    }

    fn collect(demuxer: &mut Demuxer) -> Vec<DemuxEvent> {
        let mut events = Vec::new();
        while let Some(event) = demuxer.next_event() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_reader_single_page() {
        let bytes = page_bytes(7, 0, flags::BOS, 3, vec![5], b"hello".to_vec());
        let mut reader = PageReader::new();
        reader.push(&bytes);

        match reader.next_page() {
            PageOut::Page(page) => {
                assert_eq!(page.header.serial, 7);
                assert_eq!(page.body, b"hello");
                assert!(page.is_bos());
            }
            other => panic!("expected a page, got {:?}", other),
        }
        assert_eq!(reader.next_page(), PageOut::NeedData);
        assert_eq!(reader.bytes_consumed(), bytes.len() as u64);
    }

    #[test]
    fn test_reader_byte_at_a_time() {
        let bytes = page_bytes(7, 0, 0, -1, vec![3], b"abc".to_vec());
        let mut reader = PageReader::new();
        let mut pages = 0;
        for &byte in &bytes {
            reader.push(&[byte]);
            match reader.next_page() {
                PageOut::Page(_) => pages += 1,
                PageOut::NeedData => {}
                PageOut::Anomaly(a) => panic!("unexpected anomaly {:?}", a),
            }
        }
        assert_eq!(pages, 1);
    }

    #[test]
    fn test_reader_garbage_then_page() {
        let bytes = page_bytes(7, 0, 0, -1, vec![2], b"ok".to_vec());
        let mut reader = PageReader::new();
        reader.push(b"\x01\x02junk");
        reader.push(&bytes);

        // garbage where the first page was expected
        assert_eq!(
            reader.next_page(),
            PageOut::Anomaly(Anomaly::MalformedHeader { offset: 0 })
        );
        // the scan locks onto the real page
        match reader.next_page() {
            PageOut::Page(page) => assert_eq!(page.body, b"ok"),
            other => panic!("expected a page, got {:?}", other),
        }
    }

    #[test]
    fn test_reader_trailing_garbage_is_quiet_after_anomaly() {
        let mut reader = PageReader::new();
        let bytes = page_bytes(7, 0, 0, -1, vec![2], b"ok".to_vec());
        reader.push(&bytes);
        assert!(matches!(reader.next_page(), PageOut::Page(_)));

        reader.push(b"trailing noise with no capture");
        // one anomaly for the failed boundary expectation
        assert!(matches!(reader.next_page(), PageOut::Anomaly(_)));
        // after that the scan consumes garbage quietly
        assert_eq!(reader.next_page(), PageOut::NeedData);
        reader.push(b"more of the same");
        assert_eq!(reader.next_page(), PageOut::NeedData);
    }

    #[test]
    fn test_reader_bad_version() {
        let mut bytes = page_bytes(7, 0, 0, -1, vec![1], vec![9]);
        bytes[4] = 3;
        let mut reader = PageReader::new();
        reader.push(&bytes);

        assert_eq!(
            reader.next_page(),
            PageOut::Anomaly(Anomaly::MalformedHeader { offset: 0 })
        );
        assert_eq!(reader.next_page(), PageOut::NeedData);
    }

    #[test]
    fn test_reader_checksum_mismatch_then_resync() {
        let mut first = page_bytes(7, 0, flags::BOS, -1, vec![4], b"data".to_vec());
        let second = page_bytes(7, 1, 0, 4, vec![4], b"more".to_vec());
        let len = first.len();
        first[len - 2] ^= 0x20; // flip one body bit
        first.extend_from_slice(&second);

        let mut reader = PageReader::new();
        reader.push(&first);
        assert_eq!(
            reader.next_page(),
            PageOut::Anomaly(Anomaly::ChecksumMismatch {
                serial: 7,
                sequence: 0
            })
        );
        match reader.next_page() {
            PageOut::Page(page) => assert_eq!(page.header.sequence, 1),
            other => panic!("expected the second page, got {:?}", other),
        }
    }

    #[test]
    fn test_demux_single_stream_lifecycle() {
        let mut muxer = Muxer::new(Vec::new());
        muxer
            .submit_packet(42, Packet::first(&b"head"[..]).with_granule(0))
            .unwrap();
        muxer
            .submit_packet(42, Packet::last(&b"tail"[..]).with_granule(100))
            .unwrap();
        let bytes = muxer.into_inner();

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let mut events = collect(&mut demuxer);
        events.extend(demuxer.finish());

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], DemuxEvent::StreamBegin { serial: 42 });
        match &events[1] {
            DemuxEvent::Packet { serial: 42, packet } => {
                assert_eq!(&packet.data[..], b"head");
                assert!(packet.bos);
                assert!(!packet.eos);
                assert_eq!(packet.packet_number, 0);
            }
            other => panic!("expected packet, got {:?}", other),
        }
        match &events[2] {
            DemuxEvent::Packet { serial: 42, packet } => {
                assert_eq!(&packet.data[..], b"tail");
                assert!(!packet.bos);
                assert!(packet.eos);
                assert_eq!(packet.granule_position, 100);
                assert_eq!(packet.packet_number, 1);
            }
            other => panic!("expected packet, got {:?}", other),
        }
        assert_eq!(events[3], DemuxEvent::StreamEnd { serial: 42 });
        assert_eq!(demuxer.streams(), &[42]);
    }

    #[test]
    fn test_demux_packet_spanning_pages() {
        let mut muxer = Muxer::with_config(Vec::new(), MuxerConfig { page_size_target: 0 });
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut packet = Packet::first(payload.clone());
        packet.eos = true;
        muxer.submit_packet(1, packet).unwrap();

        let mut demuxer = Demuxer::new();
        demuxer.push(&muxer.into_inner());
        let events = collect(&mut demuxer);

        let packets: Vec<&Packet> = events
            .iter()
            .filter_map(|event| match event {
                DemuxEvent::Packet { packet, .. } => Some(packet),
                _ => None,
            })
            .collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data.len(), payload.len());
        assert_eq!(&packets[0].data[..], &payload[..]);
        assert!(packets[0].bos);
        assert!(packets[0].eos);
    }

    #[test]
    fn test_demux_granule_exposure_within_page() {
        // two packets on one page: the page granule belongs to the second
        let mut body = b"aaaa".to_vec();
        body.extend_from_slice(b"bb");
        let bytes = page_bytes(9, 0, flags::BOS, 500, vec![4, 2], body);

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let events = collect(&mut demuxer);

        let granules: Vec<i64> = events
            .iter()
            .filter_map(|event| match event {
                DemuxEvent::Packet { packet, .. } => Some(packet.granule_position),
                _ => None,
            })
            .collect();
        assert_eq!(granules, vec![NO_GRANULE, 500]);
    }

    #[test]
    fn test_demux_sequence_gap_reported() {
        let mut bytes = page_bytes(5, 0, flags::BOS, 1, vec![1], vec![b'a']);
        bytes.extend_from_slice(&page_bytes(5, 3, 0, 2, vec![1], vec![b'b']));

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let events = collect(&mut demuxer);

        assert!(events.contains(&DemuxEvent::Anomaly(Anomaly::SequenceGap {
            serial: 5,
            expected: 1,
            got: 3,
        })));
        // both self-contained packets still come through
        let payloads: Vec<&[u8]> = events
            .iter()
            .filter_map(|event| match event {
                DemuxEvent::Packet { packet, .. } => Some(&packet.data[..]),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![b"a".as_ref(), b"b".as_ref()]);
    }

    #[test]
    fn test_demux_gap_drops_split_packet() {
        // page 0 ends mid-packet, page 1 (which carried the tail) is lost,
        // page 2 starts a fresh packet
        let mut bytes = page_bytes(5, 0, flags::BOS, -1, vec![255], vec![1u8; 255]);
        bytes.extend_from_slice(&page_bytes(5, 2, 0, 9, vec![2], b"ok".to_vec()));

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let events = collect(&mut demuxer);

        assert!(events.contains(&DemuxEvent::Anomaly(Anomaly::SequenceGap {
            serial: 5,
            expected: 1,
            got: 2,
        })));
        assert!(events.contains(&DemuxEvent::Anomaly(Anomaly::Desync { serial: 5 })));
        let payloads: Vec<&[u8]> = events
            .iter()
            .filter_map(|event| match event {
                DemuxEvent::Packet { packet, .. } => Some(&packet.data[..]),
                _ => None,
            })
            .collect();
        // the split packet is gone, the fresh one survives
        assert_eq!(payloads, vec![b"ok".as_ref()]);
    }

    #[test]
    fn test_demux_continued_without_progress() {
        // a continued page arrives for a brand new stream
        let bytes = page_bytes(
            5,
            0,
            flags::BOS | flags::CONTINUED,
            7,
            vec![3, 2],
            b"xyzok".to_vec(),
        );

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let events = collect(&mut demuxer);

        assert!(events.contains(&DemuxEvent::Anomaly(Anomaly::Desync { serial: 5 })));
        // the orphaned lead-in is dropped, reassembly resumes after it
        let payloads: Vec<&[u8]> = events
            .iter()
            .filter_map(|event| match event {
                DemuxEvent::Packet { packet, .. } => Some(&packet.data[..]),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![b"ok".as_ref()]);
    }

    #[test]
    fn test_demux_orphan_spanning_whole_page_stays_dropped() {
        // the orphaned packet's tail fills one page end to end, then closes
        // on the next; none of its bytes may surface as a packet
        let mut bytes = page_bytes(5, 10, flags::CONTINUED, -1, vec![255], vec![0xAA; 255]);
        bytes.extend_from_slice(&page_bytes(5, 11, flags::CONTINUED, 7, vec![10], vec![0xBB; 10]));

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let events = collect(&mut demuxer);

        assert!(!events
            .iter()
            .any(|event| matches!(event, DemuxEvent::Packet { .. })));
        // one desync covers the whole orphan
        let desyncs = events
            .iter()
            .filter(|event| matches!(event, DemuxEvent::Anomaly(Anomaly::Desync { serial: 5 })))
            .count();
        assert_eq!(desyncs, 1);
    }

    #[test]
    fn test_demux_reassembly_resumes_after_multi_page_orphan() {
        let mut bytes = page_bytes(5, 10, flags::CONTINUED, -1, vec![255], vec![0xAA; 255]);
        let mut body = vec![0xBB; 10];
        body.extend_from_slice(b"fresh");
        bytes.extend_from_slice(&page_bytes(5, 11, flags::CONTINUED, 7, vec![10, 5], body));

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let events = collect(&mut demuxer);

        // the orphan tail is consumed, the packet behind it is intact
        let payloads: Vec<&[u8]> = events
            .iter()
            .filter_map(|event| match event {
                DemuxEvent::Packet { packet, .. } => Some(&packet.data[..]),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![b"fresh".as_ref()]);
    }

    #[test]
    fn test_demux_mid_stream_join_sets_baseline() {
        // joining a live stream: first seen page has a nonzero sequence
        let bytes = page_bytes(5, 17, 0, 9, vec![2], b"hi".to_vec());

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let events = collect(&mut demuxer);

        assert!(events
            .iter()
            .all(|event| !matches!(event, DemuxEvent::Anomaly(_))));
        match &events[1] {
            DemuxEvent::Packet { packet, .. } => assert!(!packet.bos),
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_finish_reports_truncated_stream() {
        let mut muxer = Muxer::new(Vec::new());
        muxer
            .submit_packet(3, Packet::first(&b"only"[..]))
            .unwrap();
        muxer.flush().unwrap();

        let mut demuxer = Demuxer::new();
        demuxer.push(&muxer.into_inner());
        let mut events = collect(&mut demuxer);
        events.extend(demuxer.finish());

        // the complete packet is delivered before the truncation report
        assert!(events.iter().any(|event| matches!(
            event,
            DemuxEvent::Packet { serial: 3, .. }
        )));
        assert!(events.contains(&DemuxEvent::Anomaly(Anomaly::TruncatedStream { serial: 3 })));
        // finishing twice does not repeat the report
        assert!(demuxer.finish().is_empty());
    }

    #[test]
    fn test_pages_after_eos_are_ignored() {
        let mut bytes = page_bytes(5, 0, flags::BOS | flags::EOS, 1, vec![1], vec![b'a']);
        bytes.extend_from_slice(&page_bytes(5, 1, 0, 2, vec![1], vec![b'b']));

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let events = collect(&mut demuxer);

        let ends = events
            .iter()
            .filter(|event| matches!(event, DemuxEvent::StreamEnd { .. }))
            .count();
        assert_eq!(ends, 1);
        let packets = events
            .iter()
            .filter(|event| matches!(event, DemuxEvent::Packet { .. }))
            .count();
        assert_eq!(packets, 1);
    }

    #[test]
    fn test_streams_in_first_seen_order() {
        let mut bytes = page_bytes(30, 0, flags::BOS, -1, vec![1], vec![b'x']);
        bytes.extend_from_slice(&page_bytes(10, 0, flags::BOS, -1, vec![1], vec![b'y']));
        bytes.extend_from_slice(&page_bytes(20, 0, flags::BOS, -1, vec![1], vec![b'z']));

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        collect(&mut demuxer);
        assert_eq!(demuxer.streams(), &[30, 10, 20]);
    }
}
