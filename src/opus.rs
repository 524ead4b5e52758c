//! Opus stream encapsulation (RFC 7845)
//!
//! Builds and parses the two Opus identification packets and drives a
//! [`Muxer`] with correctly framed, granule-stamped audio packets. No audio
//! coding happens here; frames arrive already compressed.
//!
//! Granule positions for Opus always tick at 48 kHz regardless of the input
//! sample rate, and the identification headers travel on their own pages
//! ahead of any audio.

use crate::error::{Error, Result};
use crate::muxer::Muxer;
use crate::packet::Packet;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use std::io::Write;
use tracing::debug;

/// Magic opening an identification header packet
pub const OPUS_HEAD_MAGIC: [u8; 8] = *b"OpusHead";

/// Magic opening a comment header packet
pub const OPUS_TAGS_MAGIC: [u8; 8] = *b"OpusTags";

/// Sample rates libopus accepts
pub const VALID_RATES: [u32; 5] = [8000, 12_000, 16_000, 24_000, 48_000];

/// Recommended pre-skip: 80 ms of 48 kHz samples
const DEFAULT_PRE_SKIP: u16 = 3840;

/// Serialized OpusHead length
const OPUS_HEAD_LEN: usize = 19;

/// Identification header ("OpusHead") contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusHead {
    /// Encapsulation version; 1 on the wire, high nibble 0 accepted
    pub version: u8,
    /// Output channel count, never 0
    pub channels: u8,
    /// Samples (at 48 kHz) a decoder discards before playback
    pub pre_skip: u16,
    /// Sample rate of the original input, informational only
    pub input_sample_rate: u32,
    /// Q7.8 output gain, usually 0
    pub output_gain: i16,
    /// Channel mapping family; 0 covers mono and stereo
    pub mapping_family: u8,
}

impl OpusHead {
    /// Create a header with the recommended defaults
    pub fn new(channels: u8, input_sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(Error::bad_packet("OpusHead channel count cannot be 0"));
        }
        Ok(OpusHead {
            version: 1,
            channels,
            pre_skip: DEFAULT_PRE_SKIP,
            input_sample_rate,
            output_gain: 0,
            mapping_family: 0,
        })
    }

    /// Serialize to the 19-byte wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OPUS_HEAD_LEN);
        out.extend_from_slice(&OPUS_HEAD_MAGIC);
        out.push(self.version);
        out.push(self.channels);
        out.extend_from_slice(&self.pre_skip.to_le_bytes());
        out.extend_from_slice(&self.input_sample_rate.to_le_bytes());
        out.extend_from_slice(&self.output_gain.to_le_bytes());
        out.push(self.mapping_family);
        out
    }

    /// Parse an identification packet
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < OPUS_HEAD_LEN {
            return Err(Error::bad_packet("OpusHead packet too short"));
        }
        if data[0..8] != OPUS_HEAD_MAGIC {
            return Err(Error::bad_packet("OpusHead magic missing"));
        }
        let version = data[8];
        if version >> 4 != 0 {
            return Err(Error::bad_packet(format!(
                "unsupported OpusHead version {}",
                version
            )));
        }
        let channels = data[9];
        if channels == 0 {
            return Err(Error::bad_packet("OpusHead channel count cannot be 0"));
        }
        Ok(OpusHead {
            version,
            channels,
            pre_skip: LittleEndian::read_u16(&data[10..12]),
            input_sample_rate: LittleEndian::read_u32(&data[12..16]),
            output_gain: LittleEndian::read_i16(&data[16..18]),
            mapping_family: data[18],
        })
    }
}

/// Comment header ("OpusTags") contents.
///
/// Comments are `KEY=value` pairs. The serialized form ends with a 0xFF
/// framing byte, which the parser tolerates missing; comment text is decoded
/// lossily so one odd tag cannot fail a whole parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusTags {
    pub vendor: String,
    pub comments: Vec<(String, String)>,
}

impl Default for OpusTags {
    fn default() -> Self {
        OpusTags {
            vendor: concat!("zogg ", env!("CARGO_PKG_VERSION")).to_string(),
            comments: Vec::new(),
        }
    }
}

impl OpusTags {
    /// Append a `KEY=value` comment, builder style
    pub fn with_comment<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.comments.push((key.into(), value.into()));
        self
    }

    /// Serialize to wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&OPUS_TAGS_MAGIC);
        out.extend_from_slice(&(self.vendor.len() as u32).to_le_bytes());
        out.extend_from_slice(self.vendor.as_bytes());
        out.extend_from_slice(&(self.comments.len() as u32).to_le_bytes());
        for (key, value) in &self.comments {
            let comment = format!("{}={}", key, value);
            out.extend_from_slice(&(comment.len() as u32).to_le_bytes());
            out.extend_from_slice(comment.as_bytes());
        }
        out.push(0xFF);
        out
    }

    /// Parse a comment packet
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 || data[0..8] != OPUS_TAGS_MAGIC {
            return Err(Error::bad_packet("OpusTags magic missing"));
        }
        let mut cursor = 8usize;
        let vendor = read_block(data, &mut cursor)
            .ok_or_else(|| Error::bad_packet("OpusTags vendor string truncated"))?;
        let vendor = String::from_utf8_lossy(vendor).into_owned();

        if data.len() < cursor + 4 {
            return Err(Error::bad_packet("OpusTags comment count truncated"));
        }
        let count = LittleEndian::read_u32(&data[cursor..cursor + 4]);
        cursor += 4;

        let mut comments = Vec::new();
        for _ in 0..count {
            let comment = read_block(data, &mut cursor)
                .ok_or_else(|| Error::bad_packet("OpusTags comment truncated"))?;
            let comment = String::from_utf8_lossy(comment);
            match comment.split_once('=') {
                Some((key, value)) => comments.push((key.to_string(), value.to_string())),
                None => comments.push((comment.into_owned(), String::new())),
            }
        }
        Ok(OpusTags { vendor, comments })
    }
}

/// Read a u32-length-prefixed block, advancing the cursor
fn read_block<'a>(data: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    if data.len() < *cursor + 4 {
        return None;
    }
    let len = LittleEndian::read_u32(&data[*cursor..*cursor + 4]) as usize;
    *cursor += 4;
    if data.len() < *cursor + len {
        return None;
    }
    let block = &data[*cursor..*cursor + len];
    *cursor += len;
    Some(block)
}

/// Whether a packet payload is an identification header
pub fn is_opus_head(data: &[u8]) -> bool {
    data.len() >= 8 && data[0..8] == OPUS_HEAD_MAGIC
}

/// Whether a packet payload is a comment header
pub fn is_opus_tags(data: &[u8]) -> bool {
    data.len() >= 8 && data[0..8] == OPUS_TAGS_MAGIC
}

/// Write-side adapter framing pre-compressed Opus frames into one logical
/// stream of a [`Muxer`].
///
/// Headers are written lazily ahead of the first frame, each flushed onto
/// its own page. The most recent audio packet is held back so the final one
/// can be marked EOS when [`OpusStream::finish`] runs; dropping the adapter
/// without finishing leaves the stream unterminated.
pub struct OpusStream<'a, W: Write> {
    muxer: &'a mut Muxer<W>,
    serial: u32,
    head: OpusHead,
    tags: OpusTags,
    granule_position: i64,
    headers_written: bool,
    held: Option<Packet>,
    finished: bool,
}

impl<'a, W: Write> OpusStream<'a, W> {
    /// Open an Opus stream on a fresh serial with default tags
    pub fn new(muxer: &'a mut Muxer<W>, channels: u8, rate: u32) -> Result<Self> {
        OpusStream::with_tags(muxer, channels, rate, OpusTags::default())
    }

    /// Open an Opus stream with explicit comment tags
    pub fn with_tags(
        muxer: &'a mut Muxer<W>,
        channels: u8,
        rate: u32,
        tags: OpusTags,
    ) -> Result<Self> {
        if !VALID_RATES.contains(&rate) {
            return Err(Error::bad_packet(format!(
                "sample rate {} is not valid, expected one of {:?}",
                rate, VALID_RATES
            )));
        }
        let head = OpusHead::new(channels, rate)?;
        let serial = muxer.allocate_serial();
        Ok(OpusStream {
            muxer,
            serial,
            head,
            tags,
            granule_position: 0,
            headers_written: false,
            held: None,
            finished: false,
        })
    }

    /// Serial number of the logical stream this adapter writes
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Submit one compressed frame of `frame_size` samples (at the input
    /// rate). The frame may not reach the sink until the next call or
    /// [`OpusStream::finish`].
    pub fn write_frame<B: Into<Bytes>>(&mut self, frame: B, frame_size: u32) -> Result<()> {
        if self.finished {
            return Err(Error::StreamClosed {
                serial: self.serial,
            });
        }
        self.ensure_headers()?;
        if let Some(previous) = self.held.take() {
            self.muxer.submit_packet(self.serial, previous)?;
        }
        // granule positions tick at 48 kHz whatever the input rate
        self.granule_position +=
            i64::from(frame_size) * 48_000 / i64::from(self.head.input_sample_rate);
        self.held = Some(Packet::new(frame).with_granule(self.granule_position));
        Ok(())
    }

    /// Mark the held-back final frame EOS and flush the stream.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.ensure_headers()?;
        let mut last = self
            .held
            .take()
            .unwrap_or_else(|| Packet::new(Bytes::new()).with_granule(self.granule_position));
        last.eos = true;
        self.muxer.submit_packet(self.serial, last)?;
        self.finished = true;
        Ok(())
    }

    fn ensure_headers(&mut self) -> Result<()> {
        if self.headers_written {
            return Ok(());
        }
        let head = Packet::first(self.head.to_bytes());
        self.muxer.submit_packet(self.serial, head)?;
        self.muxer.flush_stream(self.serial)?;

        let tags = Packet::new(self.tags.to_bytes());
        self.muxer.submit_packet(self.serial, tags)?;
        self.muxer.flush_stream(self.serial)?;

        self.headers_written = true;
        debug!("opus stream {} headers written", self.serial);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demuxer::{DemuxEvent, Demuxer};

    #[test]
    fn test_opus_head_wire_layout() {
        let head = OpusHead::new(2, 48_000).unwrap();
        let bytes = head.to_bytes();
        assert_eq!(bytes.len(), OPUS_HEAD_LEN);
        assert_eq!(&bytes[0..8], b"OpusHead");
        assert_eq!(bytes[8], 1); // version
        assert_eq!(bytes[9], 2); // channels
        assert_eq!(&bytes[10..12], &[0x00, 0x0F]); // pre-skip 3840
        assert_eq!(&bytes[12..16], &[0x80, 0xBB, 0x00, 0x00]); // 48000
        assert_eq!(&bytes[16..18], &[0x00, 0x00]); // gain
        assert_eq!(bytes[18], 0); // mapping family
    }

    #[test]
    fn test_opus_head_parse_round_trip() {
        let head = OpusHead::new(1, 16_000).unwrap();
        let parsed = OpusHead::parse(&head.to_bytes()).unwrap();
        assert_eq!(parsed, head);
    }

    #[test]
    fn test_opus_head_parse_rejects_damage() {
        assert!(OpusHead::parse(b"OpusHead").is_err());
        assert!(OpusHead::parse(b"NotOpus!\x01\x02\x00\x0f\x80\xbb\x00\x00\x00\x00\x00").is_err());

        let mut bytes = OpusHead::new(2, 48_000).unwrap().to_bytes();
        bytes[8] = 0x21; // major version 2
        assert!(OpusHead::parse(&bytes).is_err());

        let mut bytes = OpusHead::new(2, 48_000).unwrap().to_bytes();
        bytes[9] = 0; // zero channels
        assert!(OpusHead::parse(&bytes).is_err());
    }

    #[test]
    fn test_opus_head_rejects_zero_channels() {
        assert!(OpusHead::new(0, 48_000).is_err());
    }

    #[test]
    fn test_opus_tags_round_trip() {
        let tags = OpusTags::default()
            .with_comment("TITLE", "field recording")
            .with_comment("ARTIST", "nobody");
        let bytes = tags.to_bytes();
        assert_eq!(&bytes[0..8], b"OpusTags");
        assert_eq!(*bytes.last().unwrap(), 0xFF);

        let parsed = OpusTags::parse(&bytes).unwrap();
        assert_eq!(parsed, tags);
    }

    #[test]
    fn test_opus_tags_parse_without_framing_byte() {
        let tags = OpusTags::default().with_comment("TITLE", "x");
        let mut bytes = tags.to_bytes();
        bytes.pop();
        let parsed = OpusTags::parse(&bytes).unwrap();
        assert_eq!(parsed.comments, tags.comments);
    }

    #[test]
    fn test_opus_tags_parse_rejects_truncation() {
        let bytes = OpusTags::default().to_bytes();
        assert!(OpusTags::parse(&bytes[..10]).is_err());
        assert!(OpusTags::parse(b"OpusTags").is_err());
    }

    #[test]
    fn test_stream_rejects_invalid_rate() {
        let mut muxer = Muxer::new(Vec::new());
        let err = OpusStream::new(&mut muxer, 2, 44_100);
        assert!(matches!(err, Err(Error::BadPacket(_))));
    }

    #[test]
    fn test_stream_end_to_end() {
        let mut muxer = Muxer::new(Vec::new());
        {
            let mut opus = OpusStream::new(&mut muxer, 2, 48_000).unwrap();
            for _ in 0..3 {
                opus.write_frame(vec![0u8; 120], 960).unwrap();
            }
            opus.finish().unwrap();
        }
        let bytes = muxer.into_inner();

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let mut packets = Vec::new();
        while let Some(event) = demuxer.next_event() {
            if let DemuxEvent::Packet { packet, .. } = event {
                packets.push(packet);
            }
        }

        assert_eq!(packets.len(), 5);
        assert!(is_opus_head(&packets[0].data));
        assert!(packets[0].bos);
        assert!(is_opus_tags(&packets[1].data));

        let head = OpusHead::parse(&packets[0].data).unwrap();
        assert_eq!(head.channels, 2);
        assert_eq!(head.input_sample_rate, 48_000);

        // the final audio frame carries EOS and the full 48 kHz granule
        let last = &packets[4];
        assert!(last.eos);
        assert_eq!(last.granule_position, 2880);
    }

    #[test]
    fn test_stream_scales_granules_to_48khz() {
        let mut muxer = Muxer::new(Vec::new());
        {
            // 160 samples at 8 kHz is 20 ms, i.e. 960 samples at 48 kHz
            let mut opus = OpusStream::new(&mut muxer, 1, 8000).unwrap();
            opus.write_frame(vec![1u8; 10], 160).unwrap();
            opus.write_frame(vec![2u8; 10], 160).unwrap();
            opus.finish().unwrap();
        }
        let bytes = muxer.into_inner();

        let mut demuxer = Demuxer::new();
        demuxer.push(&bytes);
        let mut last_granule = 0;
        while let Some(event) = demuxer.next_event() {
            if let DemuxEvent::Packet { packet, .. } = event {
                if packet.eos {
                    last_granule = packet.granule_position;
                }
            }
        }
        assert_eq!(last_granule, 1920);
    }

    #[test]
    fn test_headers_land_on_their_own_pages() {
        let mut muxer = Muxer::new(Vec::new());
        {
            let mut opus = OpusStream::new(&mut muxer, 2, 48_000).unwrap();
            opus.write_frame(vec![0u8; 50], 960).unwrap();
            opus.finish().unwrap();
        }
        let bytes = muxer.into_inner();

        // first page: OpusHead alone, flagged BOS
        let header = crate::page::PageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.segment_table, vec![OPUS_HEAD_LEN as u8]);
        assert_ne!(header.header_type & crate::page::flags::BOS, 0);
        let body_start = header.size();
        assert!(is_opus_head(&bytes[body_start..body_start + OPUS_HEAD_LEN]));

        // second page: OpusTags alone
        let second_start = body_start + header.body_len();
        let second = crate::page::PageHeader::from_bytes(&bytes[second_start..]).unwrap();
        assert_eq!(second.segment_table.len(), 1);
        let tags_start = second_start + second.size();
        assert!(is_opus_tags(&bytes[tags_start..tags_start + 8]));
    }

    #[test]
    fn test_write_after_finish_is_rejected() {
        let mut muxer = Muxer::new(Vec::new());
        let mut opus = OpusStream::new(&mut muxer, 2, 48_000).unwrap();
        opus.write_frame(vec![0u8; 10], 960).unwrap();
        opus.finish().unwrap();

        let err = opus.write_frame(vec![0u8; 10], 960);
        assert!(matches!(err, Err(Error::StreamClosed { .. })));
    }
}
