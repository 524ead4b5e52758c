//! Ogg page binary layout
//!
//! A page is the physical framing unit of an Ogg stream: a fixed 27-byte
//! header, a segment table of up to 255 lacing values, and a body holding
//! the segmented packet data.
//!
//! ## Layout (all multi-byte integers little endian)
//!
//! | Offset | Size | Field                                        |
//! |--------|------|----------------------------------------------|
//! | 0      | 4    | capture pattern "OggS"                       |
//! | 4      | 1    | stream structure version (0)                 |
//! | 5      | 1    | header type flags (see [`flags`])            |
//! | 6      | 8    | granule position (signed)                    |
//! | 14     | 4    | stream serial number                         |
//! | 18     | 4    | page sequence number                         |
//! | 22     | 4    | checksum (computed with this field zeroed)   |
//! | 26     | 1    | segment count N                              |
//! | 27     | N    | segment table (lacing values)                |
//! | 27+N   | ...  | body (sum of lacing values bytes)            |

use crate::crc;
use byteorder::{ByteOrder, LittleEndian};

/// Capture pattern opening every page
pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

/// The only stream structure version in existence
pub const VERSION: u8 = 0;

/// Fixed header bytes before the segment table
pub const HEADER_SIZE: usize = 27;

/// Byte offset of the checksum field within the header
pub const CHECKSUM_OFFSET: usize = 22;

/// Maximum entries in one segment table
pub const MAX_SEGMENTS: usize = 255;

/// Maximum body bytes one page can carry (255 segments of 255 bytes)
pub const MAX_BODY_SIZE: usize = MAX_SEGMENTS * 255;

/// Header type flag bits
pub mod flags {
    /// First segment on this page continues a packet from the previous page
    pub const CONTINUED: u8 = 0x01;
    /// First page of a logical stream
    pub const BOS: u8 = 0x02;
    /// Last page of a logical stream
    pub const EOS: u8 = 0x04;
}

/// Parsed page header, including the segment table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    /// Header type flag bits (see [`flags`])
    pub header_type: u8,
    /// Granule position of the last packet completed on this page,
    /// -1 when no packet completes here
    pub granule_position: i64,
    /// Logical stream serial number
    pub serial: u32,
    /// Page sequence number within the logical stream, counted from 0
    pub sequence: u32,
    /// Checksum as stored on the wire
    pub checksum: u32,
    /// Lacing values describing how the body divides into packets
    pub segment_table: Vec<u8>,
}

impl PageHeader {
    /// Parse a header from `data`, which must start at the capture pattern.
    pub fn from_bytes(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < HEADER_SIZE {
            return Err("page header truncated");
        }
        if data[0..4] != CAPTURE_PATTERN {
            return Err("bad capture pattern");
        }
        if data[4] != VERSION {
            return Err("unsupported stream structure version");
        }
        let segments = data[26] as usize;
        if data.len() < HEADER_SIZE + segments {
            return Err("segment table truncated");
        }
        Ok(PageHeader {
            header_type: data[5],
            granule_position: LittleEndian::read_i64(&data[6..14]),
            serial: LittleEndian::read_u32(&data[14..18]),
            sequence: LittleEndian::read_u32(&data[18..22]),
            checksum: LittleEndian::read_u32(&data[22..26]),
            segment_table: data[27..27 + segments].to_vec(),
        })
    }

    /// Header size on the wire, segment table included
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.segment_table.len()
    }

    /// Body size the segment table describes
    pub fn body_len(&self) -> usize {
        self.segment_table.iter().map(|&v| v as usize).sum()
    }
}

/// A complete page: header plus body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub header: PageHeader,
    pub body: Vec<u8>,
}

impl Page {
    /// First segment continues a packet from the previous page
    pub fn is_continued(&self) -> bool {
        self.header.header_type & flags::CONTINUED != 0
    }

    /// First page of its logical stream
    pub fn is_bos(&self) -> bool {
        self.header.header_type & flags::BOS != 0
    }

    /// Last page of its logical stream
    pub fn is_eos(&self) -> bool {
        self.header.header_type & flags::EOS != 0
    }

    /// Number of packets that complete on this page
    pub fn packet_count(&self) -> usize {
        self.header.segment_table.iter().filter(|&&v| v < 255).count()
    }

    /// Last packet runs past the end of this page
    pub fn ends_mid_packet(&self) -> bool {
        self.header.segment_table.last() == Some(&255)
    }

    /// Total size on the wire
    pub fn size(&self) -> usize {
        self.header.size() + self.body.len()
    }

    /// Serialize the page, computing the checksum in place.
    ///
    /// The stored `checksum` field is ignored; the output always carries the
    /// checksum of the serialized bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        let Page { header, body } = self;
        let segments = header.segment_table.len();
        let mut out = vec![0u8; HEADER_SIZE + segments + body.len()];

        out[0..4].copy_from_slice(&CAPTURE_PATTERN);
        out[4] = VERSION;
        out[5] = header.header_type;
        LittleEndian::write_i64(&mut out[6..14], header.granule_position);
        LittleEndian::write_u32(&mut out[14..18], header.serial);
        LittleEndian::write_u32(&mut out[18..22], header.sequence);
        // checksum field stays zero until the whole page is laid out
        out[26] = segments as u8;
        out[27..27 + segments].copy_from_slice(&header.segment_table);
        out[27 + segments..].copy_from_slice(&body);

        let checksum = crc::crc32(&out);
        LittleEndian::write_u32(&mut out[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4], checksum);
        out
    }
}
