//! Packet representation for framed payload data

use bytes::Bytes;
use std::fmt;

/// Granule position value meaning "no position known yet"
pub const NO_GRANULE: i64 = -1;

/// A single logical packet: an opaque payload plus its framing metadata.
///
/// Payloads are held as [`Bytes`] so clones share the underlying allocation.
/// `packet_number`, and on the read side `bos`/`eos`, are assigned by the
/// framing layer: the muxer numbers packets as they are submitted and the
/// demuxer numbers and flags them as they are reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Opaque payload, length >= 0
    pub data: Bytes,

    /// Stream-semantic position (e.g. sample count) of this packet,
    /// `NO_GRANULE` when the codec has not assigned one
    pub granule_position: i64,

    /// Position of this packet within its logical stream, counted from 0
    pub packet_number: u64,

    /// First packet of its logical stream
    pub bos: bool,

    /// Last packet of its logical stream
    pub eos: bool,
}

impl Packet {
    /// Create a packet with no granule position and no stream flags
    pub fn new<B: Into<Bytes>>(data: B) -> Self {
        Packet {
            data: data.into(),
            granule_position: NO_GRANULE,
            packet_number: 0,
            bos: false,
            eos: false,
        }
    }

    /// Create the opening packet of a logical stream
    pub fn first<B: Into<Bytes>>(data: B) -> Self {
        Packet {
            bos: true,
            ..Packet::new(data)
        }
    }

    /// Create the closing packet of a logical stream
    pub fn last<B: Into<Bytes>>(data: B) -> Self {
        Packet {
            eos: true,
            ..Packet::new(data)
        }
    }

    /// Set the granule position, builder style
    pub fn with_granule(mut self, granule_position: i64) -> Self {
        self.granule_position = granule_position;
        self
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty (an empty packet is still a packet)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet(no={}, size={}, granule={}, bos={}, eos={})",
            self.packet_number,
            self.len(),
            self.granule_position,
            self.bos,
            self.eos
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_packet_defaults() {
        let packet = Packet::new(vec![1, 2, 3]);
        assert_eq!(packet.len(), 3);
        assert_eq!(packet.granule_position, NO_GRANULE);
        assert_eq!(packet.packet_number, 0);
        assert!(!packet.bos);
        assert!(!packet.eos);
    }

    #[test]
    fn test_stream_edge_constructors() {
        assert!(Packet::first(&b"head"[..]).bos);
        assert!(Packet::last(&b"tail"[..]).eos);
    }

    #[test]
    fn test_with_granule() {
        let packet = Packet::new(&b"audio"[..]).with_granule(960);
        assert_eq!(packet.granule_position, 960);
    }

    #[test]
    fn test_clone_shares_payload() {
        let packet = Packet::new(vec![0u8; 1024]);
        let copy = packet.clone();
        assert_eq!(packet.data.as_ptr(), copy.data.as_ptr());
    }
}
