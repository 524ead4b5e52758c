//! Packet segmentation
//!
//! Ogg carries each packet as a run of segments of up to 255 bytes, described
//! in the page header by one-byte lacing values: 255 for every full segment,
//! then a final value in 0..=254 holding the remainder. A packet whose length
//! is an exact multiple of 255 therefore ends with a 0 lacing value, and the
//! empty packet is the single lacing value 0. A page whose last lacing value
//! is 255 hands the rest of the packet to the next page.

/// Payload bytes described by one full lacing value
pub const MAX_SEGMENT_SIZE: usize = 255;

/// Number of lacing values needed for a packet of `len` bytes.
pub fn segment_count(len: usize) -> usize {
    len / MAX_SEGMENT_SIZE + 1
}

/// Lacing values for a packet of `len` bytes.
pub fn lacing_values(len: usize) -> Vec<u8> {
    let mut values = vec![255u8; len / MAX_SEGMENT_SIZE];
    values.push((len % MAX_SEGMENT_SIZE) as u8);
    values
}
