//! Ogg file probing and report generation
//!
//! Walks a whole file and summarizes it: page and packet counts per logical
//! stream, granule position ranges, codec identification for Opus streams,
//! and every anomaly the demuxer reported along the way.
//!
//! # Usage
//!
//! ```rust,no_run
//! use zogg::probe::FileProbe;
//!
//! let probe = FileProbe::new("audio.ogg")?;
//! let report = probe.analyze()?;
//!
//! // Print human-readable summary
//! println!("{}", report);
//!
//! // Or get JSON output
//! let json = report.to_json()?;
//! # Ok::<(), zogg::error::Error>(())
//! ```

use crate::demuxer::{DemuxEvent, Demuxer, PageOut, PageReader};
use crate::error::{Error, Result};
use crate::opus::{is_opus_head, is_opus_tags, OpusHead, OpusTags};
use crate::packet::NO_GRANULE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Ogg file probe
pub struct FileProbe {
    /// Path to the probed file
    file_path: String,
    /// File size in bytes
    file_size: u64,
}

impl FileProbe {
    /// Create a new probe for a file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file_path = path.as_ref().to_string_lossy().to_string();
        let file_size = fs::metadata(&path)?.len();
        Ok(FileProbe {
            file_path,
            file_size,
        })
    }

    /// Read the whole file and produce a report
    pub fn analyze(&self) -> Result<OggReport> {
        let data = fs::read(&self.file_path)?;

        // page-level pass for page counts
        let mut reader = PageReader::new();
        reader.push(&data);
        reader.set_eof();
        let mut pages = 0u64;
        let mut page_counts: HashMap<u32, u64> = HashMap::new();
        loop {
            match reader.next_page() {
                PageOut::Page(page) => {
                    pages += 1;
                    *page_counts.entry(page.header.serial).or_insert(0) += 1;
                }
                PageOut::Anomaly(_) => {}
                PageOut::NeedData => break,
            }
        }

        // packet-level pass for stream statistics
        let mut demuxer = Demuxer::new();
        demuxer.push(&data);
        let mut events = Vec::new();
        while let Some(event) = demuxer.next_event() {
            events.push(event);
        }
        events.extend(demuxer.finish());

        let mut accumulators: HashMap<u32, StreamAccumulator> = HashMap::new();
        let mut anomalies = Vec::new();
        for event in events {
            match event {
                DemuxEvent::StreamBegin { serial } => {
                    accumulators.entry(serial).or_default();
                }
                DemuxEvent::Packet { serial, packet } => {
                    let acc = accumulators.entry(serial).or_default();
                    acc.packets += 1;
                    acc.payload_bytes += packet.data.len() as u64;
                    if packet.granule_position != NO_GRANULE {
                        acc.first_granule.get_or_insert(packet.granule_position);
                        acc.last_granule = Some(packet.granule_position);
                    }
                    if packet.packet_number == 0 && is_opus_head(&packet.data) {
                        acc.head = OpusHead::parse(&packet.data).ok();
                    }
                    if packet.packet_number == 1 && is_opus_tags(&packet.data) {
                        acc.vendor = OpusTags::parse(&packet.data).ok().map(|tags| tags.vendor);
                    }
                }
                DemuxEvent::StreamEnd { serial } => {
                    accumulators.entry(serial).or_default().ended = true;
                }
                DemuxEvent::Anomaly(anomaly) => {
                    anomalies.push(anomaly.to_string());
                }
            }
        }

        let streams = demuxer
            .streams()
            .iter()
            .map(|&serial| {
                let acc = accumulators.remove(&serial).unwrap_or_default();
                let opus = acc.head.map(|head| OpusReport {
                    channels: head.channels,
                    sample_rate: head.input_sample_rate,
                    pre_skip: head.pre_skip,
                    vendor: acc.vendor,
                    duration_seconds: acc
                        .last_granule
                        .map(|g| (g - i64::from(head.pre_skip)).max(0) as f64 / 48_000.0),
                });
                StreamReport {
                    serial,
                    codec: if opus.is_some() { "opus" } else { "unknown" }.to_string(),
                    pages: page_counts.get(&serial).copied().unwrap_or(0),
                    packets: acc.packets,
                    payload_bytes: acc.payload_bytes,
                    first_granule: acc.first_granule,
                    last_granule: acc.last_granule,
                    ended: acc.ended,
                    opus,
                }
            })
            .collect();

        Ok(OggReport {
            file_path: self.file_path.clone(),
            file_size: self.file_size,
            pages,
            streams,
            anomalies,
        })
    }
}

/// Per-serial statistics gathered while draining the demuxer
#[derive(Default)]
struct StreamAccumulator {
    packets: u64,
    payload_bytes: u64,
    first_granule: Option<i64>,
    last_granule: Option<i64>,
    ended: bool,
    head: Option<OpusHead>,
    vendor: Option<String>,
}

/// Complete probe report for one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OggReport {
    /// File path
    pub file_path: String,
    /// File size in bytes
    pub file_size: u64,
    /// Valid pages found, all streams combined
    pub pages: u64,
    /// Per-stream summaries, in first-seen order
    pub streams: Vec<StreamReport>,
    /// Rendered anomaly messages, in detection order
    pub anomalies: Vec<String>,
}

impl OggReport {
    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Probe(format!("JSON serialization failed: {}", e)))
    }

    /// Convert to compact JSON string
    pub fn to_json_compact(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Probe(format!("JSON serialization failed: {}", e)))
    }
}

impl fmt::Display for OggReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Input, ogg from '{}':", self.file_path)?;
        writeln!(
            f,
            "  File Size: {} bytes ({:.2} MB)",
            self.file_size,
            self.file_size as f64 / 1_048_576.0
        )?;
        writeln!(f, "  Pages: {}", self.pages)?;
        writeln!(f)?;

        for stream in &self.streams {
            writeln!(f, "  Stream #{}: {}", stream.serial, stream)?;
        }

        if !self.anomalies.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Anomalies:")?;
            for anomaly in &self.anomalies {
                writeln!(f, "    {}", anomaly)?;
            }
        }

        Ok(())
    }
}

/// Summary of one logical stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamReport {
    /// Stream serial number
    pub serial: u32,
    /// Codec name ("opus" or "unknown")
    pub codec: String,
    /// Pages carrying this serial
    pub pages: u64,
    /// Packets reassembled
    pub packets: u64,
    /// Total packet payload bytes
    pub payload_bytes: u64,
    /// First known granule position
    pub first_granule: Option<i64>,
    /// Last known granule position
    pub last_granule: Option<i64>,
    /// Whether the stream's EOS page arrived
    pub ended: bool,
    /// Opus-specific details when the stream is Opus
    pub opus: Option<OpusReport>,
}

impl fmt::Display for StreamReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.codec)?;
        if let Some(ref opus) = self.opus {
            write!(f, ", {} Hz", opus.sample_rate)?;
            write!(f, ", {} channels", opus.channels)?;
        }
        write!(
            f,
            ", {} pages, {} packets, {} bytes",
            self.pages, self.packets, self.payload_bytes
        )?;
        if let Some(duration) = self.opus.as_ref().and_then(|opus| opus.duration_seconds) {
            write!(f, ", {:.2} s", duration)?;
        }
        if !self.ended {
            write!(f, " (truncated)")?;
        }
        Ok(())
    }
}

/// Opus stream details recovered from the identification headers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpusReport {
    /// Output channel count
    pub channels: u8,
    /// Original input sample rate in Hz
    pub sample_rate: u32,
    /// Pre-skip in 48 kHz samples
    pub pre_skip: u16,
    /// Vendor string from the comment header
    pub vendor: Option<String>,
    /// Playback length in seconds, granule range minus pre-skip
    pub duration_seconds: Option<f64>,
}
