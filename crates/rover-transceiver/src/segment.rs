// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Segmentation and reassembly for the frame channel.
//!
//! The peer transport caps the size of a single data-channel message, so
//! every outbound message is split into `Segment`s before transmission:
//!
//! - **Segmentation**: Split a payload into chunks of at most `max_chunk` bytes
//! - **Reassembly**: Rebuild the payload once every segment of a packet arrived
//! - **Timeout**: Drop packets whose segments stop arriving
//! - **Memory bounds**: Limit the number of packets pending reassembly
//!
//! # Usage
//!
//! ## Sender Side
//!
//! ```ignore
//! let segmenter = Segmenter::new(DEFAULT_MAX_CHUNK)?;
//! for segment in segmenter.split(&payload, packet_id) {
//!     channel.send(&segment.encode_to_vec())?;
//! }
//! ```
//!
//! ## Receiver Side
//!
//! ```ignore
//! let mut reassembler = Reassembler::new(ReassemblerConfig::default());
//! if let Some(payload) = reassembler.on_bytes(&message)? {
//!     deliver(payload);
//! }
//! reassembler.tick();
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use prost::Message;
use thiserror::Error;

use crate::wire::Segment;

/// Maximum number of payload bytes carried by one segment.
pub const DEFAULT_MAX_CHUNK: usize = 32192;

/// Segmentation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("maximum chunk size must be positive")]
    ZeroChunk,

    #[error("segment could not be decoded: {0}")]
    Decode(String),

    #[error("invalid segment {segment_id} of {total_segments}")]
    InvalidSegment {
        segment_id: i64,
        total_segments: i64,
    },

    #[error("packet {0} announced a different segment count")]
    CountMismatch(i64),

    #[error("packet {0} exceeds the reassembly size limit")]
    PayloadTooLarge(i64),
}

/// Split `payload` into ordered segments of at most `max_chunk` bytes.
///
/// An empty payload still yields a single, empty segment so that the
/// receiver observes the packet.
pub fn split(payload: &[u8], packet_id: i64, max_chunk: usize) -> Result<Vec<Segment>, SegmentError> {
    if max_chunk == 0 {
        return Err(SegmentError::ZeroChunk);
    }
    Ok(chunk_payload(payload, packet_id, max_chunk))
}

/// `max_chunk` must be non-zero.
fn chunk_payload(payload: &[u8], packet_id: i64, max_chunk: usize) -> Vec<Segment> {
    if payload.is_empty() {
        return vec![Segment {
            packet_id,
            segment_id: 0,
            total_segments: 1,
            data: Vec::new(),
        }];
    }

    let total_segments = payload.len().div_ceil(max_chunk) as i64;
    payload
        .chunks(max_chunk)
        .enumerate()
        .map(|(index, chunk)| Segment {
            packet_id,
            segment_id: index as i64,
            total_segments,
            data: chunk.to_vec(),
        })
        .collect()
}

// ============================================================================
// Segmenter (Sender Side)
// ============================================================================

/// Splits outbound payloads with a fixed chunk size.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    max_chunk: usize,
}

impl Segmenter {
    pub fn new(max_chunk: usize) -> Result<Self, SegmentError> {
        if max_chunk == 0 {
            return Err(SegmentError::ZeroChunk);
        }
        Ok(Self { max_chunk })
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    pub fn split(&self, payload: &[u8], packet_id: i64) -> Vec<Segment> {
        chunk_payload(payload, packet_id, self.max_chunk)
    }

    /// Split and serialize, ready to be handed to the frame channel.
    pub fn encode(&self, payload: &[u8], packet_id: i64) -> Vec<Vec<u8>> {
        self.split(payload, packet_id)
            .iter()
            .map(Message::encode_to_vec)
            .collect()
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self {
            max_chunk: DEFAULT_MAX_CHUNK,
        }
    }
}

// ============================================================================
// Reassembler (Receiver Side)
// ============================================================================

/// Reassembler configuration.
#[derive(Debug, Clone)]
pub struct ReassemblerConfig {
    /// Maximum packets pending reassembly.
    pub max_packets: usize,
    /// Reassembly timeout.
    pub timeout: Duration,
    /// Maximum reassembled payload size.
    pub max_payload_size: usize,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            max_packets: 16,
            timeout: Duration::from_secs(5),
            max_payload_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug)]
struct PendingPacket {
    total_segments: i64,
    segments: HashMap<i64, Vec<u8>>,
    buffered: usize,
    created_at: Instant,
}

impl PendingPacket {
    fn new(total_segments: i64) -> Self {
        Self {
            total_segments,
            segments: HashMap::new(),
            buffered: 0,
            created_at: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.segments.len() as i64 == self.total_segments
    }

    fn reassemble(&mut self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.buffered);
        for segment_id in 0..self.total_segments {
            if let Some(data) = self.segments.remove(&segment_id) {
                payload.extend_from_slice(&data);
            }
        }
        payload
    }
}

/// Reassembler statistics.
#[derive(Debug, Default, Clone)]
pub struct ReassemblerStats {
    pub segments_received: u64,
    pub packets_reassembled: u64,
    pub duplicates_dropped: u64,
    pub packets_timed_out: u64,
    pub packets_evicted: u64,
    pub pending_packets: usize,
}

/// Rebuilds payloads from segments received in any order.
pub struct Reassembler {
    config: ReassemblerConfig,
    pending: HashMap<i64, PendingPacket>,
    stats: ReassemblerStats,
}

impl Reassembler {
    pub fn new(config: ReassemblerConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            stats: ReassemblerStats::default(),
        }
    }

    pub fn stats(&self) -> ReassemblerStats {
        let mut stats = self.stats.clone();
        stats.pending_packets = self.pending.len();
        stats
    }

    /// Decode one frame-channel message and feed it to the reassembler.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>, SegmentError> {
        let segment = Segment::decode(bytes).map_err(|e| SegmentError::Decode(e.to_string()))?;
        self.on_segment(segment)
    }

    /// Handle a received segment.
    ///
    /// Returns `Some(payload)` when the segment completed its packet.
    pub fn on_segment(&mut self, segment: Segment) -> Result<Option<Vec<u8>>, SegmentError> {
        self.stats.segments_received += 1;

        if segment.total_segments <= 0
            || segment.segment_id < 0
            || segment.segment_id >= segment.total_segments
        {
            return Err(SegmentError::InvalidSegment {
                segment_id: segment.segment_id,
                total_segments: segment.total_segments,
            });
        }

        let packet_id = segment.packet_id;
        if !self.pending.contains_key(&packet_id) && self.pending.len() >= self.config.max_packets {
            self.evict_oldest();
        }

        let packet = self
            .pending
            .entry(packet_id)
            .or_insert_with(|| PendingPacket::new(segment.total_segments));

        if packet.total_segments != segment.total_segments {
            return Err(SegmentError::CountMismatch(packet_id));
        }

        if packet.segments.contains_key(&segment.segment_id) {
            self.stats.duplicates_dropped += 1;
            return Ok(None);
        }

        packet.buffered += segment.data.len();
        if packet.buffered > self.config.max_payload_size {
            self.pending.remove(&packet_id);
            return Err(SegmentError::PayloadTooLarge(packet_id));
        }
        packet.segments.insert(segment.segment_id, segment.data);

        if packet.is_complete() {
            let payload = packet.reassemble();
            self.pending.remove(&packet_id);
            self.stats.packets_reassembled += 1;
            return Ok(Some(payload));
        }

        Ok(None)
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .pending
            .iter()
            .min_by_key(|(_, p)| p.created_at)
            .map(|(id, _)| *id)
        {
            self.pending.remove(&oldest);
            self.stats.packets_evicted += 1;
        }
    }

    /// Drop packets that have been pending longer than the timeout.
    pub fn tick(&mut self) {
        let timeout = self.config.timeout;
        let now = Instant::now();
        let before = self.pending.len();
        self.pending
            .retain(|_, p| now.duration_since(p.created_at) < timeout);
        self.stats.packets_timed_out += (before - self.pending.len()) as u64;
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
