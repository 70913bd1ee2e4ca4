// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory stand-ins for the session, the system manager and endpoint
//! sockets.

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use rover_transceiver::aggregator::Endpoint;
use rover_transceiver::connection::{send_segments, ConnectionError, FrameSink};
use rover_transceiver::control_plane::{ControlPlane, ControlPlaneError};
use rover_transceiver::segment::{split, Reassembler, ReassemblerConfig};
use rover_transceiver::socket::{EndpointSocket, SocketError, SocketFactory};
use rover_transceiver::wire::{Segment, ServiceList, TuningState};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Frame sink
// ============================================================================

/// Records every segment "sent" on the frame channel.
pub struct RecordingSink {
    pub max_chunk: usize,
    pub segments: Mutex<Vec<Segment>>,
    pub fail: AtomicBool,
}

impl RecordingSink {
    pub fn new(max_chunk: usize) -> Self {
        Self {
            max_chunk,
            segments: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Reassemble everything sent so far, in packet id order.
    pub fn packets(&self) -> Vec<(i64, Vec<u8>)> {
        let mut reassembler = Reassembler::new(ReassemblerConfig::default());
        let mut packets = Vec::new();
        for segment in self.segments.lock().iter() {
            let packet_id = segment.packet_id;
            if let Some(payload) = reassembler
                .on_bytes(&segment.encode_to_vec())
                .expect("valid segment")
            {
                packets.push((packet_id, payload));
            }
        }
        packets.sort_by_key(|(id, _)| *id);
        packets
    }
}

impl FrameSink for RecordingSink {
    async fn send_framed(&self, payload: &[u8], packet_id: i64) -> Result<usize, ConnectionError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        let segments = split(payload, packet_id, self.max_chunk)?;
        let mut recorded = Vec::with_capacity(segments.len());
        let count = send_segments(&segments, |data| {
            recorded.push(Segment::decode(data).expect("segment encodes"));
            async { Ok::<_, ConnectionError>(()) }
        })
        .await?;
        self.segments.lock().extend(recorded);
        Ok(count)
    }
}

// ============================================================================
// Control plane
// ============================================================================

/// Scripted system manager. `None` makes the matching request fail.
#[derive(Default)]
pub struct MockControlPlane {
    pub services: Mutex<Option<ServiceList>>,
    pub tuning: Mutex<Option<TuningState>>,
    pub broadcasts: Mutex<Vec<TuningState>>,
    pub fail_broadcast: AtomicBool,
}

impl MockControlPlane {
    pub fn with_services(services: ServiceList) -> Self {
        let mock = Self::default();
        *mock.services.lock() = Some(services);
        mock
    }
}

fn unavailable() -> ControlPlaneError {
    ControlPlaneError::Timeout(Duration::from_millis(1))
}

impl ControlPlane for MockControlPlane {
    async fn get_all_services(&self) -> Result<ServiceList, ControlPlaneError> {
        self.services.lock().clone().ok_or_else(unavailable)
    }

    async fn get_tuning_state(&self) -> Result<TuningState, ControlPlaneError> {
        self.tuning.lock().clone().ok_or_else(unavailable)
    }

    async fn broadcast_tuning_state(&self, state: TuningState) -> Result<(), ControlPlaneError> {
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.broadcasts.lock().push(state);
        Ok(())
    }
}

// ============================================================================
// Endpoint sockets
// ============================================================================

type Queue = Arc<Mutex<VecDeque<Bytes>>>;

pub struct MockSocket {
    pub endpoint: Endpoint,
    queue: Queue,
    closed: Arc<AtomicBool>,
    dead: Arc<AtomicBool>,
    close_count: Arc<AtomicUsize>,
}

impl MockSocket {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl EndpointSocket for MockSocket {
    fn try_recv(&self) -> Result<Option<Bytes>, SocketError> {
        if self.is_closed() {
            return Err(SocketError::Disconnected(self.endpoint.address.clone()));
        }
        Ok(self.queue.lock().pop_front())
    }

    fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    fn close(self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts opens and closes; messages are queued per endpoint address.
#[derive(Default)]
pub struct MockFactory {
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    queues: Mutex<HashMap<String, Queue>>,
    sockets: Mutex<Vec<(String, Arc<AtomicBool>)>>,
}

impl MockFactory {
    fn queue(&self, address: &str) -> Queue {
        self.queues
            .lock()
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    /// Make `payload` readable on the endpoint at `address`.
    pub fn push(&self, address: &str, payload: &[u8]) {
        self.queue(address)
            .lock()
            .push_back(Bytes::copy_from_slice(payload));
    }

    /// Mark every socket opened so far on `address` as dead.
    pub fn kill(&self, address: &str) {
        for (socket_address, dead) in self.sockets.lock().iter() {
            if socket_address == address {
                dead.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.opened() - self.closed()
    }
}

impl SocketFactory for MockFactory {
    type Socket = MockSocket;

    fn open(&self, endpoint: &Endpoint) -> Result<MockSocket, SocketError> {
        if endpoint.address.starts_with("bad://") {
            return Err(SocketError::InvalidAddress(endpoint.address.clone()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let dead = Arc::new(AtomicBool::new(false));
        self.sockets
            .lock()
            .push((endpoint.address.clone(), dead.clone()));
        Ok(MockSocket {
            endpoint: endpoint.clone(),
            queue: self.queue(&endpoint.address),
            closed: Arc::new(AtomicBool::new(false)),
            dead,
            close_count: self.closed.clone(),
        })
    }
}
