// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rover Telemetry Transceiver
//!
//! Relays the robot's on-board pub/sub streams to a remote operator console
//! over a WebRTC peer session, and carries console commands back on board.
//!
//! # Features
//!
//! - **Service discovery**: Track the system manager's service registry and
//!   keep one subscription per live endpoint
//! - **Framed relay**: Wrap every endpoint message and segment it onto the
//!   frame channel under a monotonic packet id
//! - **Control path**: Route drive commands to on-board consumers and tuning
//!   updates to the system manager
//! - **Rendezvous signaling**: Offer/answer and ICE exchange over HTTP
//!
//! # Quick Start
//!
//! ```bash
//! # Connect to the default rendezvous server as "car"
//! rover-transceiver
//!
//! # Over the internet, with a public STUN server
//! rover-transceiver --rendezvous https://console.example.net --external-relay
//!
//! # Using config file
//! rover-transceiver --config transceiver.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! rendezvous_address = "http://localhost:7500"
//! connection_identity = "car"
//! control_plane_address = "tcp://localhost:1234"
//! controller_publish_address = "tcp://0.0.0.0:5600"
//!
//! [channels]
//! meta = "meta"
//! control = "control"
//! frame = "frame"
//! ```

pub mod aggregator;
pub mod config;
pub mod connection;
pub mod control_plane;
pub mod dispatcher;
pub mod inbound;
pub mod publisher;
pub mod segment;
pub mod signaling;
pub mod socket;
pub mod stats;
pub mod tuning_input;
pub mod wire;

pub use aggregator::{Endpoint, ReconcileSummary, ServiceIdentity, StreamAggregator};
pub use config::{ChannelLabels, ConfigError, TransceiverConfig};
pub use connection::{ConnectionError, ConnectionManager, ConnectionState, FrameSink, PeerSession};
pub use control_plane::{ControlPlane, ControlPlaneError, ZmqControlPlane};
pub use dispatcher::{DispatchSettings, Dispatcher, DispatcherHandle, PacketCounter};
pub use inbound::{classify, Inbound, InboundOutcome, InboundRouter};
pub use segment::{Reassembler, ReassemblerConfig, SegmentError, Segmenter};
pub use signaling::{SignalingClient, SignalingError};
pub use socket::{EndpointSocket, SocketError, SocketFactory, ZmqSocketFactory};
pub use stats::{RelayStats, RelayStatsSnapshot};

use thiserror::Error;

/// Top-level transceiver errors.
#[derive(Debug, Error)]
pub enum TransceiverError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
