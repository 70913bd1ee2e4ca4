// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer session with the operator console.
//!
//! [`ConnectionManager`] performs the offer/answer handshake through the
//! rendezvous server and yields a [`PeerSession`] carrying three labelled
//! data channels. Inbound messages from every channel are funnelled through
//! one queue and dispatched by label; connection state changes are published
//! on a watch channel so the owner can react to terminal states.

use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::TransceiverConfig;
use crate::segment::{SegmentError, Segmenter};
use crate::signaling::{SignalingClient, SignalingError};
use crate::wire::Segment;

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("peer transport error: {0}")]
    Transport(#[from] webrtc::Error),

    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("segmentation error: {0}")]
    Segment(#[from] SegmentError),

    #[error("no data channel labelled '{0}'")]
    UnknownChannel(String),

    #[error("ICE gathering did not complete within {0:?}")]
    GatheringTimeout(Duration),

    #[error("session is closed")]
    Closed,
}

/// Simplified peer connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Closed, Disconnected and Failed all end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
            _ => Self::Connecting,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Callback invoked with each message received on a channel.
pub type ChannelHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Label-to-handler dispatch table.
#[derive(Clone, Default)]
pub struct ChannelHandlers {
    table: HashMap<String, ChannelHandler>,
}

impl ChannelHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `label`, replacing any previous one.
    pub fn on<H>(&mut self, label: impl Into<String>, handler: H)
    where
        H: Fn(Bytes) + Send + Sync + 'static,
    {
        self.table.insert(label.into(), Arc::new(handler));
    }

    pub fn contains(&self, label: &str) -> bool {
        self.table.contains_key(label)
    }

    /// Invoke the handler for `label`. Returns false if there is none.
    pub fn dispatch(&self, label: &str, data: Bytes) -> bool {
        match self.table.get(label) {
            Some(handler) => {
                handler(data);
                true
            }
            None => false,
        }
    }
}

/// Destination for framed outbound traffic.
pub trait FrameSink: Send + Sync + 'static {
    /// Segment `payload` under `packet_id` and send every segment in order.
    ///
    /// Returns the number of segments sent, or the first send error.
    fn send_framed(
        &self,
        payload: &[u8],
        packet_id: i64,
    ) -> impl Future<Output = Result<usize, ConnectionError>> + Send;
}

/// Encode `segments` and hand them to `send` in order, stopping at the first
/// failure. Returns the number of segments sent.
pub async fn send_segments<S, Fut>(segments: &[Segment], mut send: S) -> Result<usize, ConnectionError>
where
    S: FnMut(Bytes) -> Fut,
    Fut: Future<Output = Result<(), ConnectionError>>,
{
    for segment in segments {
        send(Bytes::from(segment.encode_to_vec())).await?;
    }
    Ok(segments.len())
}

/// Builds a [`PeerSession`] from configuration.
pub struct ConnectionManager {
    labels: Vec<String>,
    frame_label: String,
    ice_servers: Vec<String>,
    gathering_timeout: Duration,
    segmenter: Segmenter,
    signaling: SignalingClient,
    handlers: ChannelHandlers,
}

impl ConnectionManager {
    pub fn new(config: &TransceiverConfig) -> Result<Self, ConnectionError> {
        let signaling = SignalingClient::new(
            config.rendezvous_address.clone(),
            config.connection_identity.clone(),
            config.signaling_timeout(),
        )?;

        Ok(Self {
            labels: config.channels.all().iter().map(|l| l.to_string()).collect(),
            frame_label: config.channels.frame.clone(),
            ice_servers: config.active_ice_servers(),
            gathering_timeout: config.gathering_timeout(),
            segmenter: Segmenter::new(config.max_chunk)?,
            signaling,
            handlers: ChannelHandlers::new(),
        })
    }

    /// Register the handler for messages arriving on `label`.
    pub fn on_channel_message<H>(&mut self, label: &str, handler: H) -> Result<(), ConnectionError>
    where
        H: Fn(Bytes) + Send + Sync + 'static,
    {
        if !self.labels.iter().any(|l| l == label) {
            return Err(ConnectionError::UnknownChannel(label.to_string()));
        }
        self.handlers.on(label, handler);
        Ok(())
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    /// Create the peer connection and channels, gather candidates and run
    /// the rendezvous handshake.
    pub async fn open(self) -> Result<PeerSession, ConnectionError> {
        let api = APIBuilder::new().build();
        let peer = Arc::new(api.new_peer_connection(self.rtc_configuration()).await?);

        let candidates: Arc<Mutex<Vec<RTCIceCandidateInit>>> = Arc::new(Mutex::new(Vec::new()));
        let gathered = candidates.clone();
        peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        tracing::debug!("Local ICE candidate: {}", init.candidate);
                        gathered.lock().push(init);
                    }
                    Err(e) => tracing::warn!("Cannot serialize ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        // Channels exist before the offer so they are negotiated with it.
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let mut channels = HashMap::new();
        for label in &self.labels {
            let channel = peer.create_data_channel(label, None).await?;
            attach_channel(&channel, inbound_tx.clone());
            channels.insert(label.clone(), channel);
        }
        drop(inbound_tx);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let state = ConnectionState::from(state);
            tracing::info!("Peer connection state: {}", state);
            let _ = state_tx.send(state);
            Box::pin(async {})
        }));

        let handshake = async {
            let offer = peer.create_offer(None).await?;
            let mut gathering_complete = peer.gathering_complete_promise().await;
            peer.set_local_description(offer.clone()).await?;
            tokio::time::timeout(self.gathering_timeout, gathering_complete.recv())
                .await
                .map_err(|_| ConnectionError::GatheringTimeout(self.gathering_timeout))?;
            tracing::info!("ICE gathering complete");

            let answer = self.signaling.negotiate(&offer).await?;
            peer.set_remote_description(answer).await?;

            let local = candidates.lock().clone();
            let remote = self.signaling.exchange_candidates(&local).await?;
            for candidate in remote {
                peer.add_ice_candidate(candidate).await?;
            }
            Ok::<_, ConnectionError>(())
        };

        if let Err(e) = handshake.await {
            if let Err(close_err) = peer.close().await {
                tracing::debug!("Closing abandoned peer connection: {}", close_err);
            }
            return Err(e);
        }

        let pump = tokio::spawn(pump_inbound(inbound_rx, self.handlers));

        Ok(PeerSession {
            peer,
            channels,
            frame_label: self.frame_label,
            segmenter: self.segmenter,
            state: state_rx,
            pump,
            closed: AtomicBool::new(false),
        })
    }
}

fn attach_channel(channel: &Arc<RTCDataChannel>, inbound: mpsc::UnboundedSender<(String, Bytes)>) {
    let label = channel.label().to_string();

    let opened = label.clone();
    channel.on_open(Box::new(move || {
        tracing::info!("Data channel '{}' open", opened);
        Box::pin(async {})
    }));

    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let _ = inbound.send((label.clone(), message.data));
        Box::pin(async {})
    }));
}

async fn pump_inbound(
    mut inbound: mpsc::UnboundedReceiver<(String, Bytes)>,
    handlers: ChannelHandlers,
) {
    while let Some((label, data)) = inbound.recv().await {
        if !handlers.dispatch(&label, data) {
            tracing::trace!("No handler for channel '{}'", label);
        }
    }
}

/// An established session with the console.
pub struct PeerSession {
    peer: Arc<RTCPeerConnection>,
    channels: HashMap<String, Arc<RTCDataChannel>>,
    frame_label: String,
    segmenter: Segmenter,
    state: watch::Receiver<ConnectionState>,
    pump: JoinHandle<()>,
    closed: AtomicBool,
}

impl PeerSession {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until the session reaches a terminal state.
    pub async fn wait_terminal(&self) -> ConnectionState {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if state.changed().await.is_err() {
                return ConnectionState::Closed;
            }
        }
    }

    /// Wait until the session is connected. Returns false if it ended first.
    pub async fn wait_connected(&self) -> bool {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if current == ConnectionState::Connected {
                return true;
            }
            if current.is_terminal() || state.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Send one unsegmented message on a channel.
    pub async fn send(&self, label: &str, data: &[u8]) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let channel = self
            .channels
            .get(label)
            .ok_or_else(|| ConnectionError::UnknownChannel(label.to_string()))?;
        channel.send(&Bytes::copy_from_slice(data)).await?;
        Ok(())
    }

    /// Tear the session down. Only the first call has an effect.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pump.abort();
        for (label, channel) in &self.channels {
            if let Err(e) = channel.close().await {
                tracing::debug!("Closing data channel '{}': {}", label, e);
            }
        }
        self.peer.close().await?;
        tracing::info!("Peer session closed");
        Ok(())
    }
}

impl FrameSink for PeerSession {
    async fn send_framed(&self, payload: &[u8], packet_id: i64) -> Result<usize, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let channel = self
            .channels
            .get(&self.frame_label)
            .ok_or_else(|| ConnectionError::UnknownChannel(self.frame_label.clone()))?;

        let segments = self.segmenter.split(payload, packet_id);
        send_segments(&segments, |data| async move {
            channel.send(&data).await?;
            Ok::<_, ConnectionError>(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_segments_sent_in_order() {
        let segments = Segmenter::new(4).unwrap().split(b"abcdefghij", 3);
        let mut sent = Vec::new();

        let count = send_segments(&segments, |data| {
            sent.push(Segment::decode(data).unwrap());
            async { Ok::<_, ConnectionError>(()) }
        })
        .await
        .unwrap();

        assert_eq!(count, 3);
        assert_eq!(sent, segments);
    }

    #[tokio::test]
    async fn test_send_stops_at_first_failure() {
        let segments = Segmenter::new(2).unwrap().split(b"abcdefgh", 5);
        assert_eq!(segments.len(), 4);
        let mut attempts = 0;

        let result = send_segments(&segments, |_| {
            attempts += 1;
            let fail = attempts == 2;
            async move {
                if fail {
                    Err(ConnectionError::Closed)
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(matches!(result, Err(ConnectionError::Closed)));
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            ConnectionState::from(RTCPeerConnectionState::New),
            ConnectionState::Connecting
        );
        assert_eq!(
            ConnectionState::from(RTCPeerConnectionState::Failed),
            ConnectionState::Failed
        );
    }

    #[test]
    fn test_dispatch_table() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut handlers = ChannelHandlers::new();
        let counter = hits.clone();
        handlers.on("control", move |data: Bytes| {
            counter.fetch_add(data.len(), Ordering::SeqCst);
        });

        assert!(handlers.dispatch("control", Bytes::from_static(b"abc")));
        assert!(!handlers.dispatch("frame", Bytes::from_static(b"abc")));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unknown_label_rejected() {
        let mut manager = ConnectionManager::new(&TransceiverConfig::default()).unwrap();
        assert!(manager.on_channel_message("control", |_| {}).is_ok());
        assert!(matches!(
            manager.on_channel_message("video", |_| {}),
            Err(ConnectionError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_ice_servers_follow_relay_flag() {
        let manager = ConnectionManager::new(&TransceiverConfig::default()).unwrap();
        assert!(manager.rtc_configuration().ice_servers.is_empty());

        let config = TransceiverConfig {
            use_external_relay: true,
            ..Default::default()
        };
        let manager = ConnectionManager::new(&config).unwrap();
        let servers = manager.rtc_configuration().ice_servers;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }
}
