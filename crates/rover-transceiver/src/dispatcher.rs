// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound relay loops.
//!
//! Two loops share one session and one packet counter:
//!
//! - the **outbound loop** polls every subscription without blocking, wraps
//!   each received message in a `DebugServiceMessage` and sends it framed;
//! - the **refresh loop** periodically pulls the service list and tuning
//!   state from the system manager, reconciles subscriptions and pushes both
//!   snapshots to the console.

use bytes::Bytes;
use prost::Message;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::aggregator::{services_from_list, Endpoint, ServiceIdentity, StreamAggregator};
use crate::config::TransceiverConfig;
use crate::connection::{ConnectionError, FrameSink};
use crate::control_plane::ControlPlane;
use crate::socket::SocketFactory;
use crate::stats::RelayStats;
use crate::wire::{DebugServiceMessage, SystemManagerMessage};

/// Monotonic packet id shared by every sender on the frame channel.
#[derive(Debug, Default)]
pub struct PacketCounter(AtomicI64);

impl PacketCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next packet id. Ids start at 1 and never repeat.
    pub fn next_id(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last id handed out (0 if none).
    pub fn current(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Loop timing.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub refresh_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl From<&TransceiverConfig> for DispatchSettings {
    fn from(config: &TransceiverConfig) -> Self {
        Self {
            refresh_interval: config.refresh_interval(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Handle to stop the dispatcher loops.
#[derive(Clone)]
pub struct DispatcherHandle {
    running: Arc<AtomicBool>,
}

impl DispatcherHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Wrap one endpoint message for the console.
pub fn wrap_endpoint_message(
    service: &ServiceIdentity,
    endpoint: &Endpoint,
    payload: &[u8],
    sent_at: i64,
) -> DebugServiceMessage {
    DebugServiceMessage {
        service: Some(service.into()),
        endpoint: Some(endpoint.into()),
        message: payload.to_vec(),
        sent_at,
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Relays endpoint traffic and control-plane snapshots to a [`FrameSink`].
pub struct Dispatcher<S, F: SocketFactory, C> {
    sink: Arc<S>,
    aggregator: Arc<StreamAggregator<F>>,
    control: Arc<C>,
    packets: Arc<PacketCounter>,
    stats: Arc<RelayStats>,
    settings: DispatchSettings,
    running: Arc<AtomicBool>,
}

impl<S, F: SocketFactory, C> Clone for Dispatcher<S, F, C> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            aggregator: self.aggregator.clone(),
            control: self.control.clone(),
            packets: self.packets.clone(),
            stats: self.stats.clone(),
            settings: self.settings,
            running: self.running.clone(),
        }
    }
}

impl<S, F, C> Dispatcher<S, F, C>
where
    S: FrameSink,
    F: SocketFactory,
    C: ControlPlane,
{
    pub fn new(
        sink: Arc<S>,
        aggregator: Arc<StreamAggregator<F>>,
        control: Arc<C>,
        stats: Arc<RelayStats>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            sink,
            aggregator,
            control,
            packets: Arc::new(PacketCounter::new()),
            stats,
            settings,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            running: self.running.clone(),
        }
    }

    pub fn packets(&self) -> &PacketCounter {
        &self.packets
    }

    /// Send one serialized message framed under a fresh packet id.
    pub async fn send_message(&self, payload: &[u8]) -> Result<i64, ConnectionError> {
        let packet_id = self.packets.next_id();
        match self.sink.send_framed(payload, packet_id).await {
            Ok(segments) => {
                self.stats.record_sent(payload.len(), segments);
                Ok(packet_id)
            }
            Err(e) => {
                tracing::warn!("Failed to send packet {}: {}", packet_id, e);
                RelayStats::bump(&self.stats.send_errors);
                Err(e)
            }
        }
    }

    /// Read at most one pending message from every subscription and relay
    /// them. Returns the number of messages read.
    pub async fn relay_once(&self) -> usize {
        let mut pending: Vec<DebugServiceMessage> = Vec::new();
        let sent_at = unix_millis();

        self.aggregator.for_each(|service, subscription| {
            match subscription.try_recv() {
                Ok(Some(payload)) => pending.push(wrap_endpoint_message(
                    service,
                    subscription.endpoint(),
                    &payload,
                    sent_at,
                )),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        "Receive failed on {} / {}: {}",
                        service,
                        subscription.endpoint().name,
                        e
                    );
                    RelayStats::bump(&self.stats.socket_errors);
                }
            }
        });

        let count = pending.len();
        for envelope in pending {
            if self.send_message(&envelope.encode_to_vec()).await.is_ok() {
                RelayStats::bump(&self.stats.messages_relayed);
            }
        }
        count
    }

    /// One refresh pass: reconcile subscriptions and publish the service list
    /// and tuning state. A failed fetch skips that publication.
    pub async fn refresh_once(&self) {
        match self.control.get_all_services().await {
            Ok(list) => {
                let summary = self.aggregator.reconcile(&services_from_list(&list));
                if !summary.is_noop() {
                    tracing::debug!("Reconciled services: {:?}", summary);
                }
                let message = SystemManagerMessage::service_list(list);
                let _ = self.send_message(&message.encode_to_vec()).await;
            }
            Err(e) => {
                tracing::warn!("Service list refresh failed: {}", e);
                RelayStats::bump(&self.stats.control_plane_errors);
            }
        }

        match self.control.get_tuning_state().await {
            Ok(state) => {
                let message = SystemManagerMessage::tuning_state(state);
                let _ = self.send_message(&message.encode_to_vec()).await;
            }
            Err(e) => {
                tracing::warn!("Tuning state refresh failed: {}", e);
                RelayStats::bump(&self.stats.control_plane_errors);
            }
        }

        RelayStats::bump(&self.stats.refreshes);
    }

    /// Poll subscriptions until stopped, sleeping only when idle.
    pub async fn run_outbound(&self) {
        while self.running.load(Ordering::Relaxed) {
            if self.relay_once().await == 0 {
                tokio::time::sleep(self.settings.poll_interval).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
        tracing::debug!("Outbound loop stopped");
    }

    /// Refresh on a fixed period until stopped.
    pub async fn run_refresh(&self) {
        let mut interval = tokio::time::interval(self.settings.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            self.refresh_once().await;
        }
        tracing::debug!("Refresh loop stopped");
    }

    /// Spawn both loops on the current runtime.
    pub fn spawn(&self) -> (JoinHandle<()>, JoinHandle<()>) {
        let outbound = self.clone();
        let refresh = self.clone();
        (
            tokio::spawn(async move { outbound.run_outbound().await }),
            tokio::spawn(async move { refresh.run_refresh().await }),
        )
    }
}

/// Decode a frame-channel payload that was produced by [`wrap_endpoint_message`].
pub fn unwrap_endpoint_message(payload: &[u8]) -> Option<(ServiceIdentity, Endpoint, Bytes)> {
    let message = DebugServiceMessage::decode(payload).ok()?;
    Some((
        ServiceIdentity::from(message.service.as_ref()?),
        Endpoint::from(message.endpoint.as_ref()?),
        Bytes::from(message.message),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_ids_strictly_increase() {
        let counter = PacketCounter::new();
        assert_eq!(counter.current(), 0);
        let ids: Vec<i64> = (0..5).map(|_| counter.next_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_packet_ids_unique_across_threads() {
        let counter = Arc::new(PacketCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || (0..250).map(|_| counter.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_wrap_and_unwrap() {
        let service = ServiceIdentity::new("imu", 42);
        let endpoint = Endpoint::new("accel", "tcp://*:5555");
        let envelope = wrap_endpoint_message(&service, &endpoint, b"xyz", 1_700_000_000_000);

        assert_eq!(envelope.sent_at, 1_700_000_000_000);
        let (s, e, payload) = unwrap_endpoint_message(&envelope.encode_to_vec()).unwrap();
        assert_eq!(s, service);
        assert_eq!(e, endpoint);
        assert_eq!(&payload[..], b"xyz");
    }
}
