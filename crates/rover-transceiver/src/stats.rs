// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by the relay loops.
#[derive(Debug)]
pub struct RelayStats {
    /// Endpoint messages wrapped and sent to the console.
    pub messages_relayed: AtomicU64,

    /// Payload bytes sent on the frame channel (before segmentation).
    pub bytes_relayed: AtomicU64,

    /// Frame-channel segments sent.
    pub segments_sent: AtomicU64,

    /// Frame-channel sends that failed.
    pub send_errors: AtomicU64,

    /// Endpoint receive errors.
    pub socket_errors: AtomicU64,

    /// Completed service list / tuning state refresh passes.
    pub refreshes: AtomicU64,

    /// System manager requests that failed.
    pub control_plane_errors: AtomicU64,

    /// Drive commands queued for on-board consumers.
    pub controller_commands: AtomicU64,

    /// Tuning updates forwarded to the system manager.
    pub tuning_updates: AtomicU64,

    /// Inbound control messages matching no known kind.
    pub unknown_inbound: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            messages_relayed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            segments_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            socket_errors: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            control_plane_errors: AtomicU64::new(0),
            controller_commands: AtomicU64::new(0),
            tuning_updates: AtomicU64::new(0),
            unknown_inbound: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub(crate) fn record_sent(&self, bytes: usize, segments: usize) {
        self.bytes_relayed.fetch_add(bytes as u64, Ordering::Relaxed);
        self.segments_sent
            .fetch_add(segments as u64, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            segments_sent: self.segments_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            socket_errors: self.socket_errors.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            control_plane_errors: self.control_plane_errors.load(Ordering::Relaxed),
            controller_commands: self.controller_commands.load(Ordering::Relaxed),
            tuning_updates: self.tuning_updates.load(Ordering::Relaxed),
            unknown_inbound: self.unknown_inbound.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStatsSnapshot {
    pub messages_relayed: u64,
    pub bytes_relayed: u64,
    pub segments_sent: u64,
    pub send_errors: u64,
    pub socket_errors: u64,
    pub refreshes: u64,
    pub control_plane_errors: u64,
    pub controller_commands: u64,
    pub tuning_updates: u64,
    pub unknown_inbound: u64,
    pub uptime_secs: u64,
}

impl RelayStatsSnapshot {
    /// Calculate messages per second.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.messages_relayed as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
