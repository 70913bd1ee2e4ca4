// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transceiver configuration.
//!
//! Supports both programmatic and file-based configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::segment::DEFAULT_MAX_CHUNK;

/// Public STUN server used when the external relay is enabled.
pub const EXTERNAL_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Transceiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransceiverConfig {
    /// Instance name (for identification in logs).
    #[serde(default = "default_name")]
    pub name: String,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base URL of the rendezvous (signaling) server.
    #[serde(default = "default_rendezvous_address")]
    pub rendezvous_address: String,

    /// Identity this robot announces to the rendezvous server.
    #[serde(default = "default_connection_identity")]
    pub connection_identity: String,

    /// Data-channel labels.
    #[serde(default)]
    pub channels: ChannelLabels,

    /// Use a public STUN server for address discovery (WAN operation).
    #[serde(default)]
    pub use_external_relay: bool,

    /// ICE servers used when `use_external_relay` is set.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,

    /// Timeout for a single rendezvous HTTP exchange (seconds).
    #[serde(default = "default_signaling_timeout")]
    pub signaling_timeout_secs: u64,

    /// Upper bound on local ICE candidate gathering (seconds).
    #[serde(default = "default_gathering_timeout")]
    pub gathering_timeout_secs: u64,

    /// Maximum payload bytes per frame-channel segment.
    #[serde(default = "default_max_chunk")]
    pub max_chunk: usize,

    /// Service list / tuning state refresh period (milliseconds).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,

    /// Idle sleep of the outbound loop when no endpoint had data (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Statistics reporting interval (seconds, 0 to disable).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Request/reply address of the system manager.
    #[serde(default = "default_control_plane_address")]
    pub control_plane_address: String,

    /// Timeout for one system manager request (milliseconds).
    #[serde(default = "default_control_plane_timeout")]
    pub control_plane_timeout_ms: u64,

    /// Bind address for re-publishing drive commands to on-board consumers.
    #[serde(default)]
    pub controller_publish_address: Option<String>,

    /// TCP address of the raw tuning-state input harness.
    #[serde(default)]
    pub tuning_input_address: Option<String>,
}

/// Labels of the three data channels opened towards the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLabels {
    #[serde(default = "default_meta_label")]
    pub meta: String,
    #[serde(default = "default_control_label")]
    pub control: String,
    #[serde(default = "default_frame_label")]
    pub frame: String,
}

impl ChannelLabels {
    pub fn all(&self) -> [&str; 3] {
        [&self.meta, &self.control, &self.frame]
    }
}

impl Default for ChannelLabels {
    fn default() -> Self {
        Self {
            meta: default_meta_label(),
            control: default_control_label(),
            frame: default_frame_label(),
        }
    }
}

fn default_name() -> String {
    "rover-transceiver".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rendezvous_address() -> String {
    "http://localhost:7500".to_string()
}

fn default_connection_identity() -> String {
    "car".to_string()
}

fn default_meta_label() -> String {
    "meta".to_string()
}

fn default_control_label() -> String {
    "control".to_string()
}

fn default_frame_label() -> String {
    "frame".to_string()
}

fn default_ice_servers() -> Vec<String> {
    vec![EXTERNAL_STUN_SERVER.to_string()]
}

fn default_signaling_timeout() -> u64 {
    10
}

fn default_gathering_timeout() -> u64 {
    30
}

fn default_max_chunk() -> usize {
    DEFAULT_MAX_CHUNK
}

fn default_refresh_interval() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    1
}

fn default_stats_interval() -> u64 {
    10
}

fn default_control_plane_address() -> String {
    "tcp://localhost:1234".to_string()
}

fn default_control_plane_timeout() -> u64 {
    1000
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            rendezvous_address: default_rendezvous_address(),
            connection_identity: default_connection_identity(),
            channels: ChannelLabels::default(),
            use_external_relay: false,
            ice_servers: default_ice_servers(),
            signaling_timeout_secs: default_signaling_timeout(),
            gathering_timeout_secs: default_gathering_timeout(),
            max_chunk: default_max_chunk(),
            refresh_interval_ms: default_refresh_interval(),
            poll_interval_ms: default_poll_interval(),
            stats_interval_secs: default_stats_interval(),
            control_plane_address: default_control_plane_address(),
            control_plane_timeout_ms: default_control_plane_timeout(),
            controller_publish_address: None,
            tuning_input_address: None,
        }
    }
}

impl TransceiverConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_identity.trim().is_empty() {
            return Err(ConfigError::Invalid("Connection identity is empty".into()));
        }

        if !(self.rendezvous_address.starts_with("http://")
            || self.rendezvous_address.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "Rendezvous address must be an http(s) URL, got '{}'",
                self.rendezvous_address
            )));
        }

        let labels = self.channels.all();
        for (i, label) in labels.iter().enumerate() {
            if label.is_empty() {
                return Err(ConfigError::Invalid("Channel label is empty".into()));
            }
            if labels[..i].contains(label) {
                return Err(ConfigError::Invalid(format!(
                    "Channel label '{}' is used more than once",
                    label
                )));
            }
        }

        if self.max_chunk == 0 {
            return Err(ConfigError::Invalid("max_chunk must be positive".into()));
        }

        if self.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "refresh_interval_ms must be positive".into(),
            ));
        }

        if self.use_external_relay && self.ice_servers.is_empty() {
            return Err(ConfigError::Invalid(
                "External relay enabled but no ICE servers configured".into(),
            ));
        }

        Ok(())
    }

    /// ICE servers to hand to the peer transport.
    ///
    /// Empty unless the external relay is enabled (LAN-only operation).
    pub fn active_ice_servers(&self) -> Vec<String> {
        if self.use_external_relay {
            self.ice_servers.clone()
        } else {
            Vec::new()
        }
    }

    pub fn signaling_timeout(&self) -> Duration {
        Duration::from_secs(self.signaling_timeout_secs)
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_secs(self.gathering_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn control_plane_timeout(&self) -> Duration {
        Duration::from_millis(self.control_plane_timeout_ms)
    }
}
