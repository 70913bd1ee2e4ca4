// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Classification and routing of console messages on the control channel.
//!
//! The control channel carries untagged protobuf payloads. Each payload is
//! tried against the known kinds in a fixed order and the first match wins:
//!
//! 1. `SensorOutput` holding a controller output: a drive command, queued
//!    for on-board consumers.
//! 2. `SystemManagerMessage` holding a tuning state: forwarded to the system
//!    manager for broadcast.
//!
//! Anything else is logged and dropped.

use prost::Message;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::control_plane::ControlPlane;
use crate::stats::RelayStats;
use crate::wire::{
    sensor_output, system_manager_message, ControllerOutput, SensorOutput, SystemManagerMessage,
    TuningState,
};

/// A recognised inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Controller(ControllerOutput),
    Tuning(TuningState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Controller,
    Tuning,
}

type ParseAttempt = fn(&[u8]) -> Option<Inbound>;

/// Ordered candidate kinds.
const INBOUND_KINDS: [(InboundKind, ParseAttempt); 2] = [
    (InboundKind::Controller, parse_controller),
    (InboundKind::Tuning, parse_tuning),
];

fn parse_controller(data: &[u8]) -> Option<Inbound> {
    match SensorOutput::decode(data).ok()?.output? {
        sensor_output::Output::ControllerOutput(output) => Some(Inbound::Controller(output)),
    }
}

fn parse_tuning(data: &[u8]) -> Option<Inbound> {
    match SystemManagerMessage::decode(data).ok()?.msg? {
        system_manager_message::Msg::TuningState(state) => Some(Inbound::Tuning(state)),
        _ => None,
    }
}

/// Identify an inbound payload, or `None` if it matches no known kind.
pub fn classify(data: &[u8]) -> Option<Inbound> {
    INBOUND_KINDS.iter().find_map(|(kind, parse)| {
        let parsed = parse(data);
        if parsed.is_none() {
            tracing::trace!("Inbound message is not {:?}", kind);
        }
        parsed
    })
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    ControllerQueued,
    TuningForwarded,
    TuningFailed,
    Dropped,
}

/// Routes classified control-channel messages to their consumers.
pub struct InboundRouter<C> {
    controller_queue: mpsc::UnboundedSender<ControllerOutput>,
    control: Arc<C>,
    stats: Arc<RelayStats>,
}

impl<C: ControlPlane> InboundRouter<C> {
    pub fn new(
        controller_queue: mpsc::UnboundedSender<ControllerOutput>,
        control: Arc<C>,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            controller_queue,
            control,
            stats,
        }
    }

    /// Handle one message from the control channel.
    ///
    /// Drive commands are queued synchronously, preserving channel order.
    /// Tuning updates are forwarded on a separate task.
    pub fn handle(self: &Arc<Self>, data: &[u8]) {
        match classify(data) {
            Some(Inbound::Controller(output)) => {
                self.queue_controller(output);
            }
            Some(Inbound::Tuning(state)) => {
                let router = Arc::clone(self);
                tokio::spawn(async move {
                    router.forward_tuning(state).await;
                });
            }
            None => self.drop_unknown(data),
        }
    }

    /// Classify and fully route one message, awaiting any forward.
    pub async fn route(&self, data: &[u8]) -> InboundOutcome {
        match classify(data) {
            Some(Inbound::Controller(output)) => {
                self.queue_controller(output);
                InboundOutcome::ControllerQueued
            }
            Some(Inbound::Tuning(state)) => {
                if self.forward_tuning(state).await {
                    InboundOutcome::TuningForwarded
                } else {
                    InboundOutcome::TuningFailed
                }
            }
            None => {
                self.drop_unknown(data);
                InboundOutcome::Dropped
            }
        }
    }

    /// Ask the system manager to broadcast `state`. Failures are logged.
    pub async fn forward_tuning(&self, state: TuningState) -> bool {
        tracing::debug!(
            "Forwarding tuning state with {} parameters",
            state.dynamic_parameters.len()
        );
        match self.control.broadcast_tuning_state(state).await {
            Ok(()) => {
                RelayStats::bump(&self.stats.tuning_updates);
                true
            }
            Err(e) => {
                tracing::error!("Failed to forward tuning state: {}", e);
                RelayStats::bump(&self.stats.control_plane_errors);
                false
            }
        }
    }

    fn queue_controller(&self, output: ControllerOutput) {
        if self.controller_queue.send(output).is_err() {
            tracing::warn!("Controller queue closed, dropping drive command");
            return;
        }
        RelayStats::bump(&self.stats.controller_commands);
    }

    fn drop_unknown(&self, data: &[u8]) {
        tracing::warn!("Unknown control message ({} bytes), dropped", data.len());
        RelayStats::bump(&self.stats.unknown_inbound);
    }
}
