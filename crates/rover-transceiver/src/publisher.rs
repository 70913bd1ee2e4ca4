// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Re-publishes drive commands from the console to on-board consumers.
//!
//! Commands are taken from the controller queue in arrival order, wrapped in
//! a `SensorOutput` and sent on a ZeroMQ PUB socket. Without a configured
//! address the queue is drained so it never grows unbounded.

use prost::Message;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

use crate::wire::{sensor_output, ControllerOutput, SensorOutput};

/// Sensor id under which console drive commands are published.
pub const CONTROLLER_SENSOR_ID: u32 = 1;

/// Wrap a drive command for publication.
pub fn controller_sensor_output(output: ControllerOutput) -> SensorOutput {
    SensorOutput {
        sensor_id: CONTROLLER_SENSOR_ID,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
        output: Some(sensor_output::Output::ControllerOutput(output)),
    }
}

/// Publish every queued drive command on `address` until the queue closes.
pub async fn run_controller_publisher(
    address: String,
    mut queue: mpsc::UnboundedReceiver<ControllerOutput>,
) {
    let mut socket = PubSocket::new();
    if let Err(e) = socket.bind(&address).await {
        tracing::error!("Cannot bind controller publisher on {}: {}", address, e);
        drain_controller_queue(queue).await;
        return;
    }
    tracing::info!("Publishing drive commands on {}", address);

    while let Some(output) = queue.recv().await {
        let payload = controller_sensor_output(output).encode_to_vec();
        if let Err(e) = socket.send(ZmqMessage::from(payload)).await {
            tracing::warn!("Failed to publish drive command: {}", e);
        }
    }
    tracing::debug!("Controller queue closed, publisher stopping");
}

/// Consume and discard queued drive commands.
pub async fn drain_controller_queue(mut queue: mpsc::UnboundedReceiver<ControllerOutput>) {
    while let Some(output) = queue.recv().await {
        tracing::trace!(
            "Drive command without consumer: steering {:.2}, throttle {:.2}/{:.2}",
            output.steering_angle,
            output.left_throttle,
            output.right_throttle
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_controller_output() {
        let output = ControllerOutput {
            steering_angle: -0.3,
            left_throttle: 1.0,
            right_throttle: 0.5,
            front_lights: false,
        };
        let wrapped = controller_sensor_output(output.clone());

        assert_eq!(wrapped.sensor_id, CONTROLLER_SENSOR_ID);
        assert!(wrapped.timestamp > 0);
        assert_eq!(
            wrapped.output,
            Some(sensor_output::Output::ControllerOutput(output))
        );
    }

    #[tokio::test]
    async fn test_drain_ends_when_queue_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ControllerOutput::default()).unwrap();
        drop(tx);
        drain_controller_queue(rx).await;
    }
}
