// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply access to the system manager.
//!
//! The system manager owns the service registry and the tuning state. Every
//! exchange is one `SystemManagerMessage` request followed by one reply on a
//! REQ socket; a failed or timed-out exchange drops the socket so the next
//! call starts from a clean request state.

use prost::Message;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::wire::{system_manager_message::Msg, ServiceList, SystemManagerMessage, TuningState};

/// Control-plane errors.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("system manager transport error: {0}")]
    Transport(String),

    #[error("system manager did not answer within {0:?}")]
    Timeout(Duration),

    #[error("malformed reply from system manager: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unexpected reply from system manager: expected {expected}")]
    UnexpectedReply { expected: &'static str },
}

/// Operations the relay needs from the system manager.
pub trait ControlPlane: Send + Sync + 'static {
    /// Fetch the current service registry.
    fn get_all_services(
        &self,
    ) -> impl Future<Output = Result<ServiceList, ControlPlaneError>> + Send;

    /// Fetch the current tuning state.
    fn get_tuning_state(
        &self,
    ) -> impl Future<Output = Result<TuningState, ControlPlaneError>> + Send;

    /// Push a tuning state update to every on-board service.
    fn broadcast_tuning_state(
        &self,
        state: TuningState,
    ) -> impl Future<Output = Result<(), ControlPlaneError>> + Send;
}

/// ZeroMQ REQ client for the system manager.
pub struct ZmqControlPlane {
    address: String,
    timeout: Duration,
    socket: Mutex<Option<ReqSocket>>,
}

impl ZmqControlPlane {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            socket: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn request(
        &self,
        message: SystemManagerMessage,
    ) -> Result<SystemManagerMessage, ControlPlaneError> {
        let mut guard = self.socket.lock().await;

        if guard.is_none() {
            let mut socket = ReqSocket::new();
            tokio::time::timeout(self.timeout, socket.connect(&self.address))
                .await
                .map_err(|_| ControlPlaneError::Timeout(self.timeout))?
                .map_err(|e| ControlPlaneError::Transport(e.to_string()))?;
            tracing::debug!("Connected to system manager at {}", self.address);
            *guard = Some(socket);
        }
        let Some(socket) = guard.as_mut() else {
            return Err(ControlPlaneError::Transport("no socket".into()));
        };

        let exchange = async {
            socket
                .send(ZmqMessage::from(message.encode_to_vec()))
                .await
                .map_err(|e| ControlPlaneError::Transport(e.to_string()))?;
            let reply = socket
                .recv()
                .await
                .map_err(|e| ControlPlaneError::Transport(e.to_string()))?;
            let body: Vec<u8> = reply.into_vec().concat();
            Ok::<_, ControlPlaneError>(SystemManagerMessage::decode(body.as_slice())?)
        };

        let outcome = tokio::time::timeout(self.timeout, exchange).await;
        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                *guard = None;
                Err(e)
            }
            Err(_) => {
                *guard = None;
                Err(ControlPlaneError::Timeout(self.timeout))
            }
        }
    }
}

impl ControlPlane for ZmqControlPlane {
    async fn get_all_services(&self) -> Result<ServiceList, ControlPlaneError> {
        match self
            .request(SystemManagerMessage::service_list_request())
            .await?
            .msg
        {
            Some(Msg::ServiceList(list)) => Ok(list),
            _ => Err(ControlPlaneError::UnexpectedReply {
                expected: "service list",
            }),
        }
    }

    async fn get_tuning_state(&self) -> Result<TuningState, ControlPlaneError> {
        match self
            .request(SystemManagerMessage::tuning_state_request())
            .await?
            .msg
        {
            Some(Msg::TuningState(state)) => Ok(state),
            _ => Err(ControlPlaneError::UnexpectedReply {
                expected: "tuning state",
            }),
        }
    }

    async fn broadcast_tuning_state(&self, state: TuningState) -> Result<(), ControlPlaneError> {
        // The reply only acknowledges the broadcast.
        self.request(SystemManagerMessage::tuning_state(state))
            .await
            .map(|_| ())
    }
}
