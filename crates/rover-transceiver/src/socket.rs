// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber sockets on service endpoints.
//!
//! The aggregator only needs a non-blocking receive and an explicit close, so
//! sockets sit behind [`EndpointSocket`] / [`SocketFactory`]. The production
//! implementation is a ZeroMQ SUB socket driven by a background task that
//! feeds a bounded queue; [`EndpointSocket::try_recv`] drains that queue
//! without ever waiting.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use zeromq::{Socket, SocketRecv, SubSocket, ZmqMessage};

use crate::aggregator::Endpoint;

/// Messages buffered per subscription before the reader task applies
/// backpressure to the socket.
const RECV_QUEUE_DEPTH: usize = 1024;

const SUPPORTED_SCHEMES: [&str; 2] = ["tcp://", "ipc://"];

/// Socket errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("invalid endpoint address '{0}'")]
    InvalidAddress(String),

    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("receive failed on {address}: {reason}")]
    Receive { address: String, reason: String },

    #[error("subscription to {0} is disconnected")]
    Disconnected(String),
}

/// A subscriber connection to one endpoint.
pub trait EndpointSocket: Send + Sync + 'static {
    /// Return the next pending message, or `None` immediately if there is
    /// nothing to read.
    fn try_recv(&self) -> Result<Option<Bytes>, SocketError>;

    /// False once the connection can no longer deliver messages.
    fn is_alive(&self) -> bool;

    /// Tear the connection down.
    fn close(self);
}

/// Opens subscriber sockets for endpoints.
pub trait SocketFactory: Send + Sync + 'static {
    type Socket: EndpointSocket;

    fn open(&self, endpoint: &Endpoint) -> Result<Self::Socket, SocketError>;
}

/// Services announce binds on `*`; subscribers must dial a concrete host.
pub fn connect_address(address: &str) -> Result<String, SocketError> {
    if !SUPPORTED_SCHEMES.iter().any(|scheme| address.starts_with(scheme)) {
        return Err(SocketError::InvalidAddress(address.to_string()));
    }
    Ok(address.replace('*', "localhost"))
}

/// Opens ZeroMQ SUB sockets subscribed to every topic.
#[derive(Debug, Clone)]
pub struct ZmqSocketFactory {
    runtime: Handle,
}

impl ZmqSocketFactory {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl SocketFactory for ZmqSocketFactory {
    type Socket = ZmqSubscriber;

    fn open(&self, endpoint: &Endpoint) -> Result<ZmqSubscriber, SocketError> {
        let address = connect_address(&endpoint.address)?;
        let (tx, rx) = mpsc::channel(RECV_QUEUE_DEPTH);
        let task = self.runtime.spawn(subscriber_task(address.clone(), tx));
        tracing::debug!("Subscribing to {} ({})", endpoint.name, address);

        Ok(ZmqSubscriber {
            address,
            rx: Mutex::new(rx),
            task,
            reported: AtomicBool::new(false),
        })
    }
}

/// SUB socket handle; the socket itself lives in the reader task.
pub struct ZmqSubscriber {
    address: String,
    rx: Mutex<mpsc::Receiver<Result<Bytes, SocketError>>>,
    task: JoinHandle<()>,
    reported: AtomicBool,
}

impl ZmqSubscriber {
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl EndpointSocket for ZmqSubscriber {
    fn try_recv(&self) -> Result<Option<Bytes>, SocketError> {
        match self.rx.lock().try_recv() {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(e)) => {
                self.reported.store(true, Ordering::Relaxed);
                Err(e)
            }
            Err(TryRecvError::Empty) => Ok(None),
            // A dead reader is reported once; later polls stay quiet.
            Err(TryRecvError::Disconnected) => {
                if self.reported.swap(true, Ordering::Relaxed) {
                    Ok(None)
                } else {
                    Err(SocketError::Disconnected(self.address.clone()))
                }
            }
        }
    }

    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    fn close(self) {
        self.task.abort();
        tracing::debug!("Closed subscription to {}", self.address);
    }
}

async fn subscriber_task(address: String, tx: mpsc::Sender<Result<Bytes, SocketError>>) {
    let mut socket = SubSocket::new();

    if let Err(e) = socket.connect(&address).await {
        let _ = tx
            .send(Err(SocketError::Connect {
                address,
                reason: e.to_string(),
            }))
            .await;
        return;
    }

    if let Err(e) = socket.subscribe("").await {
        let _ = tx
            .send(Err(SocketError::Connect {
                address,
                reason: e.to_string(),
            }))
            .await;
        return;
    }

    loop {
        match socket.recv().await {
            Ok(message) => {
                if tx.send(Ok(flatten(message))).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx
                    .send(Err(SocketError::Receive {
                        address: address.clone(),
                        reason: e.to_string(),
                    }))
                    .await;
                break;
            }
        }
    }
}

/// Multipart messages are relayed as the concatenation of their frames.
fn flatten(message: ZmqMessage) -> Bytes {
    let mut frames = message.into_vec();
    if frames.len() == 1 {
        return frames.remove(0);
    }
    let mut joined = BytesMut::with_capacity(frames.iter().map(Bytes::len).sum());
    for frame in frames {
        joined.extend_from_slice(&frame);
    }
    joined.freeze()
}
