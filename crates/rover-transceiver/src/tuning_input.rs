// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw tuning-state input harness.
//!
//! A TCP listener for test rigs and fuzzers: each connection is read to EOF,
//! the bytes are decoded as a `TuningState`, and the result goes through the
//! same forwarding path as tuning updates from the console.

use prost::Message;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use crate::control_plane::ControlPlane;
use crate::inbound::InboundRouter;
use crate::wire::TuningState;

/// Upper bound on a single harness submission.
const MAX_SUBMISSION: u64 = 1024 * 1024;

/// Bind `address` and serve submissions until the task is aborted.
pub async fn serve_tuning_input<C: ControlPlane>(
    address: &str,
    router: Arc<InboundRouter<C>>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    tracing::info!("Tuning input harness listening on {}", listener.local_addr()?);
    accept_loop(listener, router).await;
    Ok(())
}

/// Serve submissions on an already bound listener.
pub async fn accept_loop<C: ControlPlane>(listener: TcpListener, router: Arc<InboundRouter<C>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!("Tuning submission from {}", peer);
                let router = router.clone();
                tokio::spawn(async move {
                    handle_submission(stream, &router).await;
                });
            }
            Err(e) => {
                tracing::warn!("Tuning input accept failed: {}", e);
            }
        }
    }
}

async fn handle_submission<C: ControlPlane>(stream: TcpStream, router: &InboundRouter<C>) {
    let mut body = Vec::new();
    if let Err(e) = stream.take(MAX_SUBMISSION).read_to_end(&mut body).await {
        tracing::warn!("Tuning submission read failed: {}", e);
        return;
    }

    match TuningState::decode(body.as_slice()) {
        Ok(state) => {
            router.forward_tuning(state).await;
        }
        Err(e) => {
            tracing::warn!("Discarding malformed tuning submission ({} bytes): {}", body.len(), e);
        }
    }
}
