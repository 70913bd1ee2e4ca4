// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP client for the rendezvous server.
//!
//! Session establishment is two exchanges:
//!
//! 1. `POST {base}/car/sdp` with the local offer; the reply is the remote
//!    answer, or an error envelope `{"error": true, "message": ...}`.
//! 2. `POST {base}/car/ice` once per local ICE candidate; each reply is a
//!    list of remote candidates.
//!
//! The error envelope is tried first on every reply body, whatever the
//! HTTP status.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

const SDP_PATH: &str = "/car/sdp";
const ICE_PATH: &str = "/car/ice";

/// Signaling errors.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rendezvous server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rendezvous server rejected the request: {message}")]
    Rejected { message: String },

    #[error("malformed rendezvous reply: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct SdpRequest<'a> {
    offer: &'a RTCSessionDescription,
    id: &'a str,
    timestamp: i64,
}

#[derive(Serialize)]
struct IceRequest<'a> {
    candidate: &'a RTCIceCandidateInit,
    id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointError {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: String,
}

/// Rendezvous client bound to one server and one robot identity.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    client: Client,
    base_url: String,
    identity: String,
}

impl SignalingClient {
    pub fn new(
        base_url: impl Into<String>,
        identity: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SignalingError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity: identity.into(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Submit the local offer and return the remote answer.
    pub async fn negotiate(
        &self,
        offer: &RTCSessionDescription,
    ) -> Result<RTCSessionDescription, SignalingError> {
        let request = SdpRequest {
            offer,
            id: &self.identity,
            timestamp: unix_millis(),
        };
        let body = self.post(SDP_PATH, &request).await?;
        let answer = parse_answer(&body)?;
        tracing::info!("Received {} from rendezvous server", answer.sdp_type);
        Ok(answer)
    }

    /// Submit one local candidate and return the remote candidates.
    pub async fn exchange_candidate(
        &self,
        candidate: &RTCIceCandidateInit,
    ) -> Result<Vec<RTCIceCandidateInit>, SignalingError> {
        let request = IceRequest {
            candidate,
            id: &self.identity,
        };
        let body = self.post(ICE_PATH, &request).await?;
        parse_candidates(&body)
    }

    /// Submit every local candidate in order and merge the replies.
    pub async fn exchange_candidates(
        &self,
        candidates: &[RTCIceCandidateInit],
    ) -> Result<Vec<RTCIceCandidateInit>, SignalingError> {
        let mut remote = Vec::new();
        for candidate in candidates {
            for received in self.exchange_candidate(candidate).await? {
                if !remote
                    .iter()
                    .any(|known: &RTCIceCandidateInit| known.candidate == received.candidate)
                {
                    remote.push(received);
                }
            }
        }
        tracing::debug!(
            "Exchanged {} local candidates, received {} remote",
            candidates.len(),
            remote.len()
        );
        Ok(remote)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        request: &T,
    ) -> Result<Vec<u8>, SignalingError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();

        check_rejection(&body)?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            tracing::warn!("Rendezvous request to {} failed: {} - {}", url, status, body);
            return Err(SignalingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

fn check_rejection(body: &[u8]) -> Result<(), SignalingError> {
    match serde_json::from_slice::<EndpointError>(body) {
        Ok(envelope) if envelope.error => Err(SignalingError::Rejected {
            message: envelope.message,
        }),
        _ => Ok(()),
    }
}

/// Decode an `/sdp` reply body.
pub fn parse_answer(body: &[u8]) -> Result<RTCSessionDescription, SignalingError> {
    check_rejection(body)?;
    Ok(serde_json::from_slice(body)?)
}

/// Decode an `/ice` reply body.
pub fn parse_candidates(body: &[u8]) -> Result<Vec<RTCIceCandidateInit>, SignalingError> {
    check_rejection(body)?;
    Ok(serde_json::from_slice(body)?)
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    #[test]
    fn test_parse_answer() {
        let answer = parse_answer(br#"{"type":"answer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(answer.sdp_type, RTCSdpType::Answer);
        assert_eq!(answer.sdp, "v=0\r\n");
    }

    #[test]
    fn test_parse_rejection() {
        let err = parse_answer(br#"{"error":true,"message":"unknown car"}"#).unwrap_err();
        match err {
            SignalingError::Rejected { message } => assert_eq!(message, "unknown car"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_false_is_not_a_rejection() {
        assert!(check_rejection(br#"{"error":false}"#).is_ok());
        assert!(check_rejection(b"[]").is_ok());
    }

    #[test]
    fn test_parse_candidates() {
        let candidates = parse_candidates(
            br#"[{"candidate":"candidate:1 1 udp 2130706431 10.0.0.5 50000 typ host","sdpMid":"0","sdpMLineIndex":0}]"#,
        )
        .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].candidate.contains("10.0.0.5"));
        assert_eq!(candidates[0].sdp_mid.as_deref(), Some("0"));
    }

    #[test]
    fn test_malformed_reply() {
        assert!(matches!(
            parse_candidates(b"not json"),
            Err(SignalingError::Decode(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let candidate = RTCIceCandidateInit {
            candidate: "candidate:x".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(IceRequest {
            candidate: &candidate,
            id: "car",
        })
        .unwrap();
        assert_eq!(value["id"], "car");
        assert_eq!(value["candidate"]["candidate"], "candidate:x");
    }
}
