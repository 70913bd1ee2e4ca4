// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! Rendezvous client against a stub HTTP server.

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use rover_transceiver::signaling::{SignalingClient, SignalingError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

async fn spawn_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let address = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{}", address)
}

fn client(base: &str) -> SignalingClient {
    SignalingClient::new(base, "car", Duration::from_secs(5)).expect("client")
}

fn offer() -> RTCSessionDescription {
    serde_json::from_value(json!({"type": "offer", "sdp": "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n"}))
        .expect("offer")
}

fn candidate(text: &str) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: text.to_string(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_negotiate_posts_offer_and_returns_answer() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let recorder = seen.clone();
    let app = Router::new().route(
        "/car/sdp",
        post(move |Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().push(body);
                Json(json!({"type": "answer", "sdp": "v=0\r\nanswer\r\n"}))
            }
        }),
    );
    let base = spawn_stub(app).await;

    let answer = client(&base).negotiate(&offer()).await.expect("answer");

    assert_eq!(answer.sdp_type, RTCSdpType::Answer);
    assert_eq!(answer.sdp, "v=0\r\nanswer\r\n");

    let requests = seen.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["id"], "car");
    assert_eq!(requests[0]["offer"]["type"], "offer");
    assert!(requests[0]["timestamp"].as_i64().expect("timestamp") > 0);
}

#[tokio::test]
async fn test_negotiate_rejected() {
    let app = Router::new().route(
        "/car/sdp",
        post(|| async { Json(json!({"error": true, "message": "car not registered"})) }),
    );
    let base = spawn_stub(app).await;

    match client(&base).negotiate(&offer()).await {
        Err(SignalingError::Rejected { message }) => assert_eq!(message, "car not registered"),
        other => panic!("expected rejection, got {:?}", other.map(|a| a.sdp)),
    }
}

#[tokio::test]
async fn test_negotiate_rejected_with_error_status() {
    let app = Router::new().route(
        "/car/sdp",
        post(|| async {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": true, "message": "stale offer"})),
            )
        }),
    );
    let base = spawn_stub(app).await;

    assert!(matches!(
        client(&base).negotiate(&offer()).await,
        Err(SignalingError::Rejected { .. })
    ));
}

#[tokio::test]
async fn test_server_error_without_envelope() {
    let app = Router::new().route(
        "/car/sdp",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base = spawn_stub(app).await;

    match client(&base).negotiate(&offer()).await {
        Err(SignalingError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected status error, got {:?}", other.map(|a| a.sdp)),
    }
}

#[tokio::test]
async fn test_malformed_answer() {
    let app = Router::new().route("/car/sdp", post(|| async { "not json" }));
    let base = spawn_stub(app).await;

    assert!(matches!(
        client(&base).negotiate(&offer()).await,
        Err(SignalingError::Decode(_))
    ));
}

#[tokio::test]
async fn test_candidates_posted_individually_and_merged() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let recorder = seen.clone();
    let app = Router::new().route(
        "/car/ice",
        post(move |Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().push(body);
                Json(json!([
                    {"candidate": "candidate:remote 1 udp 1 10.0.0.9 4000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
                ]))
            }
        }),
    );
    let base = spawn_stub(app).await;

    let local = vec![
        candidate("candidate:a 1 udp 1 10.0.0.2 5000 typ host"),
        candidate("candidate:b 1 udp 1 192.168.1.2 5001 typ host"),
    ];
    let remote = client(&base)
        .exchange_candidates(&local)
        .await
        .expect("candidates");

    assert_eq!(remote.len(), 1);
    assert!(remote[0].candidate.contains("10.0.0.9"));

    let requests = seen.lock();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["id"], "car");
    assert!(requests[0]["candidate"]["candidate"]
        .as_str()
        .expect("candidate text")
        .contains("10.0.0.2"));
    assert!(requests[1]["candidate"]["candidate"]
        .as_str()
        .expect("candidate text")
        .contains("192.168.1.2"));
}

#[tokio::test]
async fn test_no_local_candidates_sends_nothing() {
    let remote = client("http://127.0.0.1:9")
        .exchange_candidates(&[])
        .await
        .expect("empty exchange");
    assert!(remote.is_empty());
}

#[tokio::test]
async fn test_unreachable_server() {
    let result = client("http://127.0.0.1:9").negotiate(&offer()).await;
    assert!(matches!(result, Err(SignalingError::Http(_))));
}
