//! HttpNotifier against a throwaway axum server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hamtrack::{HttpNotifier, Notification, NotificationPort, NotifyError};
use serde_json::Value;

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn capture(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    captured.requests.lock().unwrap().push((auth, body));
    StatusCode::OK
}

async fn reject() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "push backend down")
}

/// Serve `router` on an ephemeral port and return its base URL.
async fn serve(router: Router) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{}", addr))
}

#[tokio::test]
async fn test_posts_topic_message_with_key() -> Result<()> {
    let captured = Captured::default();
    let base = serve(
        Router::new()
            .route("/send", post(capture))
            .with_state(captured.clone()),
    )
    .await?;

    let notifier = HttpNotifier::new(
        format!("{}/send", base),
        "news",
        Some("secret".into()),
        Duration::from_secs(5),
    )?;
    notifier
        .notify(&Notification::SessionFinished {
            start_ms: 1_000_000,
            duration_min: "0.8".into(),
            distance_m: "17.6".into(),
            revolutions: 20,
        })
        .await?;

    let requests = captured.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("key=secret"));
    assert_eq!(
        body,
        &serde_json::json!({
            "to": "/topics/news",
            "data": {
                "event": "session_finished",
                "start_ms": 1_000_000,
                "duration_min": "0.8",
                "distance_m": "17.6",
                "revolutions": 20,
            }
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_no_key_means_no_authorization_header() -> Result<()> {
    let captured = Captured::default();
    let base = serve(
        Router::new()
            .route("/send", post(capture))
            .with_state(captured.clone()),
    )
    .await?;

    let notifier = HttpNotifier::new(format!("{}/send", base), "wheel", None, Duration::from_secs(5))?;
    notifier
        .notify(&Notification::SessionStarted { start_ms: 42 })
        .await?;

    let requests = captured.requests.lock().unwrap().clone();
    assert_eq!(requests[0].0, None);
    assert_eq!(requests[0].1["to"], "/topics/wheel");
    assert_eq!(requests[0].1["data"]["event"], "session_started");
    Ok(())
}

#[tokio::test]
async fn test_error_status_is_reported() -> Result<()> {
    let base = serve(Router::new().route("/send", post(reject))).await?;

    let notifier = HttpNotifier::new(format!("{}/send", base), "news", None, Duration::from_secs(5))?;
    let err = notifier
        .notify(&Notification::SessionStarted { start_ms: 1 })
        .await
        .unwrap_err();

    match err {
        NotifyError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "push backend down");
        }
        other => panic!("expected Status error, got {}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_request_error() -> Result<()> {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let notifier = HttpNotifier::new(
        format!("http://{}/send", addr),
        "news",
        None,
        Duration::from_millis(500),
    )?;
    let err = notifier
        .notify(&Notification::SessionStarted { start_ms: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::Request(_)));
    Ok(())
}
