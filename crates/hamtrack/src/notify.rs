//! Best-effort push notifications for session starts and finishes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::session::{FinishedSession, SessionOutcome};

/// Payload pushed to subscribers. Serializes with an `event` tag:
/// `{"event":"session_started","start_ms":...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    SessionStarted {
        start_ms: i64,
    },
    SessionFinished {
        start_ms: i64,
        /// Minutes, one decimal.
        duration_min: String,
        /// Metres, one decimal.
        distance_m: String,
        revolutions: u32,
    },
}

impl Notification {
    pub fn finished(session: &FinishedSession) -> Self {
        let metrics = session.metrics();
        Notification::SessionFinished {
            start_ms: session.start.as_millis(),
            duration_min: format!("{:.1}", metrics.duration_min()),
            distance_m: format!("{:.1}", metrics.distance_m()),
            revolutions: session.revolutions,
        }
    }

    /// Aborted sessions are not announced.
    pub fn for_outcome(outcome: &SessionOutcome) -> Option<Self> {
        match outcome {
            SessionOutcome::Started { start } => Some(Notification::SessionStarted {
                start_ms: start.as_millis(),
            }),
            SessionOutcome::Finished(session) => Some(Self::finished(session)),
            SessionOutcome::Aborted { .. } => None,
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            Notification::SessionStarted { .. } => "session_started",
            Notification::SessionFinished { .. } => "session_finished",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notification endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// Deliver once. Callers log failures and move on.
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct PushMessage<'a> {
    to: String,
    data: &'a Notification,
}

/// Topic push over HTTP in the FCM legacy shape.
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
    topic: String,
    api_key: Option<String>,
}

impl HttpNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        topic: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            topic: topic.into(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl NotificationPort for HttpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = PushMessage {
            to: format!("/topics/{}", self.topic),
            data: notification,
        };

        let mut request = self.client.post(&self.endpoint).json(&message);
        if let Some(key) = &self.api_key {
            request = request.header(reqwest::header::AUTHORIZATION, format!("key={key}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Used when no push endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationPort for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification).unwrap_or_default();
        info!(event = notification.event(), %payload, "notification (no endpoint configured)");
        Ok(())
    }
}
