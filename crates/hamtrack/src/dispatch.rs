//! Hands session outcomes to the notifier and the store without blocking
//! the run loop.
//!
//! Two bounded queues feed two workers. The run loop only ever calls
//! `try_send`; a full queue costs a notification or, for records, a direct
//! write to the fallback log, never a stall in edge detection.

use std::sync::Arc;
use std::time::Duration;

use hamstore::{FallbackLog, PersistencePort, RetryPolicy, SessionRecord, StoreError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notify::{Notification, NotificationPort};
use crate::session::{FinishedSession, SessionOutcome};

/// Anything the run loop can hand outcomes to.
pub trait OutcomeSink {
    fn dispatch(&mut self, outcome: &SessionOutcome);
}

impl OutcomeSink for Vec<SessionOutcome> {
    fn dispatch(&mut self, outcome: &SessionOutcome) {
        self.push(*outcome);
    }
}

impl OutcomeSink for std::sync::mpsc::Sender<SessionOutcome> {
    fn dispatch(&mut self, outcome: &SessionOutcome) {
        if self.send(*outcome).is_err() {
            debug!("Outcome receiver gone, dropping {:?}", outcome);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub notify_queue: usize,
    pub persist_queue: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            notify_queue: 16,
            persist_queue: 16,
            retry: RetryPolicy::default(),
        }
    }
}

pub fn session_record(session: &FinishedSession) -> SessionRecord {
    let metrics = session.metrics();
    SessionRecord {
        start: session.start.to_datetime(),
        circumference: session.circumference_cm,
        duration: metrics.duration_s,
        distance: metrics.distance_cm,
    }
}

/// Handle owned by the run loop. Dropping it closes both queues.
pub struct Dispatcher {
    notify_tx: mpsc::Sender<Notification>,
    persist_tx: mpsc::Sender<SessionRecord>,
    fallback: FallbackLog,
}

/// The spawned workers, kept by whoever shuts the process down.
pub struct DispatchWorkers {
    notifier: JoinHandle<()>,
    persister: JoinHandle<()>,
    stop: CancellationToken,
}

impl Dispatcher {
    /// Start both workers on the current tokio runtime.
    pub fn spawn(
        notifier: Arc<dyn NotificationPort>,
        store: Arc<dyn PersistencePort>,
        fallback: FallbackLog,
        config: DispatchConfig,
    ) -> (Self, DispatchWorkers) {
        let (notify_tx, notify_rx) = mpsc::channel(config.notify_queue.max(1));
        let (persist_tx, persist_rx) = mpsc::channel(config.persist_queue.max(1));

        let stop = CancellationToken::new();
        let workers = DispatchWorkers {
            notifier: tokio::spawn(run_notifier(notifier, notify_rx)),
            persister: tokio::spawn(run_persister(
                store,
                fallback.clone(),
                config.retry,
                persist_rx,
                stop.clone(),
            )),
            stop,
        };

        let dispatcher = Self {
            notify_tx,
            persist_tx,
            fallback,
        };
        (dispatcher, workers)
    }

    fn enqueue_notification(&self, notification: Notification) {
        match self.notify_tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                warn!("Notification queue full, dropping {}", n.event());
            }
            Err(TrySendError::Closed(n)) => {
                warn!("Notifier stopped, dropping {}", n.event());
            }
        }
    }

    fn enqueue_record(&self, record: SessionRecord) {
        let record = match self.persist_tx.try_send(record) {
            Ok(()) => return,
            Err(TrySendError::Full(record)) => {
                warn!("Persistence queue full, writing {} to fallback log", record.start_key());
                record
            }
            Err(TrySendError::Closed(record)) => {
                warn!("Persistence worker stopped, writing {} to fallback log", record.start_key());
                record
            }
        };
        if let Err(e) = self.fallback.append(&record) {
            error!(
                "Session {} lost: fallback log {} failed: {}",
                record.start_key(),
                self.fallback.path().display(),
                e
            );
        }
    }
}

impl OutcomeSink for Dispatcher {
    fn dispatch(&mut self, outcome: &SessionOutcome) {
        if let Some(notification) = Notification::for_outcome(outcome) {
            self.enqueue_notification(notification);
        }
        if let SessionOutcome::Finished(session) = outcome {
            self.enqueue_record(session_record(session));
        }
    }
}

impl DispatchWorkers {
    /// Wait up to `grace` for both workers to drain their queues. Returns
    /// whether both finished in time.
    ///
    /// After the grace period pending notifications are dropped, while the
    /// persister is told to stop and writes its in-flight record and
    /// everything still queued to the fallback log before returning.
    ///
    /// The queues only close once the [`Dispatcher`] is dropped.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let DispatchWorkers {
            mut notifier,
            mut persister,
            stop,
        } = self;

        let mut persister_done = false;
        let drained = tokio::time::timeout(grace, async {
            let _ = (&mut persister).await;
            persister_done = true;
            let _ = (&mut notifier).await;
        })
        .await
        .is_ok();

        if !drained {
            warn!("Dispatch workers still busy after {:?}, spilling to fallback log", grace);
            notifier.abort();
            stop.cancel();
            if !persister_done {
                if let Err(e) = persister.await {
                    error!("Persistence worker failed during shutdown: {}", e);
                }
            }
        }
        drained
    }
}

async fn run_notifier(notifier: Arc<dyn NotificationPort>, mut rx: mpsc::Receiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        match notifier.notify(&notification).await {
            Ok(()) => debug!("Delivered {}", notification.event()),
            Err(e) => warn!("Failed to deliver {}: {}", notification.event(), e),
        }
    }
    debug!("Notifier worker stopped");
}

async fn run_persister(
    store: Arc<dyn PersistencePort>,
    fallback: FallbackLog,
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<SessionRecord>,
    stop: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            record = rx.recv() => match record {
                Some(record) => record,
                None => {
                    debug!("Persistence worker stopped");
                    return;
                }
            },
        };
        persist_record(Arc::clone(&store), &fallback, policy, record, &stop).await;
    }

    rx.close();
    let mut spilled = 0;
    while let Ok(record) = rx.try_recv() {
        if let PersistOutcome::FellBack { .. } = append_fallback(&fallback, record, 0).await {
            spilled += 1;
        }
    }
    info!("Persistence worker stopped, {} queued session(s) moved to fallback log", spilled);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Stored { attempts: u32 },
    FellBack { attempts: u32 },
    /// Neither the store nor the fallback log took the record.
    Lost,
}

/// Save one record, retrying transient failures per `policy`. Permanent
/// failures, exhausted retries and a cancelled `stop` go to the fallback log.
pub async fn persist_record(
    store: Arc<dyn PersistencePort>,
    fallback: &FallbackLog,
    policy: RetryPolicy,
    record: SessionRecord,
    stop: &CancellationToken,
) -> PersistOutcome {
    let key = record.start_key();
    let mut attempt = 1;

    loop {
        let result = {
            let store = Arc::clone(&store);
            let record = record.clone();
            let save = tokio::task::spawn_blocking(move || store.save(&record));
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    warn!("Shutting down while storing session {}", key);
                    break;
                }
                result = save => result,
            }
        };

        let err = match result {
            Ok(Ok(())) => {
                info!("Stored session {} after {} attempt(s)", key, attempt);
                return PersistOutcome::Stored { attempts: attempt };
            }
            Ok(Err(e)) => e,
            Err(join) => StoreError::Io(std::io::Error::other(join.to_string())),
        };

        if !err.is_transient() {
            error!("Cannot store session {}: {}", key, err);
            break;
        }

        match policy.delay_after(attempt) {
            Some(delay) => {
                warn!(
                    "Storing session {} failed (attempt {}/{}): {}; retrying in {:?}",
                    key, attempt, policy.max_attempts, err, delay
                );
                tokio::select! {
                    _ = stop.cancelled() => {
                        warn!("Shutting down, abandoning retries for session {}", key);
                        break;
                    }
                    _ = tokio::time::sleep(delay) => attempt += 1,
                }
            }
            None => {
                error!("Giving up on session {} after {} attempts: {}", key, attempt, err);
                break;
            }
        }
    }

    append_fallback(fallback, record, attempt).await
}

async fn append_fallback(fallback: &FallbackLog, record: SessionRecord, attempts: u32) -> PersistOutcome {
    let key = record.start_key();
    let log = fallback.clone();
    let appended = tokio::task::spawn_blocking(move || log.append(&record)).await;
    match appended {
        Ok(Ok(())) => {
            warn!("Session {} written to fallback log {}", key, fallback.path().display());
            PersistOutcome::FellBack { attempts }
        }
        Ok(Err(e)) => {
            error!("Session {} lost: fallback log failed: {}", key, e);
            PersistOutcome::Lost
        }
        Err(e) => {
            error!("Session {} lost: fallback task failed: {}", key, e);
            PersistOutcome::Lost
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;

    #[test]
    fn record_carries_unrounded_metrics() {
        let session = FinishedSession {
            start: Timestamp(1000.0),
            end: Timestamp(1045.0),
            revolutions: 20,
            circumference_cm: 88.0,
        };
        let record = session_record(&session);
        assert_eq!(record.start.timestamp_millis(), 1_000_000);
        assert_eq!(record.duration, 45.0);
        assert_eq!(record.distance, 1760.0);
        assert_eq!(record.circumference, 88.0);
    }

    #[test]
    fn channel_sink_forwards_outcomes() {
        let (mut tx, rx) = std::sync::mpsc::channel();
        let outcome = SessionOutcome::Started {
            start: Timestamp(3.0),
        };
        tx.dispatch(&outcome);
        assert_eq!(rx.try_recv().unwrap(), outcome);

        drop(rx);
        tx.dispatch(&outcome);
    }
}
