//! The detection loop: edge source → debouncer → session tracker → sink.
//!
//! Runs on one dedicated thread that owns all session state. Waits on the
//! edge source are cut into slices so cancellation is noticed within one
//! slice, while the session timeout is measured across slices and restarts
//! on every raw edge.

use std::time::{Duration, Instant};

use hamconf::HamConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::debounce::Debouncer;
use crate::dispatch::OutcomeSink;
use crate::edge::{EdgeResult, EdgeSource, SensorError};
use crate::session::{SessionOutcome, SessionState, SessionTracker, TrackerConfig};
use crate::time::{Clock, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunLoopConfig {
    pub debounce: Duration,
    pub session_timeout: Duration,
    pub poll_slice: Duration,
    pub activation_threshold: u32,
    pub circumference_cm: f64,
}

impl RunLoopConfig {
    pub fn from_config(config: &HamConfig) -> Self {
        Self {
            debounce: config.wheel.debounce(),
            session_timeout: config.wheel.session_timeout(),
            poll_slice: config.sensor.poll_slice(),
            activation_threshold: config.wheel.activation_threshold,
            circumference_cm: config.wheel.circumference_cm,
        }
    }

    fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            activation_threshold: self.activation_threshold,
            session_timeout: self.session_timeout,
            circumference_cm: self.circumference_cm,
        }
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub revolutions: u64,
    /// Raw edges dropped by the debouncer.
    pub bounces: u64,
    pub sessions_started: u64,
    pub sessions_finished: u64,
    pub sessions_aborted: u64,
}

/// Debouncer plus tracker, fed one wait result at a time. No I/O.
#[derive(Debug, Clone)]
pub struct SessionPipeline {
    debouncer: Debouncer,
    tracker: SessionTracker,
    summary: RunSummary,
}

impl SessionPipeline {
    pub fn new(config: &RunLoopConfig) -> Self {
        Self {
            debouncer: Debouncer::new(config.debounce),
            tracker: SessionTracker::new(config.tracker()),
            summary: RunSummary::default(),
        }
    }

    /// Feed one wait result. `now` is when a timeout fired; edges carry
    /// their own timestamp.
    pub fn step(&mut self, result: EdgeResult, now: Timestamp) -> Option<SessionOutcome> {
        let outcome = match result {
            EdgeResult::Edge(at) => {
                let Some(event) = self.debouncer.accept(at) else {
                    self.summary.bounces += 1;
                    return None;
                };
                self.summary.revolutions += 1;
                let outcome = self.tracker.on_revolution(&event);
                match event.since_previous {
                    Some(dt) => debug!(
                        "Revolution {} (dt {:.3}s)",
                        self.tracker.state().revolution_count(),
                        dt
                    ),
                    None => debug!("Revolution {}", self.tracker.state().revolution_count()),
                }
                outcome
            }
            EdgeResult::TimedOut => self.tracker.on_timeout(now),
        }?;

        match &outcome {
            SessionOutcome::Started { start } => {
                self.summary.sessions_started += 1;
                info!("Session started at {}", start);
            }
            SessionOutcome::Finished(session) => {
                self.summary.sessions_finished += 1;
                let metrics = session.metrics();
                info!(
                    "Session finished: start {}, {:.1}s, {:.1}m, {} revolutions",
                    session.start,
                    metrics.duration_s,
                    metrics.distance_m(),
                    session.revolutions
                );
            }
            SessionOutcome::Aborted {
                start,
                revolutions,
                reason,
            } => {
                self.summary.sessions_aborted += 1;
                info!(
                    "Session from {} aborted after {} revolutions: {}",
                    start, revolutions, reason
                );
            }
        }
        Some(outcome)
    }

    pub fn state(&self) -> &SessionState {
        self.tracker.state()
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }
}

pub struct RunLoop<E: EdgeSource, S: OutcomeSink> {
    source: E,
    sink: S,
    clock: Clock,
    config: RunLoopConfig,
    pipeline: SessionPipeline,
}

impl<E: EdgeSource, S: OutcomeSink> RunLoop<E, S> {
    pub fn new(source: E, sink: S, clock: Clock, config: RunLoopConfig) -> Self {
        Self {
            pipeline: SessionPipeline::new(&config),
            source,
            sink,
            clock,
            config,
        }
    }

    /// Feed one wait result and dispatch whatever it produces.
    pub fn step(&mut self, result: EdgeResult, now: Timestamp) -> Option<SessionOutcome> {
        let outcome = self.pipeline.step(result, now)?;
        self.sink.dispatch(&outcome);
        Some(outcome)
    }

    pub fn state(&self) -> &SessionState {
        self.pipeline.state()
    }

    /// Run until `cancel` fires. A sensor error ends the loop and is
    /// returned. The edge source is dropped on return either way.
    pub fn run(mut self, cancel: &CancellationToken) -> Result<RunSummary, SensorError> {
        let timeout = self.config.session_timeout;
        let slice = self.config.poll_slice.max(Duration::from_millis(1));
        info!(
            "Watching wheel: timeout {:?}, debounce {:?}, threshold {}",
            timeout, self.config.debounce, self.config.activation_threshold
        );

        let mut window_start = Instant::now();
        while !cancel.is_cancelled() {
            let elapsed = window_start.elapsed();
            if elapsed >= timeout {
                self.step(EdgeResult::TimedOut, self.clock.now());
                window_start = Instant::now();
                continue;
            }

            match self.source.wait_for_rising_edge((timeout - elapsed).min(slice))? {
                EdgeResult::Edge(at) => {
                    window_start = Instant::now();
                    self.step(EdgeResult::Edge(at), at);
                }
                EdgeResult::TimedOut => {}
            }
        }

        let summary = self.pipeline.summary();
        info!(
            "Stopped: {} revolutions, {} sessions finished, {} aborted",
            summary.revolutions, summary.sessions_finished, summary.sessions_aborted
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunLoopConfig {
        RunLoopConfig {
            debounce: Duration::from_millis(250),
            session_timeout: Duration::from_secs(60),
            poll_slice: Duration::from_millis(500),
            activation_threshold: 3,
            circumference_cm: 88.0,
        }
    }

    #[test]
    fn bounces_are_counted_but_not_tracked() {
        let mut p = SessionPipeline::new(&config());
        for t in [0.0, 0.05, 0.1, 0.3] {
            p.step(EdgeResult::Edge(Timestamp(t)), Timestamp(t));
        }
        let summary = p.summary();
        assert_eq!(summary.revolutions, 2);
        assert_eq!(summary.bounces, 2);
        assert_eq!(p.state().revolution_count(), 2);
    }

    #[test]
    fn step_dispatches_to_the_sink() {
        struct NoEdges;
        impl EdgeSource for NoEdges {
            fn wait_for_rising_edge(&mut self, _: Duration) -> Result<EdgeResult, SensorError> {
                Ok(EdgeResult::TimedOut)
            }
        }

        let mut run = RunLoop::new(NoEdges, Vec::new(), Clock::new(), config());
        for t in [0.0, 1.0, 2.0, 3.0] {
            run.step(EdgeResult::Edge(Timestamp(t)), Timestamp(t));
        }
        let finished = run.step(EdgeResult::TimedOut, Timestamp(63.0));
        assert!(matches!(finished, Some(SessionOutcome::Finished(_))));
        assert_eq!(run.sink.len(), 2);
        assert!(matches!(run.sink[0], SessionOutcome::Started { .. }));
    }

    #[test]
    fn cancelled_before_start_returns_empty_summary() {
        struct Unreachable;
        impl EdgeSource for Unreachable {
            fn wait_for_rising_edge(&mut self, _: Duration) -> Result<EdgeResult, SensorError> {
                panic!("should not wait once cancelled");
            }
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = RunLoop::new(Unreachable, Vec::new(), Clock::new(), config());
        assert_eq!(run.run(&cancel).unwrap(), RunSummary::default());
    }
}
