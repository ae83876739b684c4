use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use super::{EdgeResult, EdgeSource, SensorError};
use crate::time::Clock;

/// Edges delivered over a channel, one `()` per pulse. Each pulse is
/// stamped with the clock when it is received.
pub struct ChannelEdgeSource {
    pulses: Receiver<()>,
    clock: Clock,
}

impl ChannelEdgeSource {
    pub fn new(pulses: Receiver<()>, clock: Clock) -> Self {
        Self { pulses, clock }
    }
}

impl EdgeSource for ChannelEdgeSource {
    fn wait_for_rising_edge(&mut self, timeout: Duration) -> Result<EdgeResult, SensorError> {
        match self.pulses.recv_timeout(timeout) {
            Ok(()) => Ok(EdgeResult::Edge(self.clock.now())),
            Err(RecvTimeoutError::Timeout) => Ok(EdgeResult::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(SensorError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;
    use std::sync::mpsc;

    #[test]
    fn pulse_then_timeout_then_disconnect() {
        let (tx, rx) = mpsc::channel();
        let mut source = ChannelEdgeSource::new(rx, Clock::starting_at(Timestamp(100.0)));

        tx.send(()).unwrap();
        match source.wait_for_rising_edge(Duration::from_millis(10)).unwrap() {
            EdgeResult::Edge(at) => assert!(at >= Timestamp(100.0)),
            EdgeResult::TimedOut => panic!("expected an edge"),
        }

        assert_eq!(
            source.wait_for_rising_edge(Duration::from_millis(10)).unwrap(),
            EdgeResult::TimedOut
        );

        drop(tx);
        assert!(matches!(
            source.wait_for_rising_edge(Duration::from_millis(10)),
            Err(SensorError::Disconnected)
        ));
    }
}
