//! Countdown barrier bridging inbound deliveries and the probing driver.
//!
//! [`WaitBarrier::arm`] spawns a matcher task that owns the connection's
//! delivery queue. It tests each message against a predicate and sends one
//! signal per match over a bounded channel; the driver is the only receiver.

use crate::transport::{Deliveries, InboundMessage};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierStatus {
    pub expected: usize,
    pub observed: usize,
    pub elapsed: Duration,
    /// The delivery queue ended before the barrier released.
    pub closed: bool,
}

impl BarrierStatus {
    pub fn released(&self) -> bool {
        self.observed == self.expected
    }

    pub fn remaining(&self) -> usize {
        self.expected - self.observed
    }
}

pub struct WaitBarrier {
    expected: usize,
    signals: mpsc::Receiver<()>,
    matcher: JoinHandle<()>,
}

impl WaitBarrier {
    /// Must be armed before any operation that can trigger a delivery.
    pub fn arm<F>(deliveries: Deliveries, expected: usize, matches: F) -> Self
    where
        F: FnMut(&InboundMessage) -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(expected.max(1));
        let matcher = tokio::spawn(run_matcher(deliveries, expected, matches, tx));
        Self {
            expected,
            signals: rx,
            matcher,
        }
    }

    /// Blocks until every expected signal arrived or `timeout` elapsed.
    /// Consumes the barrier.
    pub async fn wait(mut self, timeout: Duration) -> BarrierStatus {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut observed = 0;
        let mut closed = false;

        while observed < self.expected {
            match tokio::time::timeout_at(deadline, self.signals.recv()).await {
                Ok(Some(())) => observed += 1,
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        BarrierStatus {
            expected: self.expected,
            observed,
            elapsed: started.elapsed(),
            closed,
        }
    }
}

impl Drop for WaitBarrier {
    fn drop(&mut self) {
        self.matcher.abort();
    }
}

async fn run_matcher<F>(
    mut deliveries: Deliveries,
    expected: usize,
    mut matches: F,
    signals: mpsc::Sender<()>,
) where
    F: FnMut(&InboundMessage) -> bool,
{
    let mut remaining = expected;
    while remaining > 0 {
        let Some(message) = deliveries.recv().await else {
            break;
        };
        if !matches(&message) {
            continue;
        }
        if signals.send(()).await.is_err() {
            break;
        }
        remaining -= 1;
    }
}
