use super::{deliveries_of, FeatureProber};
use crate::error::{ProbeError, Result};
use crate::result::ProbeOutcome;
use crate::transport::{Connection, Deliveries};
use rumqttc::QoS;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Publisher/subscriber pair shared by every iteration of a boundary search.
///
/// Before each iteration [`ensure_connected`](Self::ensure_connected) replaces
/// a side the broker closed, re-subscribing the subscriber to the fixed
/// filter if there is one. Callers must finish with [`close`](Self::close).
pub(crate) struct PairSession<'a> {
    prober: &'a FeatureProber,
    probe: &'static str,
    pub publisher: Box<dyn Connection>,
    pub subscriber: Box<dyn Connection>,
    pub deliveries: Deliveries,
    subscription: Option<String>,
}

impl<'a> PairSession<'a> {
    pub async fn open(
        prober: &'a FeatureProber,
        probe: &'static str,
        subscription: Option<String>,
    ) -> Result<PairSession<'a>> {
        let mut subscriber = prober.open(probe).await?;
        let mut publisher = match prober.open(probe).await {
            Ok(publisher) => publisher,
            Err(e) => {
                subscriber.disconnect().await;
                return Err(e);
            }
        };

        let prepared = match deliveries_of(subscriber.as_mut(), probe) {
            Ok(deliveries) => subscribe_fixed(subscriber.as_mut(), subscription.as_deref(), probe)
                .await
                .map(|()| deliveries),
            Err(e) => Err(e),
        };
        let deliveries = match prepared {
            Ok(deliveries) => deliveries,
            Err(e) => {
                futures::future::join(publisher.disconnect(), subscriber.disconnect()).await;
                return Err(e);
            }
        };

        Ok(PairSession {
            prober,
            probe,
            publisher,
            subscriber,
            deliveries,
            subscription,
        })
    }

    pub async fn ensure_connected(&mut self) -> Result<()> {
        if !self.publisher.is_connected() {
            debug!(probe = self.probe, "publisher closed by broker, reconnecting");
            self.publisher.disconnect().await;
            self.publisher = self.prober.open_with_retry(self.probe).await?;
        }

        if !self.subscriber.is_connected() {
            debug!(probe = self.probe, "subscriber closed by broker, reconnecting");
            self.subscriber.disconnect().await;
            self.subscriber = self.prober.open_with_retry(self.probe).await?;
            self.deliveries = deliveries_of(self.subscriber.as_mut(), self.probe)?;
            subscribe_fixed(self.subscriber.as_mut(), self.subscription.as_deref(), self.probe)
                .await?;
        }
        Ok(())
    }

    /// Waits for a delivery on `topic` and compares it byte for byte.
    /// Deliveries on other topics, and those `is_stale` recognises, are late
    /// arrivals from earlier iterations.
    pub async fn receive_on<F>(
        &mut self,
        topic: &str,
        expected: &[u8],
        timeout: Duration,
        is_stale: F,
    ) -> ProbeOutcome
    where
        F: Fn(&[u8]) -> bool + Send,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.deliveries.next_within(remaining).await {
                Some(message) if message.topic == topic && is_stale(&message.payload) => {
                    trace!(size = message.payload.len(), "skipping stale payload");
                }
                Some(message) if message.topic == topic => {
                    return if message.payload == expected {
                        ProbeOutcome::Ok
                    } else {
                        debug!(
                            expected = expected.len(),
                            received = message.payload.len(),
                            "payload mismatch"
                        );
                        ProbeOutcome::WrongPayload
                    };
                }
                Some(message) => trace!(topic = %message.topic, "skipping stale delivery"),
                None => return ProbeOutcome::TimedOut,
            }
        }
    }

    pub async fn close(mut self) {
        futures::future::join(self.publisher.disconnect(), self.subscriber.disconnect()).await;
    }
}

async fn subscribe_fixed(
    subscriber: &mut dyn Connection,
    filter: Option<&str>,
    probe: &'static str,
) -> Result<()> {
    match filter {
        Some(filter) => subscriber
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| ProbeError::aborted(probe, e)),
        None => Ok(()),
    }
}
