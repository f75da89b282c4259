use super::{deliveries_of, FeatureProber};
use crate::barrier::WaitBarrier;
use crate::error::Result;
use crate::result::ProbeOutcome;
use crate::transport::Connection;
use rumqttc::QoS;
use std::time::Duration;
use tracing::{debug, info};

const PROBE: &str = "retain";
const RETAINED_PAYLOAD: &[u8] = b"RETAIN";

impl FeatureProber {
    /// Publishes a retained message before any subscriber exists, then checks
    /// that a late subscriber gets it replayed with the retain flag set.
    pub async fn probe_retain(&self) -> Result<ProbeOutcome> {
        let topic = self.generate_topic();
        let mut publisher = self.open(PROBE).await?;

        if let Err(e) = publisher
            .publish(&topic, RETAINED_PAYLOAD.to_vec(), QoS::AtLeastOnce, true)
            .await
        {
            debug!(error = %e, "retained publish failed");
            publisher.disconnect().await;
            return Ok(ProbeOutcome::PublishFailed);
        }

        let outcome = match self.open(PROBE).await {
            Ok(mut subscriber) => {
                let outcome =
                    await_retained(subscriber.as_mut(), &topic, self.config.long_timeout).await;
                subscriber.disconnect().await;
                outcome
            }
            Err(e) => Err(e),
        };

        // an empty retained payload removes the stored message
        if let Err(e) = publisher.publish(&topic, Vec::new(), QoS::AtLeastOnce, true).await {
            debug!(error = %e, "clearing retained message failed");
        }
        publisher.disconnect().await;

        let outcome = outcome?;
        info!(%outcome, "retain");
        Ok(outcome)
    }
}

async fn await_retained(
    subscriber: &mut dyn Connection,
    topic: &str,
    timeout: Duration,
) -> Result<ProbeOutcome> {
    let deliveries = deliveries_of(subscriber, PROBE)?;
    let expected = topic.to_string();
    let barrier = WaitBarrier::arm(deliveries, 1, move |message| {
        message.retain && message.topic == expected
    });

    if let Err(e) = subscriber.subscribe(topic, QoS::AtLeastOnce).await {
        debug!(error = %e, "subscribe failed");
        return Ok(ProbeOutcome::SubscribeFailed);
    }

    let status = barrier.wait(timeout).await;
    Ok(if status.released() {
        ProbeOutcome::Ok
    } else {
        ProbeOutcome::TimedOut
    })
}
