use super::{deliveries_of, FeatureProber};
use crate::barrier::WaitBarrier;
use crate::error::Result;
use crate::result::{ProbeOutcome, QosResult};
use crate::transport::Connection;
use rumqttc::QoS;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const PROBE: &str = "qos";

impl FeatureProber {
    /// Publishes `tries` distinct messages at `qos` and counts how many arrive
    /// at that same QoS. Partial delivery is a result, not an error.
    pub async fn probe_qos(&self, qos: QoS, tries: usize) -> Result<QosResult> {
        let topic = self.generate_topic();
        let mut subscriber = self.open(PROBE).await?;
        let mut publisher = match self.open(PROBE).await {
            Ok(publisher) => publisher,
            Err(e) => {
                subscriber.disconnect().await;
                return Err(e);
            }
        };

        let result = qos_round(
            publisher.as_mut(),
            subscriber.as_mut(),
            &topic,
            qos,
            tries,
            self.config.long_timeout,
        )
        .await;
        futures::future::join(publisher.disconnect(), subscriber.disconnect()).await;

        let result = result?;
        info!(
            qos = result.qos,
            received = result.received,
            tries = result.tries,
            elapsed = ?result.elapsed,
            "qos delivery"
        );
        Ok(result)
    }
}

async fn qos_round(
    publisher: &mut dyn Connection,
    subscriber: &mut dyn Connection,
    topic: &str,
    qos: QoS,
    tries: usize,
    timeout: Duration,
) -> Result<QosResult> {
    let level = qos as u8;
    let prefix = format!("qos{level}-");
    let mut result = QosResult {
        qos: level,
        tries,
        received: 0,
        elapsed: Duration::ZERO,
        outcome: ProbeOutcome::Ok,
    };

    let deliveries = deliveries_of(subscriber, PROBE)?;
    let barrier = {
        let topic = topic.to_string();
        let prefix = prefix.clone();
        let mut seen = HashSet::new();
        WaitBarrier::arm(deliveries, tries, move |message| {
            message.topic == topic
                && message.qos == qos
                && message_index(&message.payload, &prefix)
                    .is_some_and(|index| index < tries && seen.insert(index))
        })
    };

    if let Err(e) = subscriber.subscribe(topic, qos).await {
        debug!(qos = level, error = %e, "subscribe failed");
        result.outcome = ProbeOutcome::SubscribeFailed;
        return Ok(result);
    }

    let started = Instant::now();
    let mut publish_failed = false;
    for index in 0..tries {
        let payload = format!("{prefix}{index}").into_bytes();
        if let Err(e) = publisher.publish_nowait(topic, payload, qos, false).await {
            debug!(qos = level, index, error = %e, "publish failed");
            publish_failed = true;
            break;
        }
    }

    let status = barrier.wait(timeout).await;
    if !status.released() {
        debug!(
            qos = level,
            missing = status.remaining(),
            closed = status.closed,
            waited = ?status.elapsed,
            "barrier not released"
        );
    }
    result.elapsed = started.elapsed();
    result.received = status.observed;
    result.outcome = if publish_failed {
        ProbeOutcome::PublishFailed
    } else if status.released() {
        ProbeOutcome::Ok
    } else {
        ProbeOutcome::TimedOut
    };
    Ok(result)
}

fn message_index(payload: &[u8], prefix: &str) -> Option<usize> {
    std::str::from_utf8(payload)
        .ok()?
        .strip_prefix(prefix)?
        .parse()
        .ok()
}
