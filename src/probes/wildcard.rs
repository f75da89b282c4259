use super::{deliveries_of, FeatureProber};
use crate::barrier::WaitBarrier;
use crate::error::Result;
use crate::result::{ProbeOutcome, WildcardResult};
use crate::transport::Connection;
use rumqttc::QoS;
use std::time::Duration;
use tracing::{debug, info};

const PROBE: &str = "wildcards";
const WILDCARD_PAYLOAD: &[u8] = b"WILDCARD_TEST";

impl FeatureProber {
    /// Checks `+` and `#` subscriptions, each on its own connection.
    pub async fn probe_wildcards(&self) -> Result<WildcardResult> {
        let single_level = self.probe_wildcard("+", "test").await?;
        let multi_level = self.probe_wildcard("#", "test/subtopic").await?;

        let result = WildcardResult {
            single_level,
            multi_level,
        };
        info!(single_level = %result.single_level, multi_level = %result.multi_level, "wildcards");
        Ok(result)
    }

    async fn probe_wildcard(&self, wildcard: &str, suffix: &str) -> Result<ProbeOutcome> {
        let base = self.generate_topic();
        let filter = format!("{base}/{wildcard}");
        let topic = format!("{base}/{suffix}");

        let mut client = self.open(PROBE).await?;
        let outcome = wildcard_round(client.as_mut(), &filter, &topic, self.config.short_timeout).await;
        client.disconnect().await;

        let outcome = outcome?;
        debug!(%filter, %topic, %outcome, "wildcard");
        Ok(outcome)
    }
}

async fn wildcard_round(
    client: &mut dyn Connection,
    filter: &str,
    topic: &str,
    timeout: Duration,
) -> Result<ProbeOutcome> {
    let deliveries = deliveries_of(client, PROBE)?;
    let expected = topic.to_string();
    let barrier = WaitBarrier::arm(deliveries, 1, move |message| {
        message.topic == expected && message.payload == WILDCARD_PAYLOAD
    });

    if let Err(e) = client.subscribe(filter, QoS::AtLeastOnce).await {
        debug!(%filter, error = %e, "subscribe failed");
        return Ok(ProbeOutcome::SubscribeFailed);
    }
    if let Err(e) = client
        .publish(topic, WILDCARD_PAYLOAD.to_vec(), QoS::AtLeastOnce, false)
        .await
    {
        debug!(%topic, error = %e, "publish failed");
        return Ok(ProbeOutcome::PublishFailed);
    }

    let status = barrier.wait(timeout).await;
    Ok(if status.released() {
        ProbeOutcome::Ok
    } else {
        ProbeOutcome::TimedOut
    })
}
