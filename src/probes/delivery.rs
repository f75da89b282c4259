use super::session::PairSession;
use super::FeatureProber;
use crate::error::Result;
use crate::result::{ProbeOutcome, ProbeResult};
use crate::search::{find_boundary, BoundaryProbe};
use async_trait::async_trait;
use rumqttc::QoS;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

const FILLER: char = 'a';

impl FeatureProber {
    /// Longest topic name that survives a subscribe, publish and delivery.
    pub async fn probe_topic_length(&self) -> Result<ProbeResult> {
        let session = PairSession::open(self, "topic_length", None).await?;
        let mut probe = TopicLength {
            session,
            timeout: self.config.long_timeout,
        };
        let result = find_boundary(&mut probe, 0, self.config.max_topic_length).await;
        probe.session.close().await;

        let result = result?;
        info!(boundary = result.boundary(), trials = result.trials().len(), "topic length");
        Ok(result)
    }

    /// Largest payload delivered byte for byte on a fixed topic.
    pub async fn probe_payload_size(&self) -> Result<ProbeResult> {
        let topic = self.generate_topic();
        let session = PairSession::open(self, "payload_size", Some(topic.clone())).await?;
        let mut probe = PayloadSize {
            session,
            topic,
            timeout: self.config.long_timeout,
            sent: HashSet::new(),
        };
        let result = find_boundary(&mut probe, 0, self.config.max_payload_size).await;
        probe.session.close().await;

        let result = result?;
        info!(boundary = result.boundary(), trials = result.trials().len(), "payload size");
        Ok(result)
    }
}

struct TopicLength<'a> {
    session: PairSession<'a>,
    timeout: Duration,
}

#[async_trait]
impl BoundaryProbe for TopicLength<'_> {
    async fn attempt(&mut self, length: u32) -> Result<ProbeOutcome> {
        self.session.ensure_connected().await?;
        self.session.deliveries.drain();

        let topic = FILLER.to_string().repeat(length as usize);

        if let Err(e) = self.session.subscriber.subscribe(&topic, QoS::AtLeastOnce).await {
            debug!(length, error = %e, "subscribe failed");
            return Ok(ProbeOutcome::SubscribeFailed);
        }

        if let Err(e) = self
            .session
            .publisher
            .publish(&topic, topic.as_bytes().to_vec(), QoS::AtLeastOnce, false)
            .await
        {
            debug!(length, error = %e, "publish failed");
            return Ok(ProbeOutcome::PublishFailed);
        }

        // every iteration uses its own topic, so nothing on it can be stale
        Ok(self
            .session
            .receive_on(&topic, topic.as_bytes(), self.timeout, |_| false)
            .await)
    }
}

struct PayloadSize<'a> {
    session: PairSession<'a>,
    topic: String,
    timeout: Duration,
    /// Sizes published by earlier iterations on the shared topic.
    sent: HashSet<usize>,
}

#[async_trait]
impl BoundaryProbe for PayloadSize<'_> {
    async fn attempt(&mut self, size: u32) -> Result<ProbeOutcome> {
        self.session.ensure_connected().await?;
        self.session.deliveries.drain();

        let payload = vec![FILLER as u8; size as usize];
        let earlier = self.sent.clone();
        self.sent.insert(payload.len());

        if let Err(e) = self
            .session
            .publisher
            .publish(&self.topic, payload.clone(), QoS::AtLeastOnce, false)
            .await
        {
            debug!(size, error = %e, "publish failed");
            return Ok(ProbeOutcome::PublishFailed);
        }

        Ok(self
            .session
            .receive_on(&self.topic, &payload, self.timeout, |received| {
                is_filler(received) && earlier.contains(&received.len())
            })
            .await)
    }
}

fn is_filler(payload: &[u8]) -> bool {
    payload.iter().all(|&b| b == FILLER as u8)
}
