//! Capability probes run against one broker.
//!
//! Every probe opens its own connections and disconnects all of them before
//! returning, whatever the outcome.

mod client_id;
mod delivery;
mod qos;
mod retain;
mod session;
mod wildcard;

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::transport::{ConnectOptions, Connection, Deliveries, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct FeatureProber {
    transport: Arc<dyn Transport>,
    config: ProbeConfig,
    max_topic_length: Option<usize>,
}

impl FeatureProber {
    pub fn new(transport: Arc<dyn Transport>, config: ProbeConfig) -> Self {
        Self {
            transport,
            config,
            max_topic_length: None,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Caps generated topic names once the broker's topic limit is known.
    pub fn set_max_topic_length(&mut self, length: usize) {
        self.max_topic_length = Some(length.max(1));
    }

    fn connect_options(&self, client_id: String) -> ConnectOptions {
        ConnectOptions::new(client_id)
            .with_credentials(self.config.username.clone(), self.config.password.clone())
    }

    fn generate_client_id(&self) -> String {
        format!("probe-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
    }

    /// A fresh topic name: 32 hex digits, shortened to the known topic limit.
    fn generate_topic(&self) -> String {
        let mut topic = uuid::Uuid::new_v4().simple().to_string();
        if let Some(max) = self.max_topic_length {
            topic.truncate(max);
        }
        topic
    }

    /// Opens a connection the probe cannot do without.
    async fn open(&self, probe: &'static str) -> Result<Box<dyn Connection>> {
        self.transport
            .connect(self.connect_options(self.generate_client_id()))
            .await
            .map_err(|e| ProbeError::aborted(probe, e))
    }

    /// Like [`open`](Self::open), retried with a growing pause between attempts.
    async fn open_with_retry(&self, probe: &'static str) -> Result<Box<dyn Connection>> {
        let attempts = self.config.reconnect_attempts.max(1);
        let mut last_error = TransportError::Closed;
        for attempt in 1..=attempts {
            match self
                .transport
                .connect(self.connect_options(self.generate_client_id()))
                .await
            {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    debug!(probe, attempt, error = %e, "connect failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
        }
        Err(ProbeError::aborted(probe, last_error))
    }
}

fn deliveries_of(connection: &mut dyn Connection, probe: &'static str) -> Result<Deliveries> {
    connection
        .take_deliveries()
        .ok_or_else(|| ProbeError::aborted(probe, TransportError::Closed))
}
