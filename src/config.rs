use crate::error::{ProbeError, Result};
use std::time::Duration;

/// Wait for round trips that must survive a loaded broker.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(10);
/// Wait for checks that are expected to fail fast, such as wildcard mismatches.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a [`FeatureProber`](crate::probes::FeatureProber) needs, passed in
/// at construction.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub long_timeout: Duration,
    pub short_timeout: Duration,
    pub max_client_id_length: u32,
    pub max_topic_length: u32,
    pub max_payload_size: u32,
    pub qos_tries: usize,
    pub reconnect_attempts: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verbose: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            long_timeout: LONG_TIMEOUT,
            short_timeout: SHORT_TIMEOUT,
            max_client_id_length: 65535,
            max_topic_length: 65535,
            max_payload_size: 1024 * 1024,
            qos_tries: 10,
            reconnect_attempts: 3,
            username: None,
            password: None,
            verbose: false,
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.password.is_some() && self.username.is_none() {
            return Err(ProbeError::Config(
                "password-only authentication is not allowed in MQTT 3.1.1".to_string(),
            ));
        }
        if self.qos_tries == 0 {
            return Err(ProbeError::Config("qos tries must be at least 1".to_string()));
        }
        if self.short_timeout > self.long_timeout {
            return Err(ProbeError::Config(format!(
                "short timeout ({:?}) exceeds long timeout ({:?})",
                self.short_timeout, self.long_timeout
            )));
        }
        Ok(())
    }
}
