use super::FeatureProber;
use crate::error::Result;
use crate::result::{CharacterResult, ProbeOutcome, ProbeResult};
use crate::search::{find_boundary, BoundaryProbe};
use async_trait::async_trait;
use tracing::{debug, info};

/// Printable ASCII punctuation, space included, tried one at a time as a
/// client identifier.
pub const CLIENT_ID_ALPHABET: &str = " !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

impl FeatureProber {
    /// Single connect with a generated identifier.
    pub async fn probe_connect(&self) -> ProbeOutcome {
        let outcome = self.try_client_id(self.generate_client_id()).await;
        info!(%outcome, "connect");
        outcome
    }

    /// Longest client identifier the broker accepts.
    pub async fn probe_client_id_length(&self) -> Result<ProbeResult> {
        let mut probe = ClientIdLength { prober: self };
        let result = find_boundary(&mut probe, 0, self.config.max_client_id_length).await?;
        info!(boundary = result.boundary(), trials = result.trials().len(), "client id length");
        Ok(result)
    }

    /// Characters the broker refuses as a one-character client identifier.
    ///
    /// Acceptance of one character says nothing about its neighbours, so this
    /// walks the whole alphabet instead of searching it.
    pub async fn probe_client_id_characters(&self) -> CharacterResult {
        let mut result = CharacterResult::default();
        for c in CLIENT_ID_ALPHABET.chars() {
            let outcome = self.try_client_id(c.to_string()).await;
            debug!(character = %c, %outcome, "client id character");
            result.record(c, outcome);
        }
        info!(rejected = result.rejected().len(), "client id characters");
        result
    }

    async fn try_client_id(&self, client_id: String) -> ProbeOutcome {
        match self.transport.connect(self.connect_options(client_id)).await {
            Ok(mut connection) => {
                connection.disconnect().await;
                ProbeOutcome::Ok
            }
            Err(e) => {
                debug!(error = %e, "connect refused");
                ProbeOutcome::from_connect_error(&e)
            }
        }
    }
}

struct ClientIdLength<'a> {
    prober: &'a FeatureProber,
}

#[async_trait]
impl BoundaryProbe for ClientIdLength<'_> {
    async fn attempt(&mut self, length: u32) -> Result<ProbeOutcome> {
        Ok(self.prober.try_client_id("a".repeat(length as usize)).await)
    }
}
