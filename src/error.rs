use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe '{probe}' aborted: {source}")]
    Aborted {
        probe: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Report serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProbeError {
    pub fn aborted(probe: &'static str, source: TransportError) -> Self {
        ProbeError::Aborted { probe, source }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
