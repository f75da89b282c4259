//! Transport facade consumed by the probes.
//!
//! A [`Transport`] opens [`Connection`]s. Inbound PUBLISH packets are handed
//! off through a [`Deliveries`] queue instead of a callback, so the probing
//! code can either read them directly or feed them to a
//! [`WaitBarrier`](crate::barrier::WaitBarrier).

pub mod rumqtt;
#[cfg(test)]
pub mod stub;

use async_trait::async_trait;
use rumqttc::QoS;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Options for a single connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl ConnectOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

/// A PUBLISH delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection refused by broker: return code {0}")]
    Refused(u8),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Connection closed")]
    Closed,
}

/// Opens connections to one broker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, options: ConnectOptions) -> Result<Box<dyn Connection>, TransportError>;
}

/// One live session with the broker.
#[async_trait]
pub trait Connection: Send {
    /// Publishes and, for QoS 1 and 2, waits for the broker acknowledgement.
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Enqueues a publish without waiting for any acknowledgement.
    async fn publish_nowait(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Subscribes and waits for the SUBACK. A failure return code is an error.
    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError>;

    /// Hands out the inbound delivery queue. Only the first call returns it.
    fn take_deliveries(&mut self) -> Option<Deliveries>;

    /// Idempotent; safe on a connection the broker already closed.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Receiving half of a connection's inbound queue.
#[derive(Debug)]
pub struct Deliveries {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl Deliveries {
    pub fn new(rx: mpsc::UnboundedReceiver<InboundMessage>) -> Self {
        Self { rx }
    }

    /// Waits for the next delivery. `None` on timeout or when the connection is gone.
    pub async fn next_within(&mut self, timeout: Duration) -> Option<InboundMessage> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(message) => message,
            Err(_) => None,
        }
    }

    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Discards everything already queued.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// Human-readable name of an MQTT 3.1.1 CONNACK return code.
pub fn return_code_name(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "Unacceptable protocol version",
        2 => "Identifier rejected",
        3 => "Server unavailable",
        4 => "Bad user name or password",
        5 => "Not authorized",
        _ => "Unknown",
    }
}
