//! MQTT 3.1.1 transport over `rumqttc`.
//!
//! Every connection spawns a pump task that polls the `EventLoop`. Inbound
//! PUBLISH packets go to the delivery queue, PUBACK/PUBCOMP/SUBACK go to an
//! ack queue read by the blocking `publish`/`subscribe` calls.

use super::{ConnectOptions, Connection, Deliveries, InboundMessage, Transport, TransportError};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

const DISCONNECT_GRACE: Duration = Duration::from_millis(500);
/// Fixed header, topic length prefix and packet id of a PUBLISH, rounded up.
const PUBLISH_OVERHEAD: usize = 16;

/// Largest PUBLISH a run can build: a payload of `max_payload` bytes on a
/// topic of `max_topic_length`, or a topic of that length carrying its own
/// name as payload.
pub fn packet_limit(max_payload: u32, max_topic_length: u32) -> usize {
    let payload = max_payload as usize;
    let topic = max_topic_length as usize;
    (payload + topic).max(2 * topic) + PUBLISH_OVERHEAD
}

#[derive(Debug, Clone)]
pub struct RumqttTransport {
    host: String,
    port: u16,
    max_packet_size: usize,
    request_capacity: usize,
    timeout: Duration,
}

impl RumqttTransport {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            max_packet_size: 268_435_455,
            request_capacity: 128,
            timeout,
        }
    }

    /// Upper bound for packets in both directions; larger payloads fail locally.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity.max(10);
        self
    }

    fn mqtt_options(&self, options: &ConnectOptions) -> MqttOptions {
        let mut opts = MqttOptions::new(&options.client_id, &self.host, self.port);
        opts.set_keep_alive(options.keep_alive);
        opts.set_clean_session(true);
        opts.set_max_packet_size(self.max_packet_size, self.max_packet_size);
        if let Some(ref username) = options.username {
            opts.set_credentials(username, options.password.clone().unwrap_or_default());
        }
        opts
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(&self, options: ConnectOptions) -> Result<Box<dyn Connection>, TransportError> {
        let (client, mut eventloop) =
            AsyncClient::new(self.mqtt_options(&options), self.request_capacity);

        loop {
            match tokio::time::timeout(self.timeout, eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(connack)))) => {
                    if connack.code == ConnectReturnCode::Success {
                        break;
                    }
                    return Err(TransportError::Refused(return_code(connack.code)));
                }
                Ok(Ok(_)) => continue,
                Ok(Err(ConnectionError::ConnectionRefused(code))) => {
                    return Err(TransportError::Refused(return_code(code)));
                }
                Ok(Err(e)) => return Err(TransportError::Connection(e.to_string())),
                Err(_) => {
                    return Err(TransportError::Connection(
                        "Waiting for CONNACK timed out".to_string(),
                    ))
                }
            }
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let pump = tokio::spawn(pump(
            eventloop,
            inbound_tx,
            ack_tx,
            connected.clone(),
            options.client_id.clone(),
        ));

        Ok(Box::new(RumqttConnection {
            client,
            deliveries: Some(Deliveries::new(inbound_rx)),
            acks: ack_rx,
            connected,
            pump,
            ack_timeout: self.timeout,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    /// A PUBLISH left the client with this packet id.
    Sent(u16),
    /// PUBACK (QoS 1) or PUBCOMP (QoS 2) for this packet id.
    Published(u16),
    Subscribed { accepted: bool },
}

/// Pairs the acknowledgement with the publish that asked for it. Acks that
/// arrive late for an earlier, timed-out publish are ignored.
#[derive(Debug, Default)]
struct PublishAck {
    pkid: Option<u16>,
}

impl PublishAck {
    /// `true` once the acknowledgement for our own packet id arrived.
    fn complete(&mut self, ack: Ack) -> bool {
        match (self.pkid, ack) {
            // QoS 0 publishes go out with id 0 and are never acknowledged
            (None, Ack::Sent(pkid)) if pkid != 0 => {
                self.pkid = Some(pkid);
                false
            }
            (Some(ours), Ack::Published(pkid)) => ours == pkid,
            _ => false,
        }
    }
}

async fn pump(
    mut eventloop: EventLoop,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    acks: mpsc::UnboundedSender<Ack>,
    connected: Arc<AtomicBool>,
    client_id: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = inbound.send(InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                    qos: publish.qos,
                    retain: publish.retain,
                });
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                let _ = acks.send(Ack::Sent(pkid));
            }
            Ok(Event::Incoming(Packet::PubAck(puback))) => {
                let _ = acks.send(Ack::Published(puback.pkid));
            }
            Ok(Event::Incoming(Packet::PubComp(pubcomp))) => {
                let _ = acks.send(Ack::Published(pubcomp.pkid));
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                let accepted = !suback.return_codes.contains(&SubscribeReasonCode::Failure);
                let _ = acks.send(Ack::Subscribed { accepted });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(event) => trace!(%client_id, ?event, "event"),
            Err(e) => {
                debug!(%client_id, error = %e, "connection lost");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

pub struct RumqttConnection {
    client: AsyncClient,
    deliveries: Option<Deliveries>,
    acks: mpsc::UnboundedReceiver<Ack>,
    connected: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    ack_timeout: Duration,
}

impl RumqttConnection {
    fn drain_acks(&mut self) {
        while self.acks.try_recv().is_ok() {}
    }

    async fn await_publish_ack(&mut self) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.ack_timeout;
        let mut expected = PublishAck::default();
        loop {
            match tokio::time::timeout_at(deadline, self.acks.recv()).await {
                Ok(Some(ack)) if expected.complete(ack) => return Ok(()),
                Ok(Some(ack)) => trace!(?ack, "unrelated acknowledgement"),
                Ok(None) => {
                    return Err(TransportError::Publish(
                        "connection closed before acknowledgement".to_string(),
                    ))
                }
                Err(_) => {
                    return Err(TransportError::Publish(
                        "no acknowledgement within timeout".to_string(),
                    ))
                }
            }
        }
    }

    async fn await_suback(&mut self) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.acks.recv()).await {
                Ok(Some(Ack::Subscribed { accepted: true })) => return Ok(()),
                Ok(Some(Ack::Subscribed { accepted: false })) => {
                    return Err(TransportError::Subscribe(
                        "SUBACK carried a failure return code".to_string(),
                    ))
                }
                Ok(Some(_)) => continue,
                Ok(None) => {
                    return Err(TransportError::Subscribe(
                        "connection closed before SUBACK".to_string(),
                    ))
                }
                Err(_) => {
                    return Err(TransportError::Subscribe("no SUBACK within timeout".to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl Connection for RumqttConnection {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.drain_acks();
        self.publish_nowait(topic, payload, qos, retain).await?;
        if qos == QoS::AtMostOnce {
            return Ok(());
        }
        self.await_publish_ack().await
    }

    async fn publish_nowait(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.drain_acks();
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        self.await_suback().await
    }

    fn take_deliveries(&mut self) -> Option<Deliveries> {
        self.deliveries.take()
    }

    async fn disconnect(&mut self) {
        if self.is_connected() && self.client.disconnect().await.is_ok() {
            let _ = tokio::time::timeout(DISCONNECT_GRACE, &mut self.pump).await;
        }
        self.pump.abort();
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for RumqttConnection {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn return_code(code: ConnectReturnCode) -> u8 {
    code as u8
}
