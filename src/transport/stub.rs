//! In-process broker with a configurable behavior profile.
//!
//! Routing happens synchronously inside `publish`, so delivery order is
//! deterministic unless `delivery_delay` holds messages back.
//! `open_connections` counts handles that were opened and never explicitly
//! disconnected; a connection the broker kicked still counts until the client
//! calls `disconnect`.

use super::{ConnectOptions, Connection, Deliveries, InboundMessage, Transport, TransportError};
use async_trait::async_trait;
use rumqttc::QoS;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct StubBehavior {
    pub reachable: bool,
    pub max_client_id_length: Option<usize>,
    pub rejected_client_id_chars: Vec<char>,
    pub max_topic_length: Option<usize>,
    pub max_filter_length: Option<usize>,
    /// Close the publisher's connection when it exceeds `max_topic_length`.
    pub disconnect_on_oversized_topic: bool,
    pub max_payload_size: Option<usize>,
    /// Deliver payloads longer than this with their last byte altered.
    pub corrupt_payload_above: Option<usize>,
    pub retain: bool,
    pub single_level_wildcard: bool,
    pub multi_level_wildcard: bool,
    /// Silently drop every n-th QoS 0 publish.
    pub drop_qos0_every: Option<usize>,
    /// Hold each delivery back for a time chosen from its payload length.
    pub delivery_delay: Option<fn(usize) -> Duration>,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            reachable: true,
            max_client_id_length: None,
            rejected_client_id_chars: Vec::new(),
            max_topic_length: None,
            max_filter_length: None,
            disconnect_on_oversized_topic: false,
            max_payload_size: None,
            corrupt_payload_above: None,
            retain: true,
            single_level_wildcard: true,
            multi_level_wildcard: true,
            drop_qos0_every: None,
            delivery_delay: None,
        }
    }
}

struct Session {
    tx: mpsc::UnboundedSender<InboundMessage>,
    subscriptions: Vec<(String, QoS)>,
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    open: HashSet<u64>,
    connect_attempts: Vec<String>,
    sessions: HashMap<u64, Session>,
    retained: HashMap<String, Vec<u8>>,
    qos0_routed: usize,
}

impl BrokerState {
    fn kick(&mut self, id: u64) {
        if let Some(session) = self.sessions.remove(&id) {
            session.alive.store(false, Ordering::SeqCst);
        }
    }
}

#[derive(Clone)]
pub struct StubBroker {
    behavior: Arc<StubBehavior>,
    state: Arc<Mutex<BrokerState>>,
}

impl StubBroker {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior: Arc::new(behavior),
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    pub fn connect_attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().connect_attempts.clone()
    }

    pub fn retained_topics(&self) -> usize {
        self.state.lock().unwrap().retained.len()
    }

    fn filter_matches(&self, filter: &str, topic: &str) -> bool {
        if filter.contains('+') && !self.behavior.single_level_wildcard {
            return false;
        }
        if filter.contains('#') && !self.behavior.multi_level_wildcard {
            return false;
        }
        topic_matches(topic, filter)
    }

    fn route(
        &self,
        from: u64,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let behavior = &self.behavior;
        let mut state = self.state.lock().unwrap();

        if !state.sessions.contains_key(&from) {
            return Err(TransportError::Closed);
        }
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(TransportError::Publish(format!("invalid topic '{topic}'")));
        }
        if behavior.max_topic_length.is_some_and(|max| topic.len() > max) {
            if behavior.disconnect_on_oversized_topic {
                state.kick(from);
            }
            return Err(TransportError::Publish("topic too long".to_string()));
        }
        if behavior.max_payload_size.is_some_and(|max| payload.len() > max) {
            return Err(TransportError::Publish("packet too large".to_string()));
        }

        if retain && behavior.retain {
            if payload.is_empty() {
                state.retained.remove(topic);
            } else {
                state.retained.insert(topic.to_string(), payload.clone());
            }
        }

        if qos == QoS::AtMostOnce {
            state.qos0_routed += 1;
            if let Some(every) = behavior.drop_qos0_every {
                if state.qos0_routed % every == 0 {
                    return Ok(());
                }
            }
        }

        let mut delivered = payload;
        if behavior.corrupt_payload_above.is_some_and(|max| delivered.len() > max) {
            if let Some(last) = delivered.last_mut() {
                *last = last.wrapping_add(1);
            }
        }

        for session in state.sessions.values() {
            let granted = session
                .subscriptions
                .iter()
                .find(|(filter, _)| self.filter_matches(filter, topic))
                .map(|(_, granted)| *granted);
            if let Some(granted) = granted {
                let message = InboundMessage {
                    topic: topic.to_string(),
                    payload: delivered.clone(),
                    qos: lower_qos(qos, granted),
                    retain: false,
                };
                match behavior.delivery_delay.map(|delay| delay(delivered.len())) {
                    Some(delay) if !delay.is_zero() => {
                        let tx = session.tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(message);
                        });
                    }
                    _ => {
                        let _ = session.tx.send(message);
                    }
                }
            }
        }
        Ok(())
    }

    fn add_subscription(&self, id: u64, filter: &str, qos: QoS) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        let retained: Vec<(String, Vec<u8>)> = if self.behavior.retain {
            state
                .retained
                .iter()
                .filter(|(topic, _)| self.filter_matches(filter, topic))
                .map(|(topic, payload)| (topic.clone(), payload.clone()))
                .collect()
        } else {
            Vec::new()
        };

        if filter.is_empty() || self.behavior.max_filter_length.is_some_and(|max| filter.len() > max) {
            return Err(TransportError::Subscribe(format!("filter rejected ({} bytes)", filter.len())));
        }

        let session = state.sessions.get_mut(&id).ok_or(TransportError::Closed)?;
        session.subscriptions.retain(|(existing, _)| existing != filter);
        session.subscriptions.push((filter.to_string(), qos));

        for (topic, payload) in retained {
            let _ = session.tx.send(InboundMessage {
                topic,
                payload,
                qos,
                retain: true,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for StubBroker {
    async fn connect(&self, options: ConnectOptions) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts.push(options.client_id.clone());

        if !self.behavior.reachable {
            return Err(TransportError::Connection("Connection refused (os error 111)".to_string()));
        }
        if self
            .behavior
            .max_client_id_length
            .is_some_and(|max| options.client_id.len() > max)
        {
            return Err(TransportError::Refused(2));
        }
        if options
            .client_id
            .chars()
            .any(|c| self.behavior.rejected_client_id_chars.contains(&c))
        {
            return Err(TransportError::Refused(2));
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        state.sessions.insert(
            id,
            Session {
                tx,
                subscriptions: Vec::new(),
                alive: alive.clone(),
            },
        );
        state.open.insert(id);

        Ok(Box::new(StubConnection {
            broker: self.clone(),
            id,
            deliveries: Some(Deliveries::new(rx)),
            alive,
        }))
    }
}

pub struct StubConnection {
    broker: StubBroker,
    id: u64,
    deliveries: Option<Deliveries>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for StubConnection {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.broker.route(self.id, topic, payload, qos, retain)
    }

    async fn publish_nowait(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.broker.route(self.id, topic, payload, qos, retain)
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        self.broker.add_subscription(self.id, filter, qos)
    }

    fn take_deliveries(&mut self) -> Option<Deliveries> {
        self.deliveries.take()
    }

    async fn disconnect(&mut self) {
        let mut state = self.broker.state.lock().unwrap();
        state.kick(self.id);
        state.open.remove(&self.id);
    }

    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

fn lower_qos(a: QoS, b: QoS) -> QoS {
    if (a as u8) <= (b as u8) {
        a
    } else {
        b
    }
}

fn topic_matches(topic: &str, filter: &str) -> bool {
    if topic == filter || filter == "#" {
        return true;
    }
    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();
    match_levels(&topic_levels, &filter_levels)
}

fn match_levels(topic: &[&str], filter: &[&str]) -> bool {
    match (topic.first(), filter.first()) {
        (None, None) => true,
        (_, Some(&"#")) => filter.len() == 1,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(&level), Some(&pattern)) => {
            (pattern == "+" || pattern == level) && match_levels(&topic[1..], &filter[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("base/test", "base/+"));
        assert!(topic_matches("base/test/subtopic", "base/#"));
        assert!(topic_matches("base", "base/#"));
        assert!(!topic_matches("base/test/subtopic", "base/+"));
        assert!(!topic_matches("other/test", "base/+"));
    }

    #[tokio::test]
    async fn kicked_connection_stays_open_until_disconnected() {
        let broker = StubBroker::new(StubBehavior {
            max_topic_length: Some(4),
            disconnect_on_oversized_topic: true,
            ..Default::default()
        });
        let mut conn = broker.connect(ConnectOptions::new("c1")).await.unwrap();

        let err = conn.publish("too/long", b"x".to_vec(), QoS::AtLeastOnce, false).await;
        assert!(err.is_err());
        assert!(!conn.is_connected());
        assert_eq!(broker.open_connections(), 1);

        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(broker.open_connections(), 0);
    }
}
