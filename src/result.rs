//! Outcomes and aggregates produced by the probes.
//!
//! Trials are kept in the order they were visited, never sorted by value, so
//! a report shows the path a search actually took.

use crate::transport::{return_code_name, TransportError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Ok,
    TimedOut,
    WrongPayload,
    PublishFailed,
    SubscribeFailed,
    /// The broker answered the CONNECT with this return code.
    ConnectionRejected(u8),
    /// The connect attempt failed without a broker verdict.
    ConnectionFailed,
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Ok)
    }

    /// Classifies a failed connect. Broker refusals keep their return code.
    pub fn from_connect_error(error: &TransportError) -> Self {
        match error {
            TransportError::Refused(code) => ProbeOutcome::ConnectionRejected(*code),
            _ => ProbeOutcome::ConnectionFailed,
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Ok => write!(f, "OK"),
            ProbeOutcome::TimedOut => write!(f, "TIMED_OUT"),
            ProbeOutcome::WrongPayload => write!(f, "WRONG_PAYLOAD"),
            ProbeOutcome::PublishFailed => write!(f, "PUBLISH_FAILED"),
            ProbeOutcome::SubscribeFailed => write!(f, "SUBSCRIBE_FAILED"),
            ProbeOutcome::ConnectionRejected(code) => {
                write!(f, "REJECTED ({code}: {})", return_code_name(*code))
            }
            ProbeOutcome::ConnectionFailed => write!(f, "CONNECTION_FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeTrial<V> {
    pub value: V,
    pub outcome: ProbeOutcome,
}

/// Result of a boundary search.
///
/// `best` tracks the largest value recorded with [`ProbeOutcome::Ok`] as trials
/// arrive, so reading it never rescans the trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    best: Option<u32>,
    trials: Vec<ProbeTrial<u32>>,
}

impl ProbeResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: u32, outcome: ProbeOutcome) {
        if outcome.is_ok() && self.best.map_or(true, |best| value > best) {
            self.best = Some(value);
        }
        self.trials.push(ProbeTrial { value, outcome });
    }

    /// Largest accepted value, `None` when nothing was accepted.
    pub fn best(&self) -> Option<u32> {
        self.best
    }

    /// `best` with the conventional `-1` for "no value accepted".
    pub fn boundary(&self) -> i64 {
        self.best.map_or(-1, i64::from)
    }

    pub fn trials(&self) -> &[ProbeTrial<u32>] {
        &self.trials
    }
}

/// Delivery accuracy for one QoS level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QosResult {
    pub qos: u8,
    pub tries: usize,
    pub received: usize,
    /// From the first publish until the barrier released or timed out.
    pub elapsed: Duration,
    pub outcome: ProbeOutcome,
}

impl QosResult {
    pub fn delivery_ratio(&self) -> f64 {
        if self.tries == 0 {
            return 0.0;
        }
        self.received as f64 / self.tries as f64
    }

    pub fn messages_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.received as f64 / secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WildcardResult {
    /// `+` against a direct child topic.
    pub single_level: ProbeOutcome,
    /// `#` against a nested topic.
    pub multi_level: ProbeOutcome,
}

/// Characters that failed as a one-character client identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CharacterResult {
    rejected: BTreeSet<char>,
    trials: Vec<ProbeTrial<char>>,
}

impl CharacterResult {
    pub fn record(&mut self, value: char, outcome: ProbeOutcome) {
        if !outcome.is_ok() {
            self.rejected.insert(value);
        }
        self.trials.push(ProbeTrial { value, outcome });
    }

    pub fn rejected(&self) -> &BTreeSet<char> {
        &self.rejected
    }

    pub fn trials(&self) -> &[ProbeTrial<char>] {
        &self.trials
    }
}

/// A probe that stopped before producing a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbortedProbe {
    pub probe: String,
    pub reason: String,
}

/// Everything one run learned about a broker. Probes that were not selected,
/// or were skipped because the broker was unreachable, stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerReport {
    pub target: String,
    pub connect: Option<ProbeOutcome>,
    pub client_id_length: Option<ProbeResult>,
    pub topic_length: Option<ProbeResult>,
    pub payload_size: Option<ProbeResult>,
    pub retain: Option<ProbeOutcome>,
    pub wildcards: Option<WildcardResult>,
    pub qos: Vec<QosResult>,
    pub client_id_characters: Option<CharacterResult>,
    pub aborted: Vec<AbortedProbe>,
}

impl BrokerReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    /// The broker accepted a connection and no probe was aborted.
    pub fn succeeded(&self) -> bool {
        self.connect.is_some_and(|outcome| outcome.is_ok()) && self.aborted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_is_largest_ok_value_not_last_visited() {
        let mut result = ProbeResult::new();
        result.record(50, ProbeOutcome::Ok);
        result.record(75, ProbeOutcome::TimedOut);
        result.record(62, ProbeOutcome::Ok);
        result.record(68, ProbeOutcome::WrongPayload);

        assert_eq!(result.best(), Some(62));
        assert_eq!(result.boundary(), 62);
        let visited: Vec<u32> = result.trials().iter().map(|t| t.value).collect();
        assert_eq!(visited, vec![50, 75, 62, 68]);
    }

    #[test]
    fn no_ok_trial_reports_minus_one() {
        let mut result = ProbeResult::new();
        result.record(10, ProbeOutcome::PublishFailed);
        result.record(4, ProbeOutcome::ConnectionRejected(2));

        assert_eq!(result.best(), None);
        assert_eq!(result.boundary(), -1);
        assert_eq!(result.trials().len(), 2);
    }

    #[test]
    fn zero_is_a_valid_boundary() {
        let mut result = ProbeResult::new();
        result.record(0, ProbeOutcome::Ok);
        assert_eq!(result.boundary(), 0);
    }

    #[test]
    fn connect_errors_keep_rejection_and_failure_apart() {
        assert_eq!(
            ProbeOutcome::from_connect_error(&TransportError::Refused(2)),
            ProbeOutcome::ConnectionRejected(2)
        );
        assert_eq!(
            ProbeOutcome::from_connect_error(&TransportError::Connection("reset".to_string())),
            ProbeOutcome::ConnectionFailed
        );
    }

    #[test]
    fn character_result_collects_every_non_ok_outcome() {
        let mut result = CharacterResult::default();
        result.record('a', ProbeOutcome::Ok);
        result.record('#', ProbeOutcome::ConnectionRejected(2));
        result.record(' ', ProbeOutcome::ConnectionFailed);

        assert_eq!(result.rejected().iter().copied().collect::<Vec<_>>(), vec![' ', '#']);
        assert_eq!(result.trials().len(), 3);
    }

    #[test]
    fn qos_rates() {
        let result = QosResult {
            qos: 0,
            tries: 100,
            received: 95,
            elapsed: Duration::from_millis(500),
            outcome: ProbeOutcome::TimedOut,
        };
        assert!((result.delivery_ratio() - 0.95).abs() < f64::EPSILON);
        assert!((result.messages_per_second() - 190.0).abs() < 1e-9);
    }

    #[test]
    fn report_fails_without_connect_or_with_aborts() {
        let mut report = BrokerReport::new("localhost:1883");
        assert!(!report.succeeded());

        report.connect = Some(ProbeOutcome::Ok);
        assert!(report.succeeded());

        report.aborted.push(AbortedProbe {
            probe: "retain".to_string(),
            reason: "Connection closed".to_string(),
        });
        assert!(!report.succeeded());
    }

    #[test]
    fn outcome_display() {
        assert_eq!(ProbeOutcome::TimedOut.to_string(), "TIMED_OUT");
        assert_eq!(
            ProbeOutcome::ConnectionRejected(2).to_string(),
            "REJECTED (2: Identifier rejected)"
        );
    }
}
