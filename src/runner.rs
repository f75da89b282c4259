use crate::cli::ProbeKind;
use crate::config::ProbeConfig;
use crate::error::Result;
use crate::probes::FeatureProber;
use crate::result::{AbortedProbe, BrokerReport};
use crate::transport::Transport;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub struct ProbeRunner {
    prober: FeatureProber,
    target: String,
    probes: Vec<ProbeKind>,
    verbose: bool,
    console: bool,
}

impl ProbeRunner {
    pub fn new(transport: Arc<dyn Transport>, target: impl Into<String>, config: ProbeConfig) -> Self {
        let verbose = config.verbose;
        Self {
            prober: FeatureProber::new(transport, config),
            target: target.into(),
            probes: ProbeKind::ALL.to_vec(),
            verbose,
            console: true,
        }
    }

    /// Disables progress bars and per-probe lines, e.g. for JSON output.
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// Restricts the run to `probes`. An empty selection keeps every probe.
    /// Selected probes always run in [`ProbeKind::ALL`] order.
    pub fn select(&mut self, probes: &[ProbeKind]) {
        if probes.is_empty() {
            self.probes = ProbeKind::ALL.to_vec();
            return;
        }
        let mut selected = probes.to_vec();
        selected.sort();
        selected.dedup();
        self.probes = selected;
    }

    pub async fn run(&mut self) -> BrokerReport {
        let mut report = BrokerReport::new(&self.target);

        let connect = self.prober.probe_connect().await;
        report.connect = Some(connect);
        if !connect.is_ok() {
            warn!(broker = %self.target, %connect, "broker did not accept a connection, skipping probes");
            return report;
        }

        if self.console {
            println!(
                "Running {} probes...\n",
                self.probes.len().to_string().bright_cyan()
            );
        }

        let pb = if self.console && !self.verbose {
            let pb = ProgressBar::new(self.probes.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} probes {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            Some(pb)
        } else {
            None
        };

        for kind in self.probes.clone() {
            if let Some(ref pb) = pb {
                pb.set_message(kind.name());
            }

            let start = Instant::now();
            let outcome = self.run_probe(kind, &mut report).await;
            let duration = start.elapsed();

            if let Err(ref e) = outcome {
                warn!(probe = kind.name(), error = %e, "probe aborted");
                report.aborted.push(AbortedProbe {
                    probe: kind.name().to_string(),
                    reason: e.to_string(),
                });
            }

            if self.console && self.verbose {
                let (icon, status) = match outcome {
                    Ok(()) => ("✓".bright_green(), "DONE".bright_green()),
                    Err(_) => ("✗".bright_red(), "ABORTED".bright_red()),
                };
                println!(
                    "  {} [{}] {} ({:.2?})",
                    icon,
                    status,
                    kind.name().bright_white(),
                    duration
                );
                println!("      {}", kind.description().dimmed());
            }

            if let Some(ref pb) = pb {
                pb.inc(1);
            }
        }

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        report
    }

    async fn run_probe(&mut self, kind: ProbeKind, report: &mut BrokerReport) -> Result<()> {
        match kind {
            ProbeKind::TopicLength => {
                let result = self.prober.probe_topic_length().await?;
                if let Some(best) = result.best() {
                    self.prober.set_max_topic_length(best as usize);
                }
                report.topic_length = Some(result);
            }
            ProbeKind::ClientIdLength => {
                report.client_id_length = Some(self.prober.probe_client_id_length().await?);
            }
            ProbeKind::ClientIdChars => {
                report.client_id_characters = Some(self.prober.probe_client_id_characters().await);
            }
            ProbeKind::PayloadSize => {
                report.payload_size = Some(self.prober.probe_payload_size().await?);
            }
            ProbeKind::Retain => {
                report.retain = Some(self.prober.probe_retain().await?);
            }
            ProbeKind::Wildcards => {
                report.wildcards = Some(self.prober.probe_wildcards().await?);
            }
            ProbeKind::Qos => {
                let tries = self.prober.config().qos_tries;
                for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
                    let result = self.prober.probe_qos(qos, tries).await?;
                    report.qos.push(result);
                }
            }
        }
        Ok(())
    }
}
