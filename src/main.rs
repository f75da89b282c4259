mod barrier;
mod cli;
mod config;
mod error;
mod probes;
mod report;
mod result;
mod runner;
mod search;
mod transport;

use clap::Parser;
use cli::{Cli, Commands, ProbeKind};
use colored::Colorize;
use config::ProbeConfig;
use runner::ProbeRunner;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use transport::rumqtt::{packet_limit, RumqttTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe {
            host,
            port,
            username,
            password,
            timeout,
            short_timeout,
            max_payload,
            max_topic_length,
            max_client_id_length,
            qos_tries,
            probes,
            json,
            verbose,
            debug,
        } => {
            let log_level = if debug {
                Level::DEBUG
            } else if verbose {
                Level::INFO
            } else {
                Level::ERROR
            };
            tracing_subscriber::fmt()
                .with_max_level(log_level)
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr)
                .init();

            let config = ProbeConfig {
                long_timeout: Duration::from_secs(timeout),
                short_timeout: Duration::from_secs(short_timeout),
                max_client_id_length,
                max_topic_length,
                max_payload_size: max_payload,
                qos_tries,
                username,
                password,
                verbose,
                ..Default::default()
            };
            config.validate()?;

            let transport = RumqttTransport::new(&host, port, config.long_timeout)
                .with_max_packet_size(packet_limit(max_payload, max_topic_length))
                .with_request_capacity(qos_tries);

            if !json {
                println!();
                println!(
                    "{}",
                    "╔══════════════════════════════════════════════════════════════╗"
                        .bright_blue()
                );
                println!(
                    "{}",
                    "║              MQTT Broker Capability Probe                    ║"
                        .bright_blue()
                );
                println!(
                    "{}",
                    "╚══════════════════════════════════════════════════════════════╝"
                        .bright_blue()
                );
                println!();

                println!("Target: {}:{}", host.bright_cyan(), port.to_string().bright_cyan());
                println!("Protocol: MQTT {}", "3.1.1".bright_yellow());
                println!();
            }

            let mut runner = ProbeRunner::new(Arc::new(transport), format!("{host}:{port}"), config)
                .with_console(!json);
            runner.select(&probes);

            let report = runner.run().await;

            if json {
                println!("{}", report::to_json(&report)?);
            } else {
                report::print_report(&report, verbose);
            }

            if !report.succeeded() {
                std::process::exit(1);
            }
        }
        Commands::List => {
            println!("\n{} probes:\n", "Available".bright_cyan());
            for kind in ProbeKind::ALL {
                println!("    {} - {}", kind.name().bright_green(), kind.description().dimmed());
            }
            println!();
        }
    }

    Ok(())
}
