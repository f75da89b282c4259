//! Console and JSON rendering of a [`BrokerReport`].

use crate::error::Result;
use crate::result::{BrokerReport, CharacterResult, ProbeOutcome, ProbeResult, QosResult};
use colored::{ColoredString, Colorize};

pub fn to_json(report: &BrokerReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn print_report(report: &BrokerReport, verbose: bool) {
    if !report.aborted.is_empty() {
        println!("\n{}", "═".repeat(66).bright_red());
        println!("{}", "                        ABORTED".bright_red().bold());
        println!("{}\n", "═".repeat(66).bright_red());

        for aborted in &report.aborted {
            println!("  {} {}", "✗".bright_red(), aborted.probe.bright_white().bold());
            println!("    {} {}", "Error:".bright_red(), aborted.reason);
            println!();
        }
    }

    println!("{}", "═".repeat(66).bright_blue());
    println!("{}", "                        BROKER REPORT".bright_white().bold());
    println!("{}\n", "═".repeat(66).bright_blue());

    if let Some(connect) = report.connect {
        print_outcome("Connect", connect);
    }
    if let Some(ref result) = report.client_id_length {
        print_boundary("Client id length", result, "chars", verbose);
    }
    if let Some(ref result) = report.client_id_characters {
        print_characters(result, verbose);
    }
    if let Some(ref result) = report.topic_length {
        print_boundary("Topic length", result, "chars", verbose);
    }
    if let Some(ref result) = report.payload_size {
        print_boundary("Payload size", result, "bytes", verbose);
    }
    if let Some(retain) = report.retain {
        print_outcome("Retained messages", retain);
    }
    if let Some(wildcards) = report.wildcards {
        print_outcome("Wildcard '+'", wildcards.single_level);
        print_outcome("Wildcard '#'", wildcards.multi_level);
    }
    for result in &report.qos {
        print_qos(result);
    }
    println!();
}

fn icon(ok: bool) -> ColoredString {
    if ok {
        "✓".bright_green()
    } else {
        "✗".bright_red()
    }
}

fn colored_outcome(outcome: ProbeOutcome) -> ColoredString {
    if outcome.is_ok() {
        outcome.to_string().bright_green()
    } else {
        outcome.to_string().bright_red()
    }
}

fn print_outcome(label: &str, outcome: ProbeOutcome) {
    println!(
        "  {} {:<24} {}",
        icon(outcome.is_ok()),
        label,
        colored_outcome(outcome)
    );
}

fn print_boundary(label: &str, result: &ProbeResult, unit: &str, verbose: bool) {
    let value = format!("{} {}", result.boundary(), unit);
    println!(
        "  {} {:<24} {}",
        icon(result.best().is_some()),
        label,
        value.bright_cyan()
    );
    if verbose {
        for trial in result.trials() {
            println!(
                "      {:>10} {}",
                trial.value.to_string().dimmed(),
                colored_outcome(trial.outcome)
            );
        }
    }
}

fn print_characters(result: &CharacterResult, verbose: bool) {
    let rejected = rejected_list(result);
    let shown = if rejected.is_empty() {
        "none rejected".bright_green()
    } else {
        format!("rejected: {rejected}").bright_yellow()
    };
    println!("  {} {:<24} {}", "•".bright_white(), "Client id characters", shown);
    if verbose {
        for trial in result.trials() {
            println!(
                "      {:>10} {}",
                format!("{:?}", trial.value).dimmed(),
                colored_outcome(trial.outcome)
            );
        }
    }
}

fn print_qos(result: &QosResult) {
    println!(
        "  {} {:<24} {}/{} delivered ({:.1}%, {:.1} msg/s, {:.2?})",
        icon(result.received == result.tries),
        format!("QoS {}", result.qos),
        result.received.to_string().bright_cyan(),
        result.tries,
        result.delivery_ratio() * 100.0,
        result.messages_per_second(),
        result.elapsed
    );
}

fn rejected_list(result: &CharacterResult) -> String {
    result
        .rejected()
        .iter()
        .map(char::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
