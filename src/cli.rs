use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "mqtt-broker-probe")]
#[command(version = "0.1.0")]
#[command(about = "Measures what an MQTT broker actually accepts and delivers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe an MQTT 3.1.1 broker and report its practical limits
    Probe {
        /// MQTT broker hostname
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// MQTT broker port
        #[arg(short, long, default_value_t = 1883)]
        port: u16,

        /// Username for broker authentication
        #[arg(short, long)]
        username: Option<String>,

        /// Password for broker authentication (requires a username)
        #[arg(short = 'P', long)]
        password: Option<String>,

        /// Round-trip timeout in seconds
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,

        /// Timeout in seconds for checks expected to fail fast
        #[arg(long, default_value_t = 2)]
        short_timeout: u64,

        /// Largest payload size to try, in bytes
        #[arg(long, default_value_t = 1024 * 1024)]
        max_payload: u32,

        /// Longest topic name to try
        #[arg(long, default_value_t = 65535)]
        max_topic_length: u32,

        /// Longest client identifier to try
        #[arg(long, default_value_t = 65535)]
        max_client_id_length: u32,

        /// Messages published per QoS level
        #[arg(long, default_value_t = 10)]
        qos_tries: usize,

        /// Run only these probes (repeatable, default: all)
        #[arg(long = "probe", value_enum)]
        probes: Vec<ProbeKind>,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Enable verbose output
        #[arg(short = 'V', long)]
        verbose: bool,

        /// Log every trial
        #[arg(long)]
        debug: bool,
    },

    /// List available probes
    List,
}

/// Probes in the order a run executes them. Topic length comes first so the
/// probes after it can size their generated topics.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum ProbeKind {
    TopicLength,
    ClientIdLength,
    ClientIdChars,
    PayloadSize,
    Retain,
    Wildcards,
    Qos,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 7] = [
        ProbeKind::TopicLength,
        ProbeKind::ClientIdLength,
        ProbeKind::ClientIdChars,
        ProbeKind::PayloadSize,
        ProbeKind::Retain,
        ProbeKind::Wildcards,
        ProbeKind::Qos,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::TopicLength => "topic-length",
            ProbeKind::ClientIdLength => "client-id-length",
            ProbeKind::ClientIdChars => "client-id-chars",
            ProbeKind::PayloadSize => "payload-size",
            ProbeKind::Retain => "retain",
            ProbeKind::Wildcards => "wildcards",
            ProbeKind::Qos => "qos",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ProbeKind::TopicLength => "Longest topic name that is subscribed, published and delivered",
            ProbeKind::ClientIdLength => "Longest client identifier accepted on CONNECT",
            ProbeKind::ClientIdChars => "Punctuation characters refused as a client identifier",
            ProbeKind::PayloadSize => "Largest payload delivered byte for byte",
            ProbeKind::Retain => "Retained message replayed to a late subscriber",
            ProbeKind::Wildcards => "Single-level '+' and multi-level '#' subscriptions",
            ProbeKind::Qos => "Delivery count and rate at QoS 0, 1 and 2",
        }
    }
}
