//! Configuration for the framecast simulator.
//!
//! Settings come from three layers, later ones winning:
//! 1. Defaults, with channel impairments randomized from the seed
//! 2. An optional TOML file with `[sender]`, `[receiver]` and `[network]` tables
//! 3. Command-line flags
//!
//! The tool works with zero arguments. The resolved configuration can be
//! printed so any run can be reproduced with `--seed`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use framecast_core::{network::NetworkConfig, ReceiverConfig, SenderConfig, SendingMode};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command-line flags.
#[derive(Parser, Debug)]
#[command(name = "framecast-sim")]
#[command(about = "Send telemetry through a simulated lossy one-way channel")]
#[command(version)]
pub struct Args {
    /// TOML file with [sender], [receiver] and [network] tables
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Random seed for determinism (default: time-based)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of telemetry messages to send
    #[arg(short = 'n', long)]
    pub messages: Option<usize>,

    /// Blob bytes to send after the messages
    #[arg(long)]
    pub blob_bytes: Option<usize>,

    /// Frame length in bits
    #[arg(long)]
    pub frame_length: Option<usize>,

    /// Messages between full encodings (0 disables deltas)
    #[arg(long)]
    pub delta_interval: Option<usize>,

    /// Sequence distance before a segment is repeated (0 disables)
    #[arg(long)]
    pub repeat_after: Option<u32>,

    /// Segments between schema broadcasts (0 disables)
    #[arg(long)]
    pub broadcast_interval: Option<u32>,

    /// Receiver loss window
    #[arg(long)]
    pub lost_interval: Option<u32>,

    /// Frame loss rate 0.0-1.0 (default: random 0-0.05)
    #[arg(long)]
    pub loss: Option<f64>,

    /// Frame duplication rate 0.0-1.0 (default: random 0-0.03)
    #[arg(long)]
    pub duplicate: Option<f64>,

    /// Maximum frames a frame can be overtaken by (default: random 0-4)
    #[arg(long)]
    pub reorder_window: Option<u64>,

    /// Perfect channel (no loss, duplication or reordering)
    #[arg(long)]
    pub perfect: bool,

    /// Send everything as a looping lake instead of a stream
    #[arg(long)]
    pub lake: bool,

    /// Number of lake loops to transmit
    #[arg(long, default_value_t = 2)]
    pub lake_loops: usize,

    /// Print the resolved configuration
    #[arg(long)]
    pub print_config: bool,

    /// Don't print the statistics summary
    #[arg(long)]
    pub no_stats: bool,
}

/// Contents of the optional TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub seed: Option<u64>,
    pub messages: Option<usize>,
    pub blob_bytes: Option<usize>,
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
    pub network: Option<NetworkConfig>,
}

impl FileConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Complete configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct Config {
    pub seed: u64,

    // === Input ===
    pub messages: usize,
    pub blob_bytes: usize,

    // === Protocol ===
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,

    // === Channel ===
    pub network: NetworkConfig,
    pub lake_loops: usize,

    // === Behavior ===
    pub print_config: bool,
    pub print_stats: bool,
}

impl Config {
    /// Merge defaults, the TOML file (if any) and the flags.
    pub fn resolve(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    fn merge(args: Args, file: FileConfig) -> Result<Self> {
        let seed = args.seed.or(file.seed).unwrap_or_else(time_seed);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut sender = file.sender;
        if let Some(bits) = args.frame_length {
            sender.max_frame_length = bits;
        }
        if let Some(interval) = args.delta_interval {
            sender.delta_interval = interval;
        }
        if let Some(distance) = args.repeat_after {
            sender.repeat_after = distance;
        }
        if let Some(interval) = args.broadcast_interval {
            sender.schema_broadcast_interval = interval;
        }
        if args.lake {
            sender.mode = SendingMode::Lake;
        }

        let mut receiver = file.receiver;
        if let Some(interval) = args.lost_interval {
            receiver.lost_interval = interval;
        }

        let mut network = file.network.unwrap_or_else(|| NetworkConfig {
            // Bias toward small loss rates
            loss_rate: {
                let r: f64 = rng.gen();
                r * r * 0.05
            },
            duplicate_rate: rng.gen_range(0.0..0.03),
            reorder_window: rng.gen_range(0..=4),
            seed,
        });
        network.seed = seed;
        if let Some(rate) = args.loss {
            network.loss_rate = rate;
        }
        if let Some(rate) = args.duplicate {
            network.duplicate_rate = rate;
        }
        if let Some(window) = args.reorder_window {
            network.reorder_window = window;
        }
        if args.perfect {
            network = NetworkConfig::perfect(seed);
        }

        let config = Config {
            seed,
            messages: args.messages.or(file.messages).unwrap_or(500),
            blob_bytes: args.blob_bytes.or(file.blob_bytes).unwrap_or(0),
            sender,
            receiver,
            network,
            lake_loops: args.lake_loops,
            print_config: args.print_config,
            print_stats: !args.no_stats,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("loss", self.network.loss_rate),
            ("duplicate", self.network.duplicate_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("{name} rate {rate} outside 0.0-1.0");
            }
        }
        if self.sender.mode == SendingMode::Stream
            && self.sender.repeat_after > 0
            && self.receiver.lost_interval <= self.sender.repeat_after
        {
            tracing::warn!(
                lost_interval = self.receiver.lost_interval,
                repeat_after = self.sender.repeat_after,
                "loss window does not exceed the repeat distance; repeats will arrive too late"
            );
        }
        Ok(())
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        println!("=== Configuration ===");
        println!("Seed: {}", self.seed);
        println!("Messages: {}", self.messages);
        println!("Blob bytes: {}", self.blob_bytes);
        println!();
        println!("=== Sender ===");
        println!("Mode: {:?}", self.sender.mode);
        println!("Frame length: {} bits", self.sender.max_frame_length);
        println!("Delta interval: {}", self.sender.delta_interval);
        println!("Repeat after: {}", self.sender.repeat_after);
        println!("Schema broadcast interval: {}", self.sender.schema_broadcast_interval);
        if self.sender.mode == SendingMode::Lake {
            println!("Lake loops: {}", self.lake_loops);
        }
        println!();
        println!("=== Receiver ===");
        println!("Lost interval: {}", self.receiver.lost_interval);
        println!();
        println!("=== Channel ===");
        println!("Loss rate: {:.2}%", self.network.loss_rate * 100.0);
        println!("Duplicate rate: {:.2}%", self.network.duplicate_rate * 100.0);
        println!("Reorder window: {} frames", self.network.reorder_window);
        println!();
    }
}

fn time_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("framecast-sim").chain(argv.iter().copied()))
    }

    #[test]
    fn test_defaults_with_seed() {
        let config = Config::merge(args(&["--seed", "42"]), FileConfig::default()).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.messages, 500);
        assert_eq!(config.sender, SenderConfig::default());
        assert_eq!(config.receiver, ReceiverConfig::default());
        assert!(config.network.loss_rate <= 0.05);
        assert!(config.network.reorder_window <= 4);
        assert_eq!(config.network.seed, 42);
    }

    #[test]
    fn test_same_seed_same_channel() {
        let a = Config::merge(args(&["--seed", "7"]), FileConfig::default()).unwrap();
        let b = Config::merge(args(&["--seed", "7"]), FileConfig::default()).unwrap();
        assert_eq!(a.network, b.network);
    }

    #[test]
    fn test_flags_override_file() {
        let file: FileConfig = toml::from_str(
            r#"
            seed = 5
            messages = 80

            [sender]
            max_frame_length = 1024
            repeat_after = 8

            [receiver]
            lost_interval = 12

            [network]
            loss_rate = 0.2
            reorder_window = 1
            "#,
        )
        .unwrap();

        let config =
            Config::merge(args(&["--messages", "10", "--loss", "0.1"]), file).unwrap();
        assert_eq!(config.seed, 5);
        assert_eq!(config.messages, 10);
        assert_eq!(config.sender.max_frame_length, 1024);
        assert_eq!(config.sender.repeat_after, 8);
        assert_eq!(config.sender.delta_interval, 10);
        assert_eq!(config.receiver.lost_interval, 12);
        assert_eq!(config.network.loss_rate, 0.1);
        assert_eq!(config.network.reorder_window, 1);
        assert_eq!(config.network.seed, 5);
    }

    #[test]
    fn test_lake_and_perfect_flags() {
        let config = Config::merge(
            args(&["--seed", "1", "--lake", "--perfect"]),
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(config.sender.mode, SendingMode::Lake);
        assert_eq!(config.network, NetworkConfig::perfect(1));
    }

    #[test]
    fn test_invalid_rate_rejected() {
        assert!(Config::merge(args(&["--loss", "1.5"]), FileConfig::default()).is_err());
    }
}
