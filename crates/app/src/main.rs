//! framecast-sim - telemetry over a simulated one-way lossy channel
//!
//! Generates telemetry messages, sends them through a `Sender`, a
//! `NetworkSimulator` and a `Receiver`, and checks what came out.

mod config;
mod input_gen;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Args, Config};
use framecast_core::{
    network::{NetworkSimulator, NetworkStats},
    segment::BLOB_HEADER_BITS,
    BitBuffer, Receiver, SchemaElement, Sender, SendingMode,
};
use input_gen::{generate_blob, TelemetryGenerator, TELEMETRY_SCHEMA};
use tracing::{info, warn};

const SCHEMA_NUMBER: u8 = 0;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::resolve(Args::parse())?;
    if config.print_config {
        config.print();
    }

    let report = run(&config)?;
    if config.print_stats {
        report.print();
    }
    if !report.verified() {
        warn!("received data does not match what was sent");
    }
    Ok(())
}

/// Outcome of one simulation run.
struct Report {
    sender: Sender,
    receiver: Receiver,
    network: NetworkStats,
    sent: usize,
    emitted: usize,
    corrupted: usize,
    blob_sent: Vec<u8>,
    blob_received: Vec<u8>,
}

impl Report {
    /// Every emitted message matched one that was sent, in order, and the
    /// blob arrived intact or not at all.
    fn verified(&self) -> bool {
        self.corrupted == 0
            && (self.blob_received.is_empty() || self.blob_received == self.blob_sent)
    }

    fn print(&self) {
        println!("\n=== Transfer Summary ===");
        println!("Messages sent: {}", self.sent);
        println!(
            "Messages emitted: {} ({:.2}%)",
            self.emitted,
            percent(self.emitted, self.sent)
        );
        println!("Messages lost: {}", self.receiver.message_lost_count());
        println!("Messages corrupted: {}", self.corrupted);
        if !self.blob_sent.is_empty() {
            let intact = self.blob_received == self.blob_sent;
            println!(
                "Blob: {} of {} bytes{}",
                self.blob_received.len(),
                self.blob_sent.len(),
                if intact { " (intact)" } else { "" }
            );
        }
        if self.verified() {
            println!("Verification: PASSED");
        } else {
            println!("Verification: FAILED");
        }
        println!();

        println!("=== Sender ===");
        print!("{}", self.sender.stats().export_text());
        println!();
        println!("=== Channel ===");
        print!("{}", self.network.export_text());
        println!();
        println!("=== Receiver ===");
        print!("{}", self.receiver.stats().export_text());
        println!();
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn run(config: &Config) -> Result<Report> {
    let mut sender = Sender::new(config.sender.clone());
    sender
        .set_schema_text(SCHEMA_NUMBER, TELEMETRY_SCHEMA)
        .context("registering the telemetry schema")?;
    let mut network = NetworkSimulator::new(config.network);
    let mut receiver = Receiver::new(config.receiver.clone());
    let mut generator = TelemetryGenerator::new(config.seed)?;

    info!(
        messages = config.messages,
        blob_bytes = config.blob_bytes,
        mode = ?config.sender.mode,
        "starting simulation"
    );

    let mut sent = Vec::with_capacity(config.messages);
    for _ in 0..config.messages {
        let message = generator.next_message()?;
        sender.add_message(SCHEMA_NUMBER, message.clone(), false)?;
        sent.push(message);
        if config.sender.mode == SendingMode::Stream {
            pump(&mut sender, &mut network, &mut receiver);
        }
    }

    let blob_sent = generate_blob(config.seed, config.blob_bytes);
    // Blob chunks are whole bytes sized to fill one frame each.
    let chunk_bytes = (sender.max_data_size().saturating_sub(BLOB_HEADER_BITS) / 8).max(1);
    for chunk in blob_sent.chunks(chunk_bytes) {
        sender.add_blob(BitBuffer::from_bytes(chunk, chunk.len() * 8)?)?;
        if config.sender.mode == SendingMode::Stream {
            pump(&mut sender, &mut network, &mut receiver);
        }
    }

    match config.sender.mode {
        SendingMode::Stream => pump(&mut sender, &mut network, &mut receiver),
        SendingMode::Lake => {
            // The first poll renders the lake; its length is known after that.
            if let Some(bits) = sender.poll_bit_sequence() {
                transmit(bits, &mut network, &mut receiver);
            }
            let per_loop = sender.lake_frame_count().unwrap_or(0);
            let remaining = (per_loop * config.lake_loops).saturating_sub(1);
            for _ in 0..remaining {
                let Some(bits) = sender.poll_bit_sequence() else {
                    break;
                };
                transmit(bits, &mut network, &mut receiver);
            }
            info!(frames_per_loop = per_loop, loops = config.lake_loops, "lake transmitted");
        }
    }
    for bits in network.drain() {
        receiver.put_bit_sequence(bits);
    }

    let received: Vec<SchemaElement> = std::iter::from_fn(|| receiver.poll_message()).collect();
    let corrupted = count_unmatched(&sent, &received);
    let blob_received = receiver.poll_binary_buffer(None).to_bytes();

    Ok(Report {
        network: network.stats(),
        sent: sent.len(),
        emitted: received.len(),
        corrupted,
        blob_sent,
        blob_received,
        sender,
        receiver,
    })
}

/// Send every frame the sender has ready and deliver whatever the channel
/// releases.
fn pump(sender: &mut Sender, network: &mut NetworkSimulator, receiver: &mut Receiver) {
    while let Some(bits) = sender.poll_bit_sequence() {
        transmit(bits, network, receiver);
    }
}

fn transmit(bits: BitBuffer, network: &mut NetworkSimulator, receiver: &mut Receiver) {
    network.send(bits);
    while let Some(delivered) = network.recv() {
        receiver.put_bit_sequence(delivered);
    }
}

/// Received messages must form an ordered subsequence of the sent ones.
/// Returns how many received messages have no match.
fn count_unmatched(sent: &[SchemaElement], received: &[SchemaElement]) -> usize {
    let mut rest = sent;
    let mut unmatched = 0;
    for msg in received {
        match rest.iter().position(|candidate| candidate == msg) {
            Some(index) => rest = &rest[index + 1..],
            None => unmatched += 1,
        }
    }
    unmatched
}
