//! Telemetry message generation for simulation runs.
//!
//! Produces a stream of messages against a fixed weather-station schema. The
//! values drift slowly from one message to the next, so most messages can go
//! out as deltas, with occasional jumps that force a full encoding.
//!
//! # Design
//!
//! Generated data has:
//! - A counter that increments by one (always delta-friendly)
//! - A temperature that random-walks, with rare large jumps
//! - A status enum that changes rarely
//! - A list of recent samples whose length varies, which defeats deltas

use anyhow::Result;
use framecast_core::SchemaElement;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Schema text the generated messages conform to.
pub const TELEMETRY_SCHEMA: &str = r#"FixedMap {
    "counter"  : Integer(12),
    "temp"     : Integer*(10, 5),
    "humidity" : Integer(7, 4),
    "status"   : Enum { "ok", "degraded", "offline" },
    "station"  : Smallscii,
    "samples"  : List [ Integer*(8, 4) ]
}"#;

const STATIONS: [&str; 4] = ["alpha", "bravo", "dock 7", "ridge"];

/// Seeded generator of telemetry messages.
pub struct TelemetryGenerator {
    rng: ChaCha8Rng,
    template: SchemaElement,
    counter: i64,
    temp: i64,
    humidity: i64,
    status: usize,
    station: &'static str,
}

impl TelemetryGenerator {
    pub fn new(seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let station = STATIONS[rng.gen_range(0..STATIONS.len())];
        Ok(Self {
            template: SchemaElement::parse_schema(TELEMETRY_SCHEMA)?,
            counter: 0,
            temp: rng.gen_range(-200..=200),
            humidity: rng.gen_range(20..=80),
            status: 0,
            station,
            rng,
        })
    }

    /// The schema every generated message conforms to.
    pub fn schema(&self) -> &SchemaElement {
        &self.template
    }

    /// Produce the next message and advance the walk.
    pub fn next_message(&mut self) -> Result<SchemaElement> {
        let mut msg = self.template.clone();
        msg.set("counter", self.counter % 4096)?;
        msg.set("temp", self.temp)?;
        msg.set("humidity", self.humidity)?;
        msg.set("status", ["ok", "degraded", "offline"][self.status])?;
        msg.set("station", self.station)?;

        // 10% of messages carry a different number of samples.
        let sample_count = if self.rng.gen_bool(0.1) { 2 } else { 3 };
        for k in 0..sample_count {
            let sample = (self.temp / 4 + k).clamp(-127, 127);
            msg.set(&format!("samples[{k}]"), sample)?;
        }

        self.step();
        Ok(msg)
    }

    fn step(&mut self) {
        self.counter += 1;

        // Mostly small steps, sometimes a jump too large for a delta.
        let step = if self.rng.gen_bool(0.05) {
            self.rng.gen_range(-150..=150)
        } else {
            self.rng.gen_range(-3..=3)
        };
        self.temp = (self.temp + step).clamp(-511, 511);
        self.humidity = (self.humidity + self.rng.gen_range(-1..=1)).clamp(0, 100);

        if self.rng.gen_bool(0.02) {
            self.status = self.rng.gen_range(0..3);
        }
    }
}

/// Generate random blob payload bytes.
pub fn generate_blob(seed: u64, size_bytes: usize) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..size_bytes).map(|_| rng.gen()).collect()
}
