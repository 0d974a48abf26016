//! Lossy one-way channel simulator for frames.
//!
//! Models the physical carrier between a `Sender` and a `Receiver`:
//! frames can be dropped, duplicated, or overtaken by later frames. Time is
//! counted in sends rather than wall-clock, so a run is fully determined by
//! the seed and the sequence of calls.
//!
//! # Simulated Effects
//!
//! - **Loss**: each frame is dropped with probability `loss_rate`
//! - **Duplication**: a surviving frame is delivered twice with probability
//!   `duplicate_rate`
//! - **Reordering**: each copy is held back by `0..=reorder_window` sends
//!
//! # Implementation
//!
//! A min-heap keyed by delivery tick. `recv` releases frames whose tick has
//! been reached; `drain` flushes everything still in flight.

use crate::bitio::BitBuffer;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Channel impairments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Frame loss probability [0.0, 1.0]
    pub loss_rate: f64,

    /// Probability that a delivered frame arrives twice [0.0, 1.0]
    pub duplicate_rate: f64,

    /// Maximum number of sends a frame can be held back
    pub reorder_window: u64,

    /// Random seed for determinism
    pub seed: u64,
}

impl NetworkConfig {
    /// No impairments: frames arrive once, in order.
    pub fn perfect(seed: u64) -> Self {
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_window: 0,
            seed,
        }
    }

    /// Moderate impairments.
    pub fn default_with_seed(seed: u64) -> Self {
        Self {
            loss_rate: 0.05,
            duplicate_rate: 0.02,
            reorder_window: 4,
            seed,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::default_with_seed(0)
    }
}

/// A frame with its delivery tick.
#[derive(Debug, Clone)]
struct ScheduledFrame {
    deliver_at: u64,
    /// Tie-breaker keeping equal ticks in send order
    order: u64,
    bits: BitBuffer,
}

impl PartialEq for ScheduledFrame {
    fn eq(&self, other: &Self) -> bool {
        (self.deliver_at, self.order) == (other.deliver_at, other.order)
    }
}

impl Eq for ScheduledFrame {}

impl PartialOrd for ScheduledFrame {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledFrame {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: earliest tick first.
        (other.deliver_at, other.order).cmp(&(self.deliver_at, self.order))
    }
}

/// Channel simulator.
#[derive(Debug)]
pub struct NetworkSimulator {
    config: NetworkConfig,
    rng: ChaCha8Rng,
    queue: BinaryHeap<ScheduledFrame>,
    tick: u64,
    order: u64,

    frames_sent: u64,
    frames_dropped: u64,
    frames_duplicated: u64,
    frames_delivered: u64,
}

impl NetworkSimulator {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            queue: BinaryHeap::new(),
            tick: 0,
            order: 0,
            frames_sent: 0,
            frames_dropped: 0,
            frames_duplicated: 0,
            frames_delivered: 0,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Put a frame on the channel. Advances the channel clock by one tick.
    pub fn send(&mut self, bits: BitBuffer) {
        self.tick += 1;
        self.frames_sent += 1;

        if self.config.loss_rate > 0.0 && self.rng.gen::<f64>() < self.config.loss_rate {
            self.frames_dropped += 1;
            return;
        }

        if self.config.duplicate_rate > 0.0 && self.rng.gen::<f64>() < self.config.duplicate_rate {
            self.frames_duplicated += 1;
            self.schedule(bits.clone());
        }
        self.schedule(bits);
    }

    fn schedule(&mut self, bits: BitBuffer) {
        let delay = if self.config.reorder_window == 0 {
            0
        } else {
            self.rng.gen_range(0..=self.config.reorder_window)
        };
        self.order += 1;
        self.queue.push(ScheduledFrame {
            deliver_at: self.tick + delay,
            order: self.order,
            bits,
        });
    }

    /// Next frame whose delivery tick has been reached.
    pub fn recv(&mut self) -> Option<BitBuffer> {
        if self.queue.peek()?.deliver_at > self.tick {
            return None;
        }
        let scheduled = self.queue.pop()?;
        self.frames_delivered += 1;
        Some(scheduled.bits)
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Deliver everything still in flight, in delivery order.
    pub fn drain(&mut self) -> Vec<BitBuffer> {
        let mut frames = Vec::with_capacity(self.queue.len());
        while let Some(scheduled) = self.queue.pop() {
            self.frames_delivered += 1;
            frames.push(scheduled.bits);
        }
        frames
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            frames_sent: self.frames_sent,
            frames_dropped: self.frames_dropped,
            frames_duplicated: self.frames_duplicated,
            frames_delivered: self.frames_delivered,
            frames_in_flight: self.queue.len(),
        }
    }
}

/// Channel counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_duplicated: u64,
    pub frames_delivered: u64,
    pub frames_in_flight: usize,
}

impl NetworkStats {
    pub fn loss_rate(&self) -> f64 {
        if self.frames_sent == 0 {
            0.0
        } else {
            self.frames_dropped as f64 / self.frames_sent as f64
        }
    }

    /// Delivered over sent; duplicates can push this above 1.
    pub fn delivery_rate(&self) -> f64 {
        if self.frames_sent == 0 {
            0.0
        } else {
            self.frames_delivered as f64 / self.frames_sent as f64
        }
    }

    /// Export as `key=value` lines.
    pub fn export_text(&self) -> String {
        format!(
            "frames_sent={}\n\
             frames_dropped={}\n\
             frames_duplicated={}\n\
             frames_delivered={}\n\
             loss_rate={:.4}\n",
            self.frames_sent,
            self.frames_dropped,
            self.frames_duplicated,
            self.frames_delivered,
            self.loss_rate(),
        )
    }
}
