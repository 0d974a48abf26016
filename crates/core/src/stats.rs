//! Sender and receiver counters.
//!
//! Both sides update their counters inline as segments move through them;
//! nothing here is load-bearing for the protocol. The counters are plain
//! `u64`s, so a caller sharing an endpoint across threads shares its stats
//! under the same lock.

use crate::segment::SegmentKind;

/// Segment and bit totals for one segment category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCount {
    pub segments: u64,
    pub bits: u64,
}

impl CategoryCount {
    pub(crate) fn record(&mut self, bits: usize) {
        self.segments += 1;
        self.bits += bits as u64;
    }
}

/// Per-category counters, indexed by segment kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub blob: CategoryCount,
    pub message: CategoryCount,
    pub schema: CategoryCount,
    pub delta: CategoryCount,
}

impl CategoryCounts {
    pub fn record(&mut self, kind: SegmentKind, bits: usize) {
        self.get_mut(kind).record(bits);
    }

    pub fn get(&self, kind: SegmentKind) -> CategoryCount {
        match kind {
            SegmentKind::Blob => self.blob,
            SegmentKind::Message => self.message,
            SegmentKind::Schema => self.schema,
            SegmentKind::Delta => self.delta,
        }
    }

    fn get_mut(&mut self, kind: SegmentKind) -> &mut CategoryCount {
        match kind {
            SegmentKind::Blob => &mut self.blob,
            SegmentKind::Message => &mut self.message,
            SegmentKind::Schema => &mut self.schema,
            SegmentKind::Delta => &mut self.delta,
        }
    }

    pub fn total_segments(&self) -> u64 {
        self.blob.segments + self.message.segments + self.schema.segments + self.delta.segments
    }

    pub fn total_bits(&self) -> u64 {
        self.blob.bits + self.message.bits + self.schema.bits + self.delta.bits
    }

    fn export_into(&self, prefix: &str, out: &mut String) {
        for (name, count) in [
            ("blob", self.blob),
            ("message", self.message),
            ("schema", self.schema),
            ("delta", self.delta),
        ] {
            out.push_str(&format!("{prefix}_{name}_segments={}\n", count.segments));
            out.push_str(&format!("{prefix}_{name}_bits={}\n", count.bits));
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Counters kept by a `Sender`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenderStats {
    /// Frames returned from a poll
    pub frames_sent: u64,

    /// Bits of those frames, padding included
    pub frame_bits: u64,

    /// Zero padding appended to reach the frame length
    pub padding_bits: u64,

    /// Segments created by `add_message`, `add_blob` and schema broadcasts
    pub queued: CategoryCounts,

    /// Segments re-queued from the repeat buffer
    pub repeated: CategoryCount,

    /// Messages that were eligible for a delta but went out in full
    pub delta_fallbacks: u64,

    /// Segments larger than a frame's content budget
    pub oversize_segments: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of transmitted bits that were padding.
    pub fn padding_ratio(&self) -> f64 {
        ratio(self.padding_bits, self.frame_bits)
    }

    /// Share of message-carrying segments sent as deltas.
    pub fn delta_ratio(&self) -> f64 {
        let deltas = self.queued.delta.segments;
        ratio(deltas, deltas + self.queued.message.segments)
    }

    /// Average bits per message-carrying segment.
    pub fn mean_message_bits(&self) -> f64 {
        let q = &self.queued;
        ratio(q.message.bits + q.delta.bits, q.message.segments + q.delta.segments)
    }

    /// Export as `key=value` lines.
    pub fn export_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("frames_sent={}\n", self.frames_sent));
        out.push_str(&format!("frame_bits={}\n", self.frame_bits));
        out.push_str(&format!("padding_bits={}\n", self.padding_bits));
        out.push_str(&format!("padding_ratio={:.4}\n", self.padding_ratio()));
        self.queued.export_into("queued", &mut out);
        out.push_str(&format!("repeated_segments={}\n", self.repeated.segments));
        out.push_str(&format!("repeated_bits={}\n", self.repeated.bits));
        out.push_str(&format!("delta_fallbacks={}\n", self.delta_fallbacks));
        out.push_str(&format!("delta_ratio={:.4}\n", self.delta_ratio()));
        out.push_str(&format!("oversize_segments={}\n", self.oversize_segments));
        out
    }
}

/// Counters kept by a `Receiver`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiverStats {
    /// Frames decoded successfully
    pub frames_received: u64,

    /// Inputs that did not decode as a frame
    pub frames_rejected: u64,

    /// Segments naming a schema slot that does not exist
    pub segments_rejected: u64,

    /// Raw bits handed to `put_bit_sequence`
    pub raw_bits: u64,

    /// Segments accepted, by category
    pub received: CategoryCounts,

    /// Segments dropped because their sequence number was already seen
    pub duplicates: u64,

    /// Messages handed to the output queue
    pub messages_emitted: u64,

    /// Sequence numbers given up on
    pub messages_lost: u64,

    /// Blob bits appended to the binary buffer
    pub blob_bits: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lost messages over all resolved message slots.
    pub fn loss_rate(&self) -> f64 {
        ratio(self.messages_lost, self.messages_lost + self.messages_emitted)
    }

    /// Duplicates over all segments seen.
    pub fn duplicate_rate(&self) -> f64 {
        ratio(self.duplicates, self.duplicates + self.received.total_segments())
    }

    /// Export as `key=value` lines.
    pub fn export_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("frames_received={}\n", self.frames_received));
        out.push_str(&format!("frames_rejected={}\n", self.frames_rejected));
        out.push_str(&format!("segments_rejected={}\n", self.segments_rejected));
        out.push_str(&format!("raw_bits={}\n", self.raw_bits));
        self.received.export_into("received", &mut out);
        out.push_str(&format!("duplicates={}\n", self.duplicates));
        out.push_str(&format!("messages_emitted={}\n", self.messages_emitted));
        out.push_str(&format!("messages_lost={}\n", self.messages_lost));
        out.push_str(&format!("loss_rate={:.4}\n", self.loss_rate()));
        out.push_str(&format!("blob_bits={}\n", self.blob_bits));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_record() {
        let mut counts = CategoryCounts::default();
        counts.record(SegmentKind::Message, 40);
        counts.record(SegmentKind::Message, 20);
        counts.record(SegmentKind::Delta, 7);

        assert_eq!(counts.get(SegmentKind::Message), CategoryCount { segments: 2, bits: 60 });
        assert_eq!(counts.get(SegmentKind::Blob), CategoryCount::default());
        assert_eq!(counts.total_segments(), 3);
        assert_eq!(counts.total_bits(), 67);
    }

    #[test]
    fn test_ratios_without_data() {
        let sender = SenderStats::new();
        assert_eq!(sender.padding_ratio(), 0.0);
        assert_eq!(sender.delta_ratio(), 0.0);
        assert_eq!(ReceiverStats::new().loss_rate(), 0.0);
    }

    #[test]
    fn test_sender_ratios() {
        let mut stats = SenderStats::new();
        stats.frame_bits = 1000;
        stats.padding_bits = 250;
        stats.queued.record(SegmentKind::Message, 100);
        stats.queued.record(SegmentKind::Delta, 20);
        stats.queued.record(SegmentKind::Delta, 30);
        stats.queued.record(SegmentKind::Delta, 10);

        assert_eq!(stats.padding_ratio(), 0.25);
        assert_eq!(stats.delta_ratio(), 0.75);
        assert_eq!(stats.mean_message_bits(), 40.0);
    }

    #[test]
    fn test_receiver_loss_rate() {
        let mut stats = ReceiverStats::new();
        stats.messages_emitted = 95;
        stats.messages_lost = 5;
        assert_eq!(stats.loss_rate(), 0.05);
    }

    #[test]
    fn test_export_text() {
        let mut stats = ReceiverStats::new();
        stats.frames_received = 12;
        stats.messages_lost = 3;
        stats.received.record(SegmentKind::Schema, 90);

        let text = stats.export_text();
        assert!(text.contains("frames_received=12\n"));
        assert!(text.contains("messages_lost=3\n"));
        assert!(text.contains("received_schema_segments=1\n"));
        assert!(text.contains("received_schema_bits=90\n"));

        let sender = SenderStats::new().export_text();
        assert!(sender.contains("queued_delta_segments=0\n"));
        assert!(sender.contains("delta_fallbacks=0\n"));
    }
}
