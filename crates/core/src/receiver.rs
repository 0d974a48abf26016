//! The receiving side: ordered emission with a sliding loss window.
//!
//! Segments are held in a pending buffer indexed by sequence number,
//! starting at the next number expected. Gaps hold placeholders. The
//! buffer drains from the front as long as the front can be resolved; a
//! front slot that has fallen more than `lost_interval` numbers behind the
//! highest buffered one is resolved by force, as lost if need be.
//!
//! ```text
//! next_expected                              highest
//!      │                                        │
//!      ▼                                        ▼
//!    [ P ][ Msg ][ Delta ][ P ][ P ][ Blob ] [ Msg ]
//!      └── forced once highest - seq > lost_interval
//! ```
//!
//! Schema segments bypass the buffer and update the schema bank at once.

use crate::bitio::BitBuffer;
use crate::error::Result;
use crate::frame::Frame;
use crate::schema::SchemaElement;
use crate::segment::{Segment, SCHEMA_SLOTS};
use crate::sender::SendingMode;
use crate::seq::{SeqNum, HALF_WINDOW};
use crate::stats::ReceiverStats;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Receiver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Sequence distance after which a missing or undecodable segment is
    /// declared lost. Must exceed the sender's `repeat_after`.
    pub lost_interval: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self { lost_interval: 21 }
    }
}

/// One position of the pending buffer.
#[derive(Debug, Clone)]
enum Slot {
    /// Sequence number known to exist but not received yet
    Placeholder,
    Filled(Arc<Segment>),
}

/// A decoded message kept as a delta reference.
#[derive(Debug)]
struct CachedMessage {
    message: SchemaElement,
    schema: Arc<SchemaElement>,
}

/// Outcome of trying to resolve the front slot.
enum Resolution {
    Emitted(CachedMessage),
    Blob(BitBuffer),
    /// Cannot be resolved yet
    Pending(&'static str),
}

/// Rebuilds the ordered message stream from frames.
#[derive(Debug)]
pub struct Receiver {
    config: ReceiverConfig,

    /// Loss window in effect; widened in lake mode
    lost_interval: u32,

    schemas: [Option<Arc<SchemaElement>>; SCHEMA_SLOTS],
    references: HashMap<u16, CachedMessage>,

    /// Reference sequence numbers in insertion order, for pruning
    reference_order: VecDeque<SeqNum>,

    pending: VecDeque<Slot>,
    next_expected: SeqNum,
    last_processed: Option<SeqNum>,
    last_seen: Option<SeqNum>,
    messages_lost: u64,
    output: VecDeque<SchemaElement>,
    binary: BitBuffer,

    total_segments: u16,
    data_stream_index: u16,
    resource_identifier: String,

    stats: ReceiverStats,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new(ReceiverConfig::default())
    }
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            lost_interval: config.lost_interval,
            config,
            schemas: Default::default(),
            references: HashMap::new(),
            reference_order: VecDeque::new(),
            pending: VecDeque::new(),
            next_expected: SeqNum::ZERO,
            last_processed: None,
            last_seen: None,
            messages_lost: 0,
            output: VecDeque::new(),
            binary: BitBuffer::new(),
            total_segments: 0,
            data_stream_index: 0,
            resource_identifier: String::new(),
            stats: ReceiverStats::new(),
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Loss window currently in effect.
    pub fn lost_interval(&self) -> u32 {
        self.lost_interval
    }

    // === Input ===

    /// Decode a frame and absorb its segments.
    ///
    /// Malformed input is counted and logged, never returned as an error.
    pub fn put_bit_sequence(&mut self, bits: BitBuffer) {
        self.stats.raw_bits += bits.len() as u64;
        match Frame::decode(bits) {
            Ok(frame) => self.put_frame(frame),
            Err(e) => {
                self.stats.frames_rejected += 1;
                warn!(error = %e, "dropping undecodable frame");
            }
        }
    }

    /// Decode base64 text into bits, then into a frame.
    pub fn put_base64(&mut self, text: &str) {
        match BitBuffer::from_base64(text) {
            Ok(bits) => self.put_bit_sequence(bits),
            Err(e) => {
                self.stats.frames_rejected += 1;
                warn!(error = %e, "dropping frame with invalid base64");
            }
        }
    }

    /// Absorb an already decoded frame.
    pub fn put_frame(&mut self, frame: Frame) {
        self.stats.frames_received += 1;
        self.total_segments = frame.total_segments;
        self.lost_interval = if frame.total_segments > 0 {
            // A lake replays every segment, so nothing is ever lost.
            u32::from(frame.total_segments) + 1
        } else {
            self.config.lost_interval
        };
        self.data_stream_index = frame.data_stream_index;
        self.resource_identifier = frame.resource_identifier;

        for segment in frame.segments {
            match segment.as_ref() {
                Segment::Schema {
                    schema_number,
                    schema,
                    ..
                } => match self.schemas.get_mut(*schema_number as usize) {
                    Some(slot) => {
                        trace!(schema = *schema_number, "received schema");
                        self.stats.received.record(segment.kind(), segment.size());
                        *slot = Some(Arc::clone(schema));
                    }
                    None => {
                        warn!(schema = *schema_number, "dropping schema for nonexistent slot");
                        self.stats.segments_rejected += 1;
                    }
                },
                Segment::Message { schema_number, .. }
                    if *schema_number as usize >= SCHEMA_SLOTS =>
                {
                    warn!(seq = %segment.seq(), schema = *schema_number, "dropping message for nonexistent schema slot");
                    self.stats.segments_rejected += 1;
                }
                _ => self.insert(segment),
            }
        }

        self.drain();
    }

    /// Place a segment at its slot, filling any gap with placeholders.
    fn insert(&mut self, segment: Arc<Segment>) {
        let seq = segment.seq();
        self.last_seen = Some(seq);
        let offset = self.next_expected.distance(seq) as usize;
        if offset >= HALF_WINDOW as usize {
            trace!(seq = %seq, "dropping already processed segment");
            self.stats.duplicates += 1;
            return;
        }

        if let Some(slot) = self.pending.get_mut(offset) {
            match slot {
                Slot::Placeholder => {
                    self.stats.received.record(segment.kind(), segment.size());
                    *slot = Slot::Filled(segment);
                }
                Slot::Filled(_) => {
                    trace!(seq = %seq, "dropping duplicate segment");
                    self.stats.duplicates += 1;
                }
            }
            return;
        }

        while self.pending.len() < offset {
            self.pending.push_back(Slot::Placeholder);
        }
        self.stats.received.record(segment.kind(), segment.size());
        self.pending.push_back(Slot::Filled(segment));
    }

    /// Resolve slots from the front while progress is possible.
    fn drain(&mut self) {
        while let Some(slot) = self.pending.front() {
            let forced = self.pending.len() - 1 > self.lost_interval as usize;
            let seq = self.next_expected;

            let resolution = match slot {
                Slot::Placeholder => Resolution::Pending("not received"),
                Slot::Filled(segment) => self.resolve(segment),
            };

            match resolution {
                Resolution::Emitted(cached) => {
                    trace!(seq = %seq, "emitting message");
                    self.stats.messages_emitted += 1;
                    self.output.push_back(cached.message.clone());
                    self.references.insert(seq.value(), cached);
                    self.reference_order.push_back(seq);
                }
                Resolution::Blob(bits) => {
                    trace!(seq = %seq, bits = bits.len(), "appending blob");
                    self.stats.blob_bits += bits.len() as u64;
                    self.binary.append(&bits);
                }
                Resolution::Pending(_) if !forced => break,
                Resolution::Pending(reason) => {
                    warn!(seq = %seq, reason, "declaring message lost");
                    self.messages_lost += 1;
                    self.stats.messages_lost += 1;
                }
            }
            self.advance();
        }
    }

    fn resolve(&self, segment: &Segment) -> Resolution {
        match segment {
            Segment::Blob { contents, .. } => Resolution::Blob(contents.clone()),
            Segment::Message {
                schema_number,
                contents,
                ..
            } => {
                let Some(schema) = self
                    .schemas
                    .get(*schema_number as usize)
                    .and_then(Option::as_ref)
                else {
                    return Resolution::Pending("unknown schema");
                };
                match schema.decode_content_exact(contents.clone(), false) {
                    Ok(message) => Resolution::Emitted(CachedMessage {
                        message,
                        schema: Arc::clone(schema),
                    }),
                    Err(e) => {
                        debug!(seq = %segment.seq(), error = %e, "message does not decode");
                        Resolution::Pending("undecodable message")
                    }
                }
            }
            Segment::Delta {
                reference,
                contents,
                ..
            } => {
                let Some(cached) = self.references.get(&reference.value()) else {
                    return Resolution::Pending("missing reference");
                };
                match apply_delta(cached, contents) {
                    Ok(message) => Resolution::Emitted(CachedMessage {
                        message,
                        schema: Arc::clone(&cached.schema),
                    }),
                    Err(e) => {
                        debug!(seq = %segment.seq(), error = %e, "delta does not apply");
                        Resolution::Pending("undecodable delta")
                    }
                }
            }
            // Schema segments never enter the pending buffer.
            Segment::Schema { .. } => Resolution::Pending("schema in pending buffer"),
        }
    }

    fn advance(&mut self) {
        let seq = self.next_expected;
        self.pending.pop_front();
        self.last_processed = Some(seq);
        self.next_expected = seq.next();
        self.prune_references();
    }

    /// Drop references too old to be named by any live segment.
    fn prune_references(&mut self) {
        while let Some(&oldest) = self.reference_order.front() {
            if oldest.distance(self.next_expected) <= HALF_WINDOW {
                break;
            }
            self.reference_order.pop_front();
            self.references.remove(&oldest.value());
        }
    }

    // === Output ===

    /// Next decoded message, in sequence order.
    pub fn poll_message(&mut self) -> Option<SchemaElement> {
        self.output.pop_front()
    }

    /// Sequence numbers given up on so far.
    pub fn message_lost_count(&self) -> u64 {
        self.messages_lost
    }

    /// Remove and return up to `max_bits` blob bits, or all of them.
    pub fn poll_binary_buffer(&mut self, max_bits: Option<usize>) -> BitBuffer {
        let n = max_bits.unwrap_or(self.binary.len());
        self.binary.truncate_prefix(n)
    }

    pub fn binary_buffer_len(&self) -> usize {
        self.binary.len()
    }

    /// In lake mode, whether each sequence number of the lake has arrived.
    ///
    /// Returns `None` in stream mode.
    pub fn buffer_status(&self) -> Option<Vec<bool>> {
        if self.total_segments == 0 {
            return None;
        }
        let total = self.total_segments as usize;
        let first_pending = self.next_expected.value() as usize;
        let mut status = vec![false; total];
        for (seq, received) in status.iter_mut().enumerate() {
            *received = match seq.checked_sub(first_pending) {
                None => true,
                Some(offset) => matches!(self.pending.get(offset), Some(Slot::Filled(_))),
            };
        }
        Some(status)
    }

    pub fn total_segments(&self) -> u16 {
        self.total_segments
    }

    pub fn sending_mode(&self) -> SendingMode {
        if self.total_segments > 0 {
            SendingMode::Lake
        } else {
            SendingMode::Stream
        }
    }

    pub fn data_stream_index(&self) -> u16 {
        self.data_stream_index
    }

    pub fn resource_identifier(&self) -> &str {
        &self.resource_identifier
    }

    /// Sequence number of the most recent non-schema segment received.
    pub fn last_sequence_seen(&self) -> Option<SeqNum> {
        self.last_seen
    }

    /// Sequence number of the last slot resolved, emitted or lost.
    pub fn last_processed(&self) -> Option<SeqNum> {
        self.last_processed
    }

    /// Schema received under `schema_number`, if any.
    pub fn schema(&self, schema_number: u8) -> Option<&SchemaElement> {
        self.schemas
            .get(schema_number as usize)
            .and_then(|slot| slot.as_deref())
    }

    /// Slots waiting in the pending buffer, placeholders included.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn apply_delta(cached: &CachedMessage, contents: &BitBuffer) -> Result<SchemaElement> {
    let delta = cached.schema.decode_content_exact(contents.clone(), true)?;
    cached.message.patch(&delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{Sender, SenderConfig};

    const READING: &str = r#"FixedMap { "name": Smallscii, "value": Integer(8) }"#;

    fn blob(seq: u32) -> Arc<Segment> {
        Arc::new(Segment::blob(SeqNum::new(seq), BitBuffer::from_value(1, 1).unwrap()).unwrap())
    }

    fn frame_of(segments: Vec<Arc<Segment>>) -> Frame {
        Frame {
            segments,
            ..Frame::default()
        }
    }

    fn receiver_with_window(lost_interval: u32) -> Receiver {
        Receiver::new(ReceiverConfig { lost_interval })
    }

    /// A sender that puts each message in its own frame, schema included.
    fn one_frame_per_message() -> Sender {
        let mut sender = Sender::new(SenderConfig {
            repeat_after: 0,
            schema_broadcast_interval: 1,
            ..SenderConfig::default()
        });
        sender.set_schema_text(0, READING).unwrap();
        sender
    }

    fn reading(name: &str, value: i64) -> SchemaElement {
        let mut msg = SchemaElement::parse_schema(READING).unwrap();
        msg.set("name", name).unwrap();
        msg.set("value", value).unwrap();
        msg
    }

    fn drain_messages(receiver: &mut Receiver) -> Vec<SchemaElement> {
        std::iter::from_fn(|| receiver.poll_message()).collect()
    }

    #[test]
    fn test_full_then_delta_scenario() {
        let mut sender = one_frame_per_message();
        let mut receiver = Receiver::default();

        sender.add_message(0, reading("abc", 10), false).unwrap();
        receiver.put_bit_sequence(sender.poll_bit_sequence().unwrap());
        sender.add_message(0, reading("abc", 12), false).unwrap();
        receiver.put_bit_sequence(sender.poll_bit_sequence().unwrap());

        assert_eq!(
            drain_messages(&mut receiver),
            vec![reading("abc", 10), reading("abc", 12)]
        );
        assert_eq!(receiver.stats().received.delta.segments, 1);
        assert_eq!(receiver.message_lost_count(), 0);
    }

    #[test]
    fn test_delta_chain_with_late_segment() {
        let mut sender = one_frame_per_message();
        let mut frames = Vec::new();
        for value in 0..5 {
            sender.add_message(0, reading("chain", value * 3), false).unwrap();
            frames.push(sender.poll_bit_sequence().unwrap());
        }

        let mut receiver = Receiver::default();
        for i in [0, 1, 3, 4] {
            receiver.put_bit_sequence(frames[i].clone());
        }
        assert_eq!(drain_messages(&mut receiver).len(), 2);
        assert_eq!(receiver.pending_len(), 3);

        receiver.put_bit_sequence(frames[2].clone());
        let late: Vec<i64> = drain_messages(&mut receiver)
            .iter()
            .map(|m| match m.get("value").unwrap() {
                SchemaElement::Integer(int) => int.value(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(late, vec![6, 9, 12]);
        assert_eq!(receiver.message_lost_count(), 0);
    }

    #[test]
    fn test_window_edge_declares_nothing_lost() {
        let mut receiver = receiver_with_window(3);
        receiver.put_frame(frame_of(vec![blob(0)]));
        receiver.put_frame(frame_of(vec![blob(4)]));

        assert_eq!(receiver.message_lost_count(), 0);
        assert_eq!(receiver.pending_len(), 4);
        assert_eq!(receiver.last_processed(), Some(SeqNum::ZERO));
    }

    #[test]
    fn test_one_past_window_loses_one() {
        let mut receiver = receiver_with_window(3);
        receiver.put_frame(frame_of(vec![blob(0)]));
        receiver.put_frame(frame_of(vec![blob(4)]));
        receiver.put_frame(frame_of(vec![blob(5)]));

        assert_eq!(receiver.message_lost_count(), 1);
        assert_eq!(receiver.last_processed(), Some(SeqNum::new(1)));

        // 2 and 3 can still arrive and release 4 and 5
        receiver.put_frame(frame_of(vec![blob(3), blob(2)]));
        assert_eq!(receiver.message_lost_count(), 1);
        assert_eq!(receiver.pending_len(), 0);
        assert_eq!(receiver.binary_buffer_len(), 5);
    }

    #[test]
    fn test_jump_loses_exactly_window() {
        let mut receiver = receiver_with_window(3);
        receiver.put_frame(frame_of(vec![blob(0)]));
        receiver.put_frame(frame_of(vec![blob(7)]));

        assert_eq!(receiver.message_lost_count(), 3);
        assert_eq!(receiver.last_processed(), Some(SeqNum::new(3)));
        assert_eq!(receiver.pending_len(), 4);
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut sender = one_frame_per_message();
        sender.add_message(0, reading("dup", 1), false).unwrap();
        let bits = sender.poll_bit_sequence().unwrap();

        let mut receiver = Receiver::default();
        receiver.put_bit_sequence(bits.clone());
        receiver.put_bit_sequence(bits);

        assert_eq!(drain_messages(&mut receiver).len(), 1);
        assert_eq!(receiver.stats().duplicates, 1);
        // The schema segment is applied both times.
        assert_eq!(receiver.stats().received.schema.segments, 2);
    }

    #[test]
    fn test_duplicate_while_pending() {
        let mut receiver = receiver_with_window(10);
        receiver.put_frame(frame_of(vec![blob(2)]));
        receiver.put_frame(frame_of(vec![blob(2)]));
        assert_eq!(receiver.stats().duplicates, 1);
        assert_eq!(receiver.pending_len(), 3);
    }

    #[test]
    fn test_unknown_schema_waits_then_lost() {
        let mut receiver = receiver_with_window(2);
        let message = Arc::new(
            Segment::message(SeqNum::ZERO, 9, BitBuffer::from_value(3, 4).unwrap()).unwrap(),
        );
        receiver.put_frame(frame_of(vec![message]));
        assert_eq!(receiver.pending_len(), 1);
        assert_eq!(receiver.message_lost_count(), 0);

        receiver.put_frame(frame_of(vec![blob(1), blob(2), blob(3)]));
        assert_eq!(receiver.message_lost_count(), 1);
        assert_eq!(receiver.pending_len(), 0);
        assert_eq!(receiver.binary_buffer_len(), 3);
    }

    #[test]
    fn test_schema_arrives_after_message() {
        let mut receiver = Receiver::default();
        let schema = Arc::new(SchemaElement::parse_schema("Integer(4)").unwrap());
        let message = Arc::new(
            Segment::message(SeqNum::ZERO, 9, BitBuffer::from_value(3, 4).unwrap()).unwrap(),
        );
        receiver.put_frame(frame_of(vec![message]));
        assert!(receiver.poll_message().is_none());

        let schema_segment = Arc::new(Segment::schema(SeqNum::ZERO, 9, schema).unwrap());
        receiver.put_frame(frame_of(vec![schema_segment]));
        assert_eq!(receiver.poll_message().unwrap().to_string(), "3");
        assert!(receiver.schema(9).is_some());
    }

    #[test]
    fn test_out_of_range_schema_number_is_rejected() {
        let mut receiver = Receiver::default();
        let schema = Arc::new(SchemaElement::parse_schema("Integer(4)").unwrap());
        let bad_schema = Arc::new(Segment::Schema {
            seq: SeqNum::ZERO,
            schema_number: 20,
            definition: schema.schema_bits().unwrap(),
            schema,
        });
        let bad_message = Arc::new(Segment::Message {
            seq: SeqNum::ZERO,
            schema_number: 200,
            contents: BitBuffer::from_value(3, 4).unwrap(),
        });
        receiver.put_frame(frame_of(vec![bad_schema, bad_message, blob(1)]));

        assert_eq!(receiver.stats().segments_rejected, 2);
        assert!(receiver.schema(20).is_none());
        assert!(receiver.poll_message().is_none());
        assert_eq!(receiver.pending_len(), 2);
        assert!(receiver.stats().export_text().contains("segments_rejected=2\n"));
    }

    #[test]
    fn test_binary_buffer() {
        let mut receiver = Receiver::default();
        let contents = BitBuffer::from_value(0b1011_0011, 8).unwrap();
        receiver.put_frame(frame_of(vec![Arc::new(
            Segment::blob(SeqNum::ZERO, contents).unwrap(),
        )]));

        assert_eq!(receiver.poll_binary_buffer(Some(4)).to_string(), "1011");
        assert_eq!(receiver.poll_binary_buffer(None).to_string(), "0011");
        assert_eq!(receiver.binary_buffer_len(), 0);
        assert_eq!(receiver.stats().blob_bits, 8);
    }

    #[test]
    fn test_rejects_garbage() {
        let mut receiver = Receiver::default();
        receiver.put_bit_sequence(BitBuffer::from_value(0xF, 4).unwrap());
        receiver.put_base64("not base64 !!");
        assert_eq!(receiver.stats().frames_rejected, 2);
        assert_eq!(receiver.stats().frames_received, 0);
    }

    #[test]
    fn test_base64_transport() {
        let mut sender = one_frame_per_message();
        sender.add_message(0, reading("b64", 7), false).unwrap();
        let mut receiver = Receiver::default();
        receiver.put_base64(&sender.poll_base64().unwrap());
        assert_eq!(receiver.poll_message(), Some(reading("b64", 7)));
    }

    #[test]
    fn test_sequence_wraps() {
        let mut receiver = receiver_with_window(5);
        for start in (0..4200u32).step_by(10) {
            let segments = (start..start + 10).map(blob).collect();
            receiver.put_frame(frame_of(segments));
        }
        assert_eq!(receiver.message_lost_count(), 0);
        assert_eq!(receiver.binary_buffer_len(), 4200);
        assert_eq!(receiver.last_processed(), Some(SeqNum::new(4199)));
    }

    #[test]
    fn test_lake_status() {
        let mut receiver = Receiver::default();
        let mut frame = frame_of(vec![blob(1), blob(3)]);
        frame.total_segments = 5;
        frame.data_stream_index = 2;
        frame.resource_identifier = "lake".into();
        receiver.put_frame(frame);

        assert_eq!(receiver.sending_mode(), SendingMode::Lake);
        assert_eq!(receiver.lost_interval(), 6);
        assert_eq!(receiver.total_segments(), 5);
        assert_eq!(receiver.data_stream_index(), 2);
        assert_eq!(receiver.resource_identifier(), "lake");
        assert_eq!(receiver.last_sequence_seen(), Some(SeqNum::new(3)));
        assert_eq!(
            receiver.buffer_status().unwrap(),
            vec![false, true, false, true, false]
        );

        let mut frame = frame_of(vec![blob(0), blob(2), blob(4)]);
        frame.total_segments = 5;
        receiver.put_frame(frame);
        assert_eq!(receiver.buffer_status().unwrap(), vec![true; 5]);
        assert_eq!(receiver.message_lost_count(), 0);
    }

    #[test]
    fn test_stream_has_no_buffer_status() {
        let mut receiver = Receiver::default();
        receiver.put_frame(frame_of(vec![blob(0)]));
        assert_eq!(receiver.sending_mode(), SendingMode::Stream);
        assert!(receiver.buffer_status().is_none());
    }
}
