//! The sending side: numbering, delta selection, repetition and frame packing.
//!
//! # Pipeline
//!
//! ```text
//! add_message ──► [diff vs reference] ──► Delta or Message segment
//!                                             │
//!                       ┌─────────────────────┴──────────────┐
//!                       ▼                                    ▼
//!                  send buffer  ◄── re-queue after N ──  repeat buffer
//!                       │
//!                       ▼
//!            poll_buffer: pack into one Frame
//! ```
//!
//! In lake mode the whole send buffer is rendered into frames on the first
//! poll and those frames are replayed in order.

use crate::bitio::BitBuffer;
use crate::error::{Error, Result};
use crate::frame::{Frame, MAX_FRAME_BITS};
use crate::schema::SchemaElement;
use crate::segment::{Segment, SegmentKind, SCHEMA_SLOTS};
use crate::seq::{SeqNum, SEQ_MODULUS};
use crate::smallscii;
use crate::stats::SenderStats;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// How the sender treats its segment set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendingMode {
    /// Open-ended transmission; total segment count unknown
    #[default]
    Stream,
    /// A finite segment set replayed in a loop. Sequence numbers cannot
    /// wrap inside a lake, so it holds at most 4096 messages and blobs.
    Lake,
}

/// Sender settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Length of every emitted frame in bits, padding included
    pub max_frame_length: usize,

    /// Deltas allowed after a full message before the next full one
    pub delta_interval: usize,

    /// Sequence distance after which a segment is sent a second time (0 = never)
    pub repeat_after: u32,

    /// Broadcast a schema after every N sequence numbers (0 = never)
    pub schema_broadcast_interval: u32,

    pub mode: SendingMode,

    /// Replay the lake forever instead of stopping after one pass
    pub lake_loop: bool,

    /// An empty send buffer ends transmission; otherwise idle polls advertise schemas
    pub empty_buffer_is_eof: bool,

    pub data_stream_index: u16,

    pub resource_identifier: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_frame_length: 512,
            delta_interval: 10,
            repeat_after: 20,
            schema_broadcast_interval: 10,
            mode: SendingMode::Stream,
            lake_loop: true,
            empty_buffer_is_eof: true,
            data_stream_index: 0,
            resource_identifier: String::new(),
        }
    }
}

/// The last message sent in full; deltas are computed against it.
#[derive(Debug)]
struct Reference {
    schema_number: u8,
    seq: SeqNum,
    message: SchemaElement,
}

/// A pre-encoded lake frame.
#[derive(Debug)]
struct LakeFrame {
    bits: BitBuffer,
    padding: usize,
}

#[derive(Debug)]
struct Lake {
    frames: Vec<LakeFrame>,
    cursor: usize,
}

/// Turns messages and blobs into a sequence of fixed-length frames.
#[derive(Debug)]
pub struct Sender {
    config: SenderConfig,
    schemas: [Option<Arc<SchemaElement>>; SCHEMA_SLOTS],
    next_seq: SeqNum,
    send_buffer: VecDeque<Arc<Segment>>,
    repeat_buffer: VecDeque<Arc<Segment>>,
    reference: Option<Reference>,
    deltas_since_full: usize,

    /// Slot of the last schema broadcast, for round-robin
    last_schema_sent: Option<usize>,

    lake: Option<Lake>,
    stats: SenderStats,
}

impl Default for Sender {
    fn default() -> Self {
        Self::new(SenderConfig::default())
    }
}

impl Sender {
    pub fn new(mut config: SenderConfig) -> Self {
        config.resource_identifier = match smallscii::normalize(&config.resource_identifier) {
            Ok(identifier) => identifier,
            Err(e) => {
                warn!(error = %e, "ignoring resource identifier");
                String::new()
            }
        };
        let mode = config.mode;
        let mut sender = Self {
            config,
            schemas: Default::default(),
            next_seq: SeqNum::ZERO,
            send_buffer: VecDeque::new(),
            repeat_buffer: VecDeque::new(),
            reference: None,
            deltas_since_full: 0,
            last_schema_sent: None,
            lake: None,
            stats: SenderStats::new(),
        };
        sender.set_max_frame_length(sender.config.max_frame_length);
        sender.set_sending_mode(mode);
        sender
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    // === Configuration ===

    /// Set the frame length, clamped to what the length field can declare.
    pub fn set_max_frame_length(&mut self, bits: usize) {
        if bits > MAX_FRAME_BITS {
            warn!(requested = bits, max = MAX_FRAME_BITS, "clamping frame length");
        }
        self.config.max_frame_length = bits.min(MAX_FRAME_BITS);
    }

    /// Set the number of deltas allowed between full messages (0 disables deltas).
    pub fn set_delta_interval(&mut self, interval: usize) {
        self.config.delta_interval = interval;
    }

    /// Set the repetition distance. Must stay below the receiver's loss window.
    pub fn set_repeat_after(&mut self, distance: u32) {
        self.config.repeat_after = distance;
        if distance == 0 {
            self.repeat_buffer.clear();
        }
    }

    pub fn set_schema_broadcast_interval(&mut self, interval: u32) {
        self.config.schema_broadcast_interval = interval;
    }

    /// Switch modes. Lake mode turns off repetition, periodic broadcasts and
    /// idle advertisement, since the whole lake is replayed anyway.
    pub fn set_sending_mode(&mut self, mode: SendingMode) {
        self.config.mode = mode;
        if mode == SendingMode::Lake {
            self.config.empty_buffer_is_eof = true;
            self.config.schema_broadcast_interval = 0;
            self.set_repeat_after(0);
        }
    }

    pub fn sending_mode(&self) -> SendingMode {
        self.config.mode
    }

    pub fn set_lake_loop(&mut self, lake_loop: bool) {
        self.config.lake_loop = lake_loop;
    }

    pub fn set_empty_buffer_is_eof(&mut self, eof: bool) {
        self.config.empty_buffer_is_eof = eof;
    }

    pub fn set_data_stream_index(&mut self, index: u16) {
        self.config.data_stream_index = index;
    }

    /// Set the resource identifier stamped on every frame.
    ///
    /// # Errors
    /// `BitFormatError::UnencodableChar` if it has characters outside Smallscii.
    pub fn set_resource_identifier(&mut self, identifier: &str) -> Result<()> {
        self.config.resource_identifier = smallscii::normalize(identifier)?;
        Ok(())
    }

    // === Schema bank ===

    /// Register `schema` under `schema_number`.
    ///
    /// # Errors
    /// `Error::Config` for a number outside 0..16, or the schema's encoding error.
    pub fn set_schema(&mut self, schema_number: u8, schema: SchemaElement) -> Result<()> {
        let slot = slot_index(schema_number)?;
        schema.schema_bits()?;
        debug!(schema = schema_number, text = %schema.schema_text(), "registered schema");
        self.schemas[slot] = Some(Arc::new(schema));
        Ok(())
    }

    /// Parse `text` in the schema grammar and register it.
    pub fn set_schema_text(&mut self, schema_number: u8, text: &str) -> Result<()> {
        self.set_schema(schema_number, SchemaElement::parse_schema(text)?)
    }

    /// The schema registered under `schema_number`, if any.
    pub fn schema(&self, schema_number: u8) -> Option<&SchemaElement> {
        self.schemas
            .get(schema_number as usize)
            .and_then(|slot| slot.as_deref())
    }

    // === Input ===

    /// Queue a message, as a delta when possible. Returns the sequence
    /// number assigned to it.
    ///
    /// A delta is attempted when `force_full` is false, a full message with
    /// the same schema number was sent before, and fewer than
    /// `delta_interval` deltas have followed it. Any failure to build the
    /// delta falls back to a full message.
    ///
    /// # Errors
    /// - `Error::UnknownSchema` if nothing is registered under `schema_number`
    /// - `Error::TypeMismatch` if `message` does not conform to that schema
    /// - `BitFormatError` if the full encoding does not fit a segment
    pub fn add_message(
        &mut self,
        schema_number: u8,
        message: SchemaElement,
        force_full: bool,
    ) -> Result<SeqNum> {
        let schema = self
            .schema(schema_number)
            .ok_or(Error::UnknownSchema(schema_number))?;
        if !message.conforms_to(schema) {
            return Err(Error::type_mismatch(format!(
                "message {message} does not conform to schema {schema_number}"
            )));
        }

        self.check_lake_capacity()?;
        let seq = self.next_seq;
        if !force_full {
            if let Some(segment) = self.try_delta(schema_number, &message, seq) {
                self.deltas_since_full += 1;
                debug!(seq = %seq, schema = schema_number, bits = segment.size(), "queued delta segment");
                self.enqueue(segment);
                return Ok(seq);
            }
        }

        let segment = Segment::message(seq, schema_number, message.content_bits(false)?)?;
        debug!(seq = %seq, schema = schema_number, bits = segment.size(), "queued message segment");
        self.reference = Some(Reference {
            schema_number,
            seq,
            message,
        });
        self.deltas_since_full = 0;
        self.enqueue(segment);
        Ok(seq)
    }

    /// Parse `text` against the schema under `schema_number` and queue it.
    ///
    /// # Errors
    /// `Error::UnknownSchema` if the schema is unregistered, or a parse error.
    pub fn add_message_text(&mut self, schema_number: u8, text: &str, force_full: bool) -> Result<SeqNum> {
        let schema = self
            .schema(schema_number)
            .ok_or(Error::UnknownSchema(schema_number))?;
        let message = schema.parse_content(text)?;
        self.add_message(schema_number, message, force_full)
    }

    /// Queue opaque bits as a blob segment.
    ///
    /// # Errors
    /// `BitFormatError::FieldOverflow` if `bits` exceeds 4095 bits.
    pub fn add_blob(&mut self, bits: BitBuffer) -> Result<SeqNum> {
        self.check_lake_capacity()?;
        let seq = self.next_seq;
        let segment = Segment::blob(seq, bits)?;
        debug!(seq = %seq, bits = segment.size(), "queued blob segment");
        self.enqueue(segment);
        Ok(seq)
    }

    /// In lake mode, refuse a segment that would wrap the sequence numbers.
    fn check_lake_capacity(&self) -> Result<()> {
        if self.config.mode != SendingMode::Lake {
            return Ok(());
        }
        let queued = self.stats.queued.total_segments() - self.stats.queued.schema.segments;
        if queued >= u64::from(SEQ_MODULUS) {
            return Err(Error::Config(format!(
                "a lake holds at most {SEQ_MODULUS} messages and blobs"
            )));
        }
        Ok(())
    }

    fn try_delta(&mut self, schema_number: u8, message: &SchemaElement, seq: SeqNum) -> Option<Segment> {
        let reference = self.reference.as_ref()?;
        if reference.schema_number != schema_number
            || self.deltas_since_full >= self.config.delta_interval
        {
            return None;
        }

        let attempt = reference
            .message
            .diff(message)
            .and_then(|delta| delta.content_bits(true))
            .and_then(|bits| Segment::delta(seq, reference.seq, bits));
        match attempt {
            Ok(segment) => Some(segment),
            Err(e) => {
                debug!(seq = %seq, reason = %e, "delta not possible, sending full message");
                self.stats.delta_fallbacks += 1;
                None
            }
        }
    }

    /// Number the segment's slot, queue it, then run broadcast and repetition.
    fn enqueue(&mut self, segment: Segment) {
        self.stats.queued.record(segment.kind(), segment.size());
        let segment = Arc::new(segment);
        self.send_buffer.push_back(Arc::clone(&segment));
        if self.config.repeat_after > 0 {
            self.repeat_buffer.push_back(segment);
        }
        let seq = self.next_seq;
        self.next_seq = seq.next();

        let interval = self.config.schema_broadcast_interval;
        if interval > 0 && u32::from(seq.value()) % interval == 0 {
            self.broadcast_next_schema();
        }

        self.requeue_repeats();
    }

    /// Move every segment older than `repeat_after` back to the send buffer.
    fn requeue_repeats(&mut self) {
        let repeat_after = self.config.repeat_after;
        if repeat_after == 0 {
            return;
        }
        while let Some(front) = self.repeat_buffer.front() {
            if u32::from(front.seq().distance(self.next_seq)) <= repeat_after {
                break;
            }
            if let Some(segment) = self.repeat_buffer.pop_front() {
                trace!(seq = %segment.seq(), "repeating segment");
                self.stats.repeated.record(segment.size());
                self.send_buffer.push_back(segment);
            }
        }
    }

    /// Queue a schema segment for the next registered slot after the last one sent.
    fn broadcast_next_schema(&mut self) {
        let start = self.last_schema_sent.map_or(0, |last| last + 1);
        let next = (0..SCHEMA_SLOTS)
            .map(|offset| (start + offset) % SCHEMA_SLOTS)
            .find(|&slot| self.schemas[slot].is_some());
        if let Some(slot) = next {
            self.last_schema_sent = Some(slot);
            self.queue_schema(slot);
        }
    }

    fn queue_schema(&mut self, slot: usize) {
        let Some(schema) = self.schemas[slot].as_ref().map(Arc::clone) else {
            return;
        };
        // Schema segments carry the current number but do not consume it.
        match Segment::schema(self.next_seq, slot as u8, schema) {
            Ok(segment) => {
                trace!(schema = slot, bits = segment.size(), "queued schema segment");
                self.stats.queued.record(SegmentKind::Schema, segment.size());
                self.send_buffer.push_back(Arc::new(segment));
            }
            Err(e) => error!(schema = slot, error = %e, "cannot encode schema segment"),
        }
    }

    // === Output ===

    fn new_frame(&self) -> Frame {
        Frame {
            data_stream_index: self.config.data_stream_index,
            resource_identifier: self.config.resource_identifier.clone(),
            ..Frame::default()
        }
    }

    /// Bits available for segments in one frame.
    pub fn max_data_size(&self) -> usize {
        self.config
            .max_frame_length
            .saturating_sub(self.new_frame().header_size())
    }

    /// Pack the front of the send buffer into one frame.
    ///
    /// Returns `None` when the buffer is empty and an empty buffer means end
    /// of transmission. Otherwise an idle poll queues the next schema, or
    /// yields an empty frame when no schema is registered.
    pub fn poll_buffer(&mut self) -> Option<Frame> {
        if self.send_buffer.is_empty() {
            if self.config.empty_buffer_is_eof {
                return None;
            }
            self.broadcast_next_schema();
        }

        let budget = self.max_data_size();
        let mut frame = self.new_frame();
        let mut used = 0;
        while let Some(front) = self.send_buffer.front() {
            let size = front.size();
            if used + size > budget && !frame.is_empty() {
                break;
            }
            let Some(segment) = self.send_buffer.pop_front() else {
                break;
            };
            if size > budget {
                error!(
                    seq = %segment.seq(),
                    size,
                    budget,
                    "segment larger than frame content budget, sending it alone"
                );
                self.stats.oversize_segments += 1;
                frame.push(segment);
                break;
            }
            used += size;
            frame.push(segment);
        }
        debug!(segments = frame.segments.len(), bits = frame.size(), "packed frame");
        Some(frame)
    }

    /// Encode a frame padded to the configured length, or to its own size
    /// when an oversize segment made it longer.
    fn encode_frame(&self, frame: &Frame) -> Option<(BitBuffer, usize)> {
        let length = self.config.max_frame_length.max(frame.size());
        match frame.encode(length) {
            Ok(bits) => {
                let padding = bits.len() - frame.size();
                Some((bits, padding))
            }
            Err(e) => {
                error!(error = %e, "dropping frame that cannot be encoded");
                None
            }
        }
    }

    fn record_frame(&mut self, bits: usize, padding: usize) {
        self.stats.frames_sent += 1;
        self.stats.frame_bits += bits as u64;
        self.stats.padding_bits += padding as u64;
    }

    /// Next frame as bits, or `None` when there is nothing to send.
    pub fn poll_bit_sequence(&mut self) -> Option<BitBuffer> {
        match self.config.mode {
            SendingMode::Stream => {
                let frame = self.poll_buffer()?;
                let (bits, padding) = self.encode_frame(&frame)?;
                self.record_frame(bits.len(), padding);
                Some(bits)
            }
            SendingMode::Lake => self.poll_lake(),
        }
    }

    /// Next frame as base64 text.
    pub fn poll_base64(&mut self) -> Option<String> {
        self.poll_bit_sequence().map(|bits| bits.to_base64())
    }

    fn poll_lake(&mut self) -> Option<BitBuffer> {
        // An empty lake is rendered again, so content added later is sent.
        if self.lake.as_ref().map_or(true, |lake| lake.frames.is_empty()) {
            let lake = self.render_lake();
            self.lake = Some(lake);
        }
        let lake_loop = self.config.lake_loop;
        let lake = self.lake.as_mut()?;
        if lake.frames.is_empty() || lake.cursor >= lake.frames.len() {
            return None;
        }

        let frame = &lake.frames[lake.cursor];
        let (bits, padding) = (frame.bits.clone(), frame.padding);
        lake.cursor += 1;
        if lake_loop {
            lake.cursor %= lake.frames.len();
        }
        self.record_frame(bits.len(), padding);
        Some(bits)
    }

    /// Drain the send buffer into the lake's frames, every registered
    /// schema first.
    ///
    /// Segments queued after the lake has been rendered are not transmitted.
    fn render_lake(&mut self) -> Lake {
        let total_segments = self
            .send_buffer
            .iter()
            .filter(|s| s.kind() != SegmentKind::Schema)
            .map(|s| s.seq().value() as usize + 1)
            .max()
            .unwrap_or(0);
        if total_segments == 0 {
            return Lake {
                frames: Vec::new(),
                cursor: 0,
            };
        }

        let pending = std::mem::take(&mut self.send_buffer);
        for slot in 0..SCHEMA_SLOTS {
            self.queue_schema(slot);
        }
        self.send_buffer.extend(
            pending
                .into_iter()
                .filter(|s| s.kind() != SegmentKind::Schema),
        );

        let mut frames = Vec::new();
        while !self.send_buffer.is_empty() {
            let Some(mut frame) = self.poll_buffer() else {
                break;
            };
            frame.total_segments = total_segments as u16;
            if let Some((bits, padding)) = self.encode_frame(&frame) {
                frames.push(LakeFrame { bits, padding });
            }
        }
        debug!(frames = frames.len(), total_segments, "rendered lake");
        Lake { frames, cursor: 0 }
    }

    // === Introspection ===

    /// Sequence number the next message or blob will get.
    pub fn next_sequence(&self) -> SeqNum {
        self.next_seq
    }

    pub fn send_buffer_len(&self) -> usize {
        self.send_buffer.len()
    }

    /// Total size of the queued segments in bits.
    pub fn send_buffer_bits(&self) -> usize {
        self.send_buffer.iter().map(|s| s.size()).sum()
    }

    pub fn repeat_buffer_len(&self) -> usize {
        self.repeat_buffer.len()
    }

    /// Frames in one pass of the lake, once it has been rendered.
    pub fn lake_frame_count(&self) -> Option<usize> {
        self.lake.as_ref().map(|lake| lake.frames.len())
    }
}

fn slot_index(schema_number: u8) -> Result<usize> {
    let slot = schema_number as usize;
    if slot >= SCHEMA_SLOTS {
        return Err(Error::Config(format!(
            "schema number {schema_number} outside 0..{SCHEMA_SLOTS}"
        )));
    }
    Ok(slot)
}
