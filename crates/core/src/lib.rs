//! framecast-core: a self-describing binary message protocol for one-way lossy links
//!
//! Structured messages are encoded against explicit, transmittable schemas,
//! optionally as deltas against an earlier message, packed into fixed-size
//! frames, and reassembled on the far side without any back-channel.
//!
//! # Architecture
//!
//! - `bitio`: bit buffer with MSB-first packing and base64 transport
//! - `seq`: wrapping 12-bit sequence numbers
//! - `smallscii`: the 6-bit text alphabet
//! - `schema`: schema-typed values, their bit codec, diff/patch and text grammars
//! - `segment`: numbered units of transmission
//! - `frame`: the physical transmission unit
//! - `sender`: delta selection, repetition and frame packing
//! - `receiver`: ordered emission with a sliding loss window
//! - `network`: seeded channel simulator (loss, duplication, reordering)
//! - `stats`: sender and receiver counters
//!
//! # Example
//!
//! ```
//! use framecast_core::{Receiver, Sender};
//!
//! let mut sender = Sender::default();
//! sender
//!     .set_schema_text(0, r#"FixedMap { "name": Smallscii, "value": Integer(8) }"#)
//!     .unwrap();
//! sender.add_message_text(0, r#"{ "name": "abc", "value": 10 }"#, false).unwrap();
//!
//! let mut receiver = Receiver::default();
//! while let Some(bits) = sender.poll_bit_sequence() {
//!     receiver.put_bit_sequence(bits);
//! }
//! let message = receiver.poll_message().unwrap();
//! assert_eq!(message.to_string(), r#"{"name": "abc", "value": 10}"#);
//! ```
//!
//! # Design Principles
//!
//! - **No panics**: codec errors are structured; the receiver absorbs them
//! - **Synchronous**: no background work, every call returns immediately
//! - **Deterministic**: the simulator is driven by a seeded RNG

pub mod bitio;
pub mod error;
pub mod frame;
pub mod network;
pub mod receiver;
pub mod schema;
pub mod segment;
pub mod sender;
pub mod seq;
pub mod smallscii;
pub mod stats;

pub use bitio::BitBuffer;
pub use error::{Error, Result};
pub use frame::Frame;
pub use receiver::{Receiver, ReceiverConfig};
pub use schema::SchemaElement;
pub use segment::Segment;
pub use sender::{Sender, SenderConfig, SendingMode};
pub use seq::SeqNum;
