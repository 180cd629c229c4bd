//! # arena-protocol
//!
//! Wire protocol definitions for the arena session-and-channel routing layer.
//!
//! This crate defines the binary frames replicated between server nodes,
//! grouped into three families, one per transport channel kind:
//!
//! - [`ChannelFrame`] - membership and data events on a named channel
//! - [`ControlFrame`] - directory replication on the router control channel
//! - [`GossipFrame`] - presence keys and data on a gossip game channel
//!
//! ## Framing
//!
//! Every frame starts with a one-byte opcode tag. Multi-byte integers are
//! big-endian. User ids and reconnect keys are length-prefixed byte strings;
//! the message payload, when present, is simply the remainder of the frame.
//!
//! ## Example
//!
//! ```rust
//! use arena_protocol::{codec, ChannelFrame, UserId};
//!
//! let frame = ChannelFrame::broadcast(UserId::random(), b"hello".as_ref(), true);
//! let encoded = codec::encode_channel(&frame).unwrap();
//! let decoded = codec::decode_channel(encoded).unwrap();
//! ```

pub mod codec;
pub mod frames;
pub mod id;

pub use codec::ProtocolError;
pub use frames::{ChannelFrame, ControlFrame, GossipFrame};
pub use id::{ChannelId, UserId, USER_ID_LEN};
