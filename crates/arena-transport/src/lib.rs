//! # arena-transport
//!
//! Inter-node transport abstraction for the arena routing layer.
//!
//! A transport channel is a named, reliable (or best-effort) broadcast
//! primitive shared by the server nodes of one deployment: open it by name,
//! push raw buffers at it, and every *other* node that opened the same name
//! has the buffer handed to its listeners. The routing core carries its own
//! reliability flag inside each frame, so both delivery classes go through
//! the same interface.
//!
//! ```rust
//! use arena_transport::{LoopbackHub, TransportChannel, TransportHub};
//!
//! let hub = LoopbackHub::new();
//! let chan = hub.open_channel("lobby").unwrap();
//! chan.send(bytes::Bytes::from_static(b"frame")).unwrap();
//! ```

pub mod loopback;
pub mod traits;

pub use loopback::LoopbackHub;
pub use traits::{TransportChannel, TransportChannelListener, TransportError, TransportHub};
