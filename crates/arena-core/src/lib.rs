//! Session and channel routing for a multiplayer game server node.
//!
//! The crate has three moving parts:
//!
//! - [`ChannelRouter`]: the per-node session directory. It validates and
//!   registers sessions, hands out rotating reconnect keys, and replicates
//!   joins and leaves to peer nodes over a control channel.
//! - [`Channel`]: a named pub/sub channel. Each node keeps a local member
//!   table and a transport endpoint; unicast, multicast, and broadcast all
//!   combine a transport send with local delivery, since the transport
//!   never echoes a frame to its sender.
//! - [`PresenceGossip`]: a flat presence directory keyed by per-user id
//!   keys, gossiped over one shared channel, with two-generation key
//!   expiry so stale clients can still re-attach.
//!
//! ```no_run
//! use std::sync::Arc;
//! use arena_core::{ChannelRouter, NullSession, Registration, RouterConfig};
//! use arena_transport::LoopbackHub;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = Arc::new(LoopbackHub::new());
//! let router = ChannelRouter::new(hub, RouterConfig::default())?;
//! let session = Arc::new(NullSession);
//! let Registration::Complete(handle) = router.register_session(session)? else {
//!     unreachable!("no validators configured");
//! };
//! let lobby = router.open_channel("lobby")?;
//! lobby.join(&handle);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod gossip;
pub mod router;
pub mod session;
pub mod validator;

#[cfg(test)]
pub(crate) mod testutil;

pub use channel::Channel;
pub use gossip::{GossipConfig, GossipError, GossipListener, PresenceGossip};
pub use router::{
    ChannelRouter, PendingId, Registration, RouterConfig, RouterError, RouterListener, RouterStats,
};
pub use session::{NullSession, Session, SessionError, SessionHandle};
pub use validator::{Validator, ValidatorFactory};
