//! Frame types for the arena wire protocols.
//!
//! Each transport channel kind carries its own closed set of frames. Opcode
//! tags are explicit constants; decoding matches on them exhaustively and
//! rejects anything unrecognized rather than indexing into declaration order.

use crate::id::UserId;
use bytes::Bytes;

/// Opcode tags for frames on a named channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelOpcode {
    UserJoined = 0x01,
    UserLeft = 0x02,
    Unicast = 0x03,
    Multicast = 0x04,
    Broadcast = 0x05,
}

impl From<ChannelOpcode> for u8 {
    fn from(op: ChannelOpcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for ChannelOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x01 => Ok(ChannelOpcode::UserJoined),
            0x02 => Ok(ChannelOpcode::UserLeft),
            0x03 => Ok(ChannelOpcode::Unicast),
            0x04 => Ok(ChannelOpcode::Multicast),
            0x05 => Ok(ChannelOpcode::Broadcast),
            other => Err(other),
        }
    }
}

/// Opcode tags for frames on the router control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlOpcode {
    UserJoined = 0x01,
    UserLeft = 0x02,
    ReconnectKey = 0x03,
}

impl From<ControlOpcode> for u8 {
    fn from(op: ControlOpcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for ControlOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x01 => Ok(ControlOpcode::UserJoined),
            0x02 => Ok(ControlOpcode::UserLeft),
            0x03 => Ok(ControlOpcode::ReconnectKey),
            other => Err(other),
        }
    }
}

/// Opcode tags for frames on a presence gossip channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GossipOpcode {
    IdKey = 0x01,
    IdDestroyed = 0x02,
    Unicast = 0x03,
    Multicast = 0x04,
    Broadcast = 0x05,
}

impl From<GossipOpcode> for u8 {
    fn from(op: GossipOpcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for GossipOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x01 => Ok(GossipOpcode::IdKey),
            0x02 => Ok(GossipOpcode::IdDestroyed),
            0x03 => Ok(GossipOpcode::Unicast),
            0x04 => Ok(GossipOpcode::Multicast),
            0x05 => Ok(GossipOpcode::Broadcast),
            other => Err(other),
        }
    }
}

/// A frame replicated on a named channel's transport.
///
/// Data frames carry an advisory `reliable` flag. The flag is metadata
/// travelling with the payload, not a transport QoS switch; the transport
/// underneath may or may not distinguish delivery classes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFrame {
    /// A user joined the channel on some node.
    UserJoined { user: UserId },

    /// A user left the channel on some node.
    UserLeft { user: UserId },

    /// Payload addressed to a single recipient.
    Unicast {
        from: UserId,
        to: UserId,
        payload: Bytes,
        reliable: bool,
    },

    /// Payload addressed to an explicit recipient list (at most 255).
    Multicast {
        from: UserId,
        to: Vec<UserId>,
        payload: Bytes,
        reliable: bool,
    },

    /// Payload addressed to every member except the sender.
    Broadcast {
        from: UserId,
        payload: Bytes,
        reliable: bool,
    },
}

impl ChannelFrame {
    /// Get the frame's opcode.
    #[must_use]
    pub fn opcode(&self) -> ChannelOpcode {
        match self {
            ChannelFrame::UserJoined { .. } => ChannelOpcode::UserJoined,
            ChannelFrame::UserLeft { .. } => ChannelOpcode::UserLeft,
            ChannelFrame::Unicast { .. } => ChannelOpcode::Unicast,
            ChannelFrame::Multicast { .. } => ChannelOpcode::Multicast,
            ChannelFrame::Broadcast { .. } => ChannelOpcode::Broadcast,
        }
    }

    /// Create a new Unicast frame.
    #[must_use]
    pub fn unicast(from: UserId, to: UserId, payload: impl Into<Bytes>, reliable: bool) -> Self {
        ChannelFrame::Unicast {
            from,
            to,
            payload: payload.into(),
            reliable,
        }
    }

    /// Create a new Multicast frame.
    #[must_use]
    pub fn multicast(
        from: UserId,
        to: Vec<UserId>,
        payload: impl Into<Bytes>,
        reliable: bool,
    ) -> Self {
        ChannelFrame::Multicast {
            from,
            to,
            payload: payload.into(),
            reliable,
        }
    }

    /// Create a new Broadcast frame.
    #[must_use]
    pub fn broadcast(from: UserId, payload: impl Into<Bytes>, reliable: bool) -> Self {
        ChannelFrame::Broadcast {
            from,
            payload: payload.into(),
            reliable,
        }
    }
}

/// A frame replicated on the router control channel.
///
/// These gossip joins and leaves of the directory itself, plus the rotating
/// reconnect keys so every node can validate a reconnect attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    /// A user registered somewhere in the deployment.
    UserJoined { user: UserId },

    /// A user deregistered somewhere in the deployment.
    UserLeft { user: UserId },

    /// A node issued or renewed a user's reconnect key.
    ReconnectKey { user: UserId, key: Bytes },
}

impl ControlFrame {
    /// Get the frame's opcode.
    #[must_use]
    pub fn opcode(&self) -> ControlOpcode {
        match self {
            ControlFrame::UserJoined { .. } => ControlOpcode::UserJoined,
            ControlFrame::UserLeft { .. } => ControlOpcode::UserLeft,
            ControlFrame::ReconnectKey { .. } => ControlOpcode::ReconnectKey,
        }
    }

    /// Create a new ReconnectKey frame.
    #[must_use]
    pub fn reconnect_key(user: UserId, key: impl Into<Bytes>) -> Self {
        ControlFrame::ReconnectKey {
            user,
            key: key.into(),
        }
    }
}

/// A frame replicated on a presence gossip channel.
///
/// One gossip channel scopes one game; key announcements and data share it.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipFrame {
    /// Register or update a peer-owned `(user, key)` pair.
    IdKey { user: UserId, key: Bytes },

    /// The owning peer is dropping a user.
    IdDestroyed { user: UserId },

    /// Payload addressed to a single recipient.
    Unicast {
        from: UserId,
        to: UserId,
        payload: Bytes,
        reliable: bool,
    },

    /// Payload addressed to an explicit recipient list (at most 255).
    Multicast {
        from: UserId,
        to: Vec<UserId>,
        payload: Bytes,
        reliable: bool,
    },

    /// Payload addressed to everyone tracking the game.
    Broadcast {
        from: UserId,
        payload: Bytes,
        reliable: bool,
    },
}

impl GossipFrame {
    /// Get the frame's opcode.
    #[must_use]
    pub fn opcode(&self) -> GossipOpcode {
        match self {
            GossipFrame::IdKey { .. } => GossipOpcode::IdKey,
            GossipFrame::IdDestroyed { .. } => GossipOpcode::IdDestroyed,
            GossipFrame::Unicast { .. } => GossipOpcode::Unicast,
            GossipFrame::Multicast { .. } => GossipOpcode::Multicast,
            GossipFrame::Broadcast { .. } => GossipOpcode::Broadcast,
        }
    }

    /// Create a new IdKey frame.
    #[must_use]
    pub fn id_key(user: UserId, key: impl Into<Bytes>) -> Self {
        GossipFrame::IdKey {
            user,
            key: key.into(),
        }
    }

    /// Create a new Broadcast frame.
    #[must_use]
    pub fn broadcast(from: UserId, payload: impl Into<Bytes>, reliable: bool) -> Self {
        GossipFrame::Broadcast {
            from,
            payload: payload.into(),
            reliable,
        }
    }
}
