//! Byte codec for the arena wire frames.
//!
//! Encoding builds a fresh buffer per call; nothing here shares mutable
//! framing state between senders. Decoding consumes an owned [`Bytes`] so
//! payloads come out as zero-copy slices of the inbound datagram.

use crate::frames::{
    ChannelFrame, ChannelOpcode, ControlFrame, ControlOpcode, GossipFrame, GossipOpcode,
};
use crate::id::{UserId, USER_ID_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum length of a reconnect key on the wire.
pub const MAX_KEY_LEN: usize = 64;

/// Maximum number of multicast recipients per frame.
///
/// Larger fan-out must be expressed as a broadcast; the recipient count
/// travels as a single byte.
pub const MAX_MULTICAST_TARGETS: usize = 255;

/// Protocol errors raised while encoding or decoding frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Opcode tag not part of the frame family being decoded.
    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Frame ended before a required field.
    #[error("Truncated frame")]
    Truncated,

    /// A user id field did not have the expected length.
    #[error("Invalid user id length: {0}")]
    InvalidIdLength(usize),

    /// A key field exceeded [`MAX_KEY_LEN`].
    #[error("Key length {0} exceeds maximum {MAX_KEY_LEN}")]
    KeyTooLong(usize),

    /// A multicast frame addressed more than [`MAX_MULTICAST_TARGETS`].
    #[error("Multicast recipient count {0} exceeds maximum {MAX_MULTICAST_TARGETS}")]
    TooManyRecipients(usize),
}

// -- field helpers ---------------------------------------------------------

fn put_user_id(buf: &mut BytesMut, id: UserId) {
    buf.put_u16(USER_ID_LEN as u16);
    buf.put_slice(id.as_bytes());
}

fn put_key(buf: &mut BytesMut, key: &Bytes) {
    buf.put_u16(key.len() as u16);
    buf.put_slice(key);
}

fn get_u8(buf: &mut Bytes) -> Result<u8, ProtocolError> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes) -> Result<u16, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u16())
}

fn get_user_id(buf: &mut Bytes) -> Result<UserId, ProtocolError> {
    let len = get_u16(buf)? as usize;
    if len != USER_ID_LEN {
        return Err(ProtocolError::InvalidIdLength(len));
    }
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    let raw = buf.split_to(len);
    UserId::from_slice(&raw).ok_or(ProtocolError::InvalidIdLength(len))
}

fn get_key(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = get_u16(buf)? as usize;
    if len > MAX_KEY_LEN {
        return Err(ProtocolError::KeyTooLong(len));
    }
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.split_to(len))
}

fn get_reliable(buf: &mut Bytes) -> Result<bool, ProtocolError> {
    Ok(get_u8(buf)? != 0)
}

fn data_capacity(payload: &Bytes, ids: usize) -> usize {
    // opcode + reliable flag + length-prefixed ids + payload
    2 + ids * (2 + USER_ID_LEN) + payload.len()
}

// -- channel frames --------------------------------------------------------

/// Encode a channel frame.
///
/// # Errors
///
/// Returns an error if a multicast frame addresses too many recipients.
pub fn encode_channel(frame: &ChannelFrame) -> Result<Bytes, ProtocolError> {
    let mut buf;
    match frame {
        ChannelFrame::UserJoined { user } => {
            buf = BytesMut::with_capacity(3 + USER_ID_LEN);
            buf.put_u8(ChannelOpcode::UserJoined.into());
            put_user_id(&mut buf, *user);
        }
        ChannelFrame::UserLeft { user } => {
            buf = BytesMut::with_capacity(3 + USER_ID_LEN);
            buf.put_u8(ChannelOpcode::UserLeft.into());
            put_user_id(&mut buf, *user);
        }
        ChannelFrame::Unicast {
            from,
            to,
            payload,
            reliable,
        } => {
            buf = BytesMut::with_capacity(data_capacity(payload, 2));
            buf.put_u8(ChannelOpcode::Unicast.into());
            buf.put_u8(u8::from(*reliable));
            put_user_id(&mut buf, *from);
            put_user_id(&mut buf, *to);
            buf.put_slice(payload);
        }
        ChannelFrame::Multicast {
            from,
            to,
            payload,
            reliable,
        } => {
            if to.len() > MAX_MULTICAST_TARGETS {
                return Err(ProtocolError::TooManyRecipients(to.len()));
            }
            buf = BytesMut::with_capacity(1 + data_capacity(payload, 1 + to.len()));
            buf.put_u8(ChannelOpcode::Multicast.into());
            buf.put_u8(u8::from(*reliable));
            put_user_id(&mut buf, *from);
            buf.put_u8(to.len() as u8);
            for target in to {
                put_user_id(&mut buf, *target);
            }
            buf.put_slice(payload);
        }
        ChannelFrame::Broadcast {
            from,
            payload,
            reliable,
        } => {
            buf = BytesMut::with_capacity(data_capacity(payload, 1));
            buf.put_u8(ChannelOpcode::Broadcast.into());
            buf.put_u8(u8::from(*reliable));
            put_user_id(&mut buf, *from);
            buf.put_slice(payload);
        }
    }
    Ok(buf.freeze())
}

/// Decode a channel frame from one inbound datagram.
///
/// # Errors
///
/// Returns an error on an unknown opcode or malformed fields; the caller is
/// expected to log and drop the frame, never to crash the dispatch loop.
pub fn decode_channel(mut buf: Bytes) -> Result<ChannelFrame, ProtocolError> {
    let opcode =
        ChannelOpcode::try_from(get_u8(&mut buf)?).map_err(ProtocolError::UnknownOpcode)?;
    match opcode {
        ChannelOpcode::UserJoined => Ok(ChannelFrame::UserJoined {
            user: get_user_id(&mut buf)?,
        }),
        ChannelOpcode::UserLeft => Ok(ChannelFrame::UserLeft {
            user: get_user_id(&mut buf)?,
        }),
        ChannelOpcode::Unicast => {
            let reliable = get_reliable(&mut buf)?;
            let from = get_user_id(&mut buf)?;
            let to = get_user_id(&mut buf)?;
            Ok(ChannelFrame::Unicast {
                from,
                to,
                payload: buf,
                reliable,
            })
        }
        ChannelOpcode::Multicast => {
            let reliable = get_reliable(&mut buf)?;
            let from = get_user_id(&mut buf)?;
            let count = get_u8(&mut buf)? as usize;
            let mut to = Vec::with_capacity(count);
            for _ in 0..count {
                to.push(get_user_id(&mut buf)?);
            }
            Ok(ChannelFrame::Multicast {
                from,
                to,
                payload: buf,
                reliable,
            })
        }
        ChannelOpcode::Broadcast => {
            let reliable = get_reliable(&mut buf)?;
            let from = get_user_id(&mut buf)?;
            Ok(ChannelFrame::Broadcast {
                from,
                payload: buf,
                reliable,
            })
        }
    }
}

// -- control frames --------------------------------------------------------

/// Encode a control frame.
///
/// # Errors
///
/// Returns an error if a reconnect key exceeds [`MAX_KEY_LEN`].
pub fn encode_control(frame: &ControlFrame) -> Result<Bytes, ProtocolError> {
    let mut buf;
    match frame {
        ControlFrame::UserJoined { user } => {
            buf = BytesMut::with_capacity(3 + USER_ID_LEN);
            buf.put_u8(ControlOpcode::UserJoined.into());
            put_user_id(&mut buf, *user);
        }
        ControlFrame::UserLeft { user } => {
            buf = BytesMut::with_capacity(3 + USER_ID_LEN);
            buf.put_u8(ControlOpcode::UserLeft.into());
            put_user_id(&mut buf, *user);
        }
        ControlFrame::ReconnectKey { user, key } => {
            if key.len() > MAX_KEY_LEN {
                return Err(ProtocolError::KeyTooLong(key.len()));
            }
            buf = BytesMut::with_capacity(5 + USER_ID_LEN + key.len());
            buf.put_u8(ControlOpcode::ReconnectKey.into());
            put_user_id(&mut buf, *user);
            put_key(&mut buf, key);
        }
    }
    Ok(buf.freeze())
}

/// Decode a control frame from one inbound datagram.
///
/// # Errors
///
/// Returns an error on an unknown opcode or malformed fields.
pub fn decode_control(mut buf: Bytes) -> Result<ControlFrame, ProtocolError> {
    let opcode =
        ControlOpcode::try_from(get_u8(&mut buf)?).map_err(ProtocolError::UnknownOpcode)?;
    match opcode {
        ControlOpcode::UserJoined => Ok(ControlFrame::UserJoined {
            user: get_user_id(&mut buf)?,
        }),
        ControlOpcode::UserLeft => Ok(ControlFrame::UserLeft {
            user: get_user_id(&mut buf)?,
        }),
        ControlOpcode::ReconnectKey => {
            let user = get_user_id(&mut buf)?;
            let key = get_key(&mut buf)?;
            Ok(ControlFrame::ReconnectKey { user, key })
        }
    }
}

// -- gossip frames ---------------------------------------------------------

/// Encode a gossip frame.
///
/// # Errors
///
/// Returns an error if a key is too long or a multicast addresses too many
/// recipients.
pub fn encode_gossip(frame: &GossipFrame) -> Result<Bytes, ProtocolError> {
    let mut buf;
    match frame {
        GossipFrame::IdKey { user, key } => {
            if key.len() > MAX_KEY_LEN {
                return Err(ProtocolError::KeyTooLong(key.len()));
            }
            buf = BytesMut::with_capacity(5 + USER_ID_LEN + key.len());
            buf.put_u8(GossipOpcode::IdKey.into());
            put_user_id(&mut buf, *user);
            put_key(&mut buf, key);
        }
        GossipFrame::IdDestroyed { user } => {
            buf = BytesMut::with_capacity(3 + USER_ID_LEN);
            buf.put_u8(GossipOpcode::IdDestroyed.into());
            put_user_id(&mut buf, *user);
        }
        GossipFrame::Unicast {
            from,
            to,
            payload,
            reliable,
        } => {
            buf = BytesMut::with_capacity(data_capacity(payload, 2));
            buf.put_u8(GossipOpcode::Unicast.into());
            buf.put_u8(u8::from(*reliable));
            put_user_id(&mut buf, *from);
            put_user_id(&mut buf, *to);
            buf.put_slice(payload);
        }
        GossipFrame::Multicast {
            from,
            to,
            payload,
            reliable,
        } => {
            if to.len() > MAX_MULTICAST_TARGETS {
                return Err(ProtocolError::TooManyRecipients(to.len()));
            }
            buf = BytesMut::with_capacity(1 + data_capacity(payload, 1 + to.len()));
            buf.put_u8(GossipOpcode::Multicast.into());
            buf.put_u8(u8::from(*reliable));
            put_user_id(&mut buf, *from);
            buf.put_u8(to.len() as u8);
            for target in to {
                put_user_id(&mut buf, *target);
            }
            buf.put_slice(payload);
        }
        GossipFrame::Broadcast {
            from,
            payload,
            reliable,
        } => {
            buf = BytesMut::with_capacity(data_capacity(payload, 1));
            buf.put_u8(GossipOpcode::Broadcast.into());
            buf.put_u8(u8::from(*reliable));
            put_user_id(&mut buf, *from);
            buf.put_slice(payload);
        }
    }
    Ok(buf.freeze())
}

/// Decode a gossip frame from one inbound datagram.
///
/// # Errors
///
/// Returns an error on an unknown opcode or malformed fields.
pub fn decode_gossip(mut buf: Bytes) -> Result<GossipFrame, ProtocolError> {
    let opcode = GossipOpcode::try_from(get_u8(&mut buf)?).map_err(ProtocolError::UnknownOpcode)?;
    match opcode {
        GossipOpcode::IdKey => {
            let user = get_user_id(&mut buf)?;
            let key = get_key(&mut buf)?;
            Ok(GossipFrame::IdKey { user, key })
        }
        GossipOpcode::IdDestroyed => Ok(GossipFrame::IdDestroyed {
            user: get_user_id(&mut buf)?,
        }),
        GossipOpcode::Unicast => {
            let reliable = get_reliable(&mut buf)?;
            let from = get_user_id(&mut buf)?;
            let to = get_user_id(&mut buf)?;
            Ok(GossipFrame::Unicast {
                from,
                to,
                payload: buf,
                reliable,
            })
        }
        GossipOpcode::Multicast => {
            let reliable = get_reliable(&mut buf)?;
            let from = get_user_id(&mut buf)?;
            let count = get_u8(&mut buf)? as usize;
            let mut to = Vec::with_capacity(count);
            for _ in 0..count {
                to.push(get_user_id(&mut buf)?);
            }
            Ok(GossipFrame::Multicast {
                from,
                to,
                payload: buf,
                reliable,
            })
        }
        GossipOpcode::Broadcast => {
            let reliable = get_reliable(&mut buf)?;
            let from = get_user_id(&mut buf)?;
            Ok(GossipFrame::Broadcast {
                from,
                payload: buf,
                reliable,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_data_roundtrip() {
        let from = UserId::random();
        let to = UserId::random();

        let frame = ChannelFrame::unicast(from, to, b"payload".as_ref(), true);
        let decoded = decode_channel(encode_channel(&frame).unwrap()).unwrap();
        assert_eq!(frame, decoded);

        let frame = ChannelFrame::multicast(from, vec![to, from], b"m".as_ref(), false);
        let decoded = decode_channel(encode_channel(&frame).unwrap()).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_membership_roundtrip() {
        let user = UserId::random();
        let frame = ChannelFrame::UserJoined { user };
        let decoded = decode_channel(encode_channel(&frame).unwrap()).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_control_key_roundtrip() {
        let frame = ControlFrame::reconnect_key(UserId::random(), vec![7u8; 16]);
        let decoded = decode_control(encode_control(&frame).unwrap()).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_gossip_roundtrip() {
        let user = UserId::random();
        let frame = GossipFrame::id_key(user, vec![1u8; 16]);
        let decoded = decode_gossip(encode_gossip(&frame).unwrap()).unwrap();
        assert_eq!(frame, decoded);

        let frame = GossipFrame::IdDestroyed { user };
        let decoded = decode_gossip(encode_gossip(&frame).unwrap()).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_unknown_opcode() {
        let buf = Bytes::from_static(&[0xff, 0x00]);
        assert_eq!(
            decode_channel(buf.clone()),
            Err(ProtocolError::UnknownOpcode(0xff))
        );
        assert_eq!(decode_control(buf), Err(ProtocolError::UnknownOpcode(0xff)));
    }

    #[test]
    fn test_truncated_frame() {
        let frame = ChannelFrame::unicast(UserId::random(), UserId::random(), b"x".as_ref(), true);
        let encoded = encode_channel(&frame).unwrap();

        // Cutting inside the recipient id must fail cleanly, not panic.
        let cut = encoded.slice(..USER_ID_LEN);
        assert!(matches!(
            decode_channel(cut),
            Err(ProtocolError::Truncated) | Err(ProtocolError::InvalidIdLength(_))
        ));

        assert_eq!(decode_channel(Bytes::new()), Err(ProtocolError::Truncated));
    }

    #[test]
    fn test_multicast_cap() {
        let from = UserId::random();
        let to: Vec<UserId> = (0..256).map(|_| UserId::random()).collect();
        let frame = ChannelFrame::multicast(from, to, b"p".as_ref(), true);
        assert_eq!(
            encode_channel(&frame),
            Err(ProtocolError::TooManyRecipients(256))
        );
    }

    #[test]
    fn test_key_length_cap() {
        let frame = ControlFrame::reconnect_key(UserId::random(), vec![0u8; MAX_KEY_LEN + 1]);
        assert_eq!(
            encode_control(&frame),
            Err(ProtocolError::KeyTooLong(MAX_KEY_LEN + 1))
        );
    }

    #[test]
    fn test_payload_is_frame_remainder() {
        let from = UserId::random();
        let frame = ChannelFrame::broadcast(from, b"tail bytes".as_ref(), false);
        let encoded = encode_channel(&frame).unwrap();
        match decode_channel(encoded).unwrap() {
            ChannelFrame::Broadcast {
                payload, reliable, ..
            } => {
                assert_eq!(&payload[..], b"tail bytes");
                assert!(!reliable);
            }
            other => panic!("Expected broadcast, got {other:?}"),
        }
    }
}
