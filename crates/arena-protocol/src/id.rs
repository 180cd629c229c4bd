//! Identifier types carried by the wire protocols.

use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Size in bytes of a user identifier.
pub const USER_ID_LEN: usize = 16;

/// Opaque, globally unique identifier for a connected user.
///
/// Ids are minted by the node a user registers on and replicated to peers;
/// on the wire they travel as length-prefixed byte strings.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId([u8; USER_ID_LEN]);

impl UserId {
    /// Create a user id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; USER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a user id from a byte slice, if it has the right length.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; USER_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Mint a fresh random user id.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Mint a fresh user id from a caller-owned generator.
    #[must_use]
    pub fn from_rng(rng: &mut impl Rng) -> Self {
        let mut bytes = [0u8; USER_ID_LEN];
        rng.fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Get the raw id bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; USER_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({self})")
    }
}

/// Process-local counter backing [`ChannelId::next`].
static CHANNEL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier for an open channel, unique within one node.
///
/// Channel ids never cross the wire; channels are identified across nodes
/// by their transport channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Create a channel id from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate the next process-local channel id.
    #[must_use]
    pub fn next() -> Self {
        Self(CHANNEL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_uniqueness() {
        let a = UserId::random();
        let b = UserId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_id_from_slice() {
        let id = UserId::random();
        let parsed = UserId::from_slice(id.as_bytes()).unwrap();
        assert_eq!(id, parsed);

        assert!(UserId::from_slice(&[0u8; 3]).is_none());
    }

    #[test]
    fn test_channel_id_allocation() {
        let a = ChannelId::next();
        let b = ChannelId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_id_display_is_hex() {
        let id = UserId::from_bytes([0xab; USER_ID_LEN]);
        assert_eq!(id.to_string(), "ab".repeat(USER_ID_LEN));
    }
}
