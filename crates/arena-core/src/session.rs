//! Session seam between the routing core and connected user endpoints.
//!
//! A [`Session`] is whatever the connection layer hands us for one connected
//! user: a bundle of callbacks the router and channels invoke to push events
//! toward the client. The router never sees sockets or wire encodings on
//! that side, only this trait.

use arena_protocol::{ChannelId, UserId};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors a session implementation can raise while delivering an event.
///
/// Delivery failures are best-effort territory: the routing layer logs them
/// and moves on to the next recipient, it never aborts a fan-out.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The underlying connection is gone.
    #[error("Session disconnected")]
    Disconnected,

    /// The event could not be delivered.
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// A connected user endpoint, as consumed by the routing core.
pub trait Session: Send + Sync {
    /// This session was joined to a channel.
    fn joined_channel(&self, channel: ChannelId, name: &str) -> Result<(), SessionError>;

    /// This session left (or was removed from) a channel.
    fn left_channel(&self, channel: ChannelId) -> Result<(), SessionError>;

    /// A payload addressed to this session arrived on a channel.
    fn message_received(
        &self,
        channel: ChannelId,
        from: UserId,
        payload: &Bytes,
        reliable: bool,
    ) -> Result<(), SessionError>;

    /// Another user joined a channel this session is on.
    fn user_joined_channel(&self, channel: ChannelId, user: UserId) -> Result<(), SessionError>;

    /// Another user left a channel this session is on.
    fn user_left_channel(&self, channel: ChannelId, user: UserId) -> Result<(), SessionError>;

    /// A user registered anywhere in the deployment.
    fn user_joined_system(&self, user: UserId) -> Result<(), SessionError>;

    /// A user deregistered anywhere in the deployment.
    fn user_left_system(&self, user: UserId) -> Result<(), SessionError>;

    /// The validator wants an answer to this challenge.
    fn validation_requested(&self, challenge: &Bytes) -> Result<(), SessionError>;

    /// Registration completed; the session now speaks as `user`.
    fn validated(&self, user: UserId) -> Result<(), SessionError>;

    /// Registration failed; terminal for this attempt.
    fn invalidated(&self, reason: &str);

    /// A fresh reconnect key was issued for this session's user.
    ///
    /// The client should retain it; presenting it within `ttl` (or one key
    /// rotation past that) lets it reconnect without re-validating.
    fn reconnect_key(&self, key: &Bytes, ttl: Duration) -> Result<(), SessionError>;

    /// The router dropped this session from the directory.
    fn disconnected(&self);
}

/// Association between a [`UserId`] and a live [`Session`].
///
/// Handles are minted by the router when registration completes; the router
/// keeps at most one per user id per node. Identity lives here, not on the
/// session itself, because the router assigns it (fresh, validator-chosen,
/// or recovered during reconnect).
#[derive(Clone)]
pub struct SessionHandle {
    id: UserId,
    session: Arc<dyn Session>,
}

impl SessionHandle {
    pub(crate) fn new(id: UserId, session: Arc<dyn Session>) -> Self {
        Self { id, session }
    }

    /// The user id this handle speaks for.
    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    /// The session callbacks.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

/// Log a failed best-effort delivery without propagating it; a dead
/// session must not break notification fan-out to its peers.
pub(crate) fn log_delivery(user: UserId, event: &str, result: Result<(), SessionError>) {
    if let Err(e) = result {
        tracing::warn!(user = %user, event, error = %e, "Session delivery failed");
    }
}

/// A [`Session`] that ignores every callback.
///
/// Useful for server-driven presences (bots, observers) that occupy a seat
/// in the directory but consume nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSession;

impl Session for NullSession {
    fn joined_channel(&self, _: ChannelId, _: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn left_channel(&self, _: ChannelId) -> Result<(), SessionError> {
        Ok(())
    }

    fn message_received(
        &self,
        _: ChannelId,
        _: UserId,
        _: &Bytes,
        _: bool,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    fn user_joined_channel(&self, _: ChannelId, _: UserId) -> Result<(), SessionError> {
        Ok(())
    }

    fn user_left_channel(&self, _: ChannelId, _: UserId) -> Result<(), SessionError> {
        Ok(())
    }

    fn user_joined_system(&self, _: UserId) -> Result<(), SessionError> {
        Ok(())
    }

    fn user_left_system(&self, _: UserId) -> Result<(), SessionError> {
        Ok(())
    }

    fn validation_requested(&self, _: &Bytes) -> Result<(), SessionError> {
        Ok(())
    }

    fn validated(&self, _: UserId) -> Result<(), SessionError> {
        Ok(())
    }

    fn invalidated(&self, _: &str) {}

    fn reconnect_key(&self, _: &Bytes, _: Duration) -> Result<(), SessionError> {
        Ok(())
    }

    fn disconnected(&self) {}
}
