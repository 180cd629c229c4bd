//! Shared scaffolding for the crate's tests.

use crate::session::{Session, SessionError};
use crate::validator::Validator;
use arena_protocol::{ChannelId, UserId};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything a [`MockSession`] can observe, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    JoinedChannel(ChannelId, String),
    LeftChannel(ChannelId),
    Message {
        channel: ChannelId,
        from: UserId,
        payload: Vec<u8>,
        reliable: bool,
    },
    UserJoinedChannel(ChannelId, UserId),
    UserLeftChannel(ChannelId, UserId),
    UserJoinedSystem(UserId),
    UserLeftSystem(UserId),
    ValidationRequested(Vec<u8>),
    Validated(UserId),
    Invalidated(String),
    ReconnectKey(Vec<u8>, Duration),
    Disconnected,
}

/// Session double that records every callback.
#[derive(Default)]
pub struct MockSession {
    events: Mutex<Vec<SessionEvent>>,
    fail_deliveries: AtomicBool,
}

impl MockSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every fallible callback return an error from now on.
    pub fn fail_deliveries(&self) {
        self.fail_deliveries.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().expect("event lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event lock poisoned").clear();
    }

    pub fn last_validated(&self) -> Option<UserId> {
        self.events().into_iter().rev().find_map(|e| match e {
            SessionEvent::Validated(user) => Some(user),
            _ => None,
        })
    }

    pub fn last_reconnect_key(&self) -> Option<Vec<u8>> {
        self.events().into_iter().rev().find_map(|e| match e {
            SessionEvent::ReconnectKey(key, _) => Some(key),
            _ => None,
        })
    }

    pub fn messages(&self) -> Vec<(UserId, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Message { from, payload, .. } => Some((from, payload)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.events.lock().expect("event lock poisoned").push(event);
        if self.fail_deliveries.load(Ordering::SeqCst) {
            Err(SessionError::Disconnected)
        } else {
            Ok(())
        }
    }
}

impl Session for MockSession {
    fn joined_channel(&self, channel: ChannelId, name: &str) -> Result<(), SessionError> {
        self.record(SessionEvent::JoinedChannel(channel, name.to_string()))
    }

    fn left_channel(&self, channel: ChannelId) -> Result<(), SessionError> {
        self.record(SessionEvent::LeftChannel(channel))
    }

    fn message_received(
        &self,
        channel: ChannelId,
        from: UserId,
        payload: &Bytes,
        reliable: bool,
    ) -> Result<(), SessionError> {
        self.record(SessionEvent::Message {
            channel,
            from,
            payload: payload.to_vec(),
            reliable,
        })
    }

    fn user_joined_channel(&self, channel: ChannelId, user: UserId) -> Result<(), SessionError> {
        self.record(SessionEvent::UserJoinedChannel(channel, user))
    }

    fn user_left_channel(&self, channel: ChannelId, user: UserId) -> Result<(), SessionError> {
        self.record(SessionEvent::UserLeftChannel(channel, user))
    }

    fn user_joined_system(&self, user: UserId) -> Result<(), SessionError> {
        self.record(SessionEvent::UserJoinedSystem(user))
    }

    fn user_left_system(&self, user: UserId) -> Result<(), SessionError> {
        self.record(SessionEvent::UserLeftSystem(user))
    }

    fn validation_requested(&self, challenge: &Bytes) -> Result<(), SessionError> {
        self.record(SessionEvent::ValidationRequested(challenge.to_vec()))
    }

    fn validated(&self, user: UserId) -> Result<(), SessionError> {
        self.record(SessionEvent::Validated(user))
    }

    fn invalidated(&self, reason: &str) {
        let _ = self.record(SessionEvent::Invalidated(reason.to_string()));
    }

    fn reconnect_key(&self, key: &Bytes, ttl: Duration) -> Result<(), SessionError> {
        self.record(SessionEvent::ReconnectKey(key.to_vec(), ttl))
    }

    fn disconnected(&self) {
        let _ = self.record(SessionEvent::Disconnected);
    }
}

/// One-challenge password validator for registration tests.
pub struct PasswordValidator {
    password: &'static [u8],
    challenged: bool,
    response: Option<Bytes>,
}

impl PasswordValidator {
    pub fn new(password: &'static [u8]) -> Box<Self> {
        Box::new(Self {
            password,
            challenged: false,
            response: None,
        })
    }
}

impl Validator for PasswordValidator {
    fn authenticated(&self) -> bool {
        self.response
            .as_ref()
            .is_some_and(|r| r[..] == *self.password)
    }

    fn next_challenge(&mut self) -> Option<Bytes> {
        if self.challenged {
            None
        } else {
            self.challenged = true;
            Some(Bytes::from_static(b"password?"))
        }
    }

    fn submit_response(&mut self, response: Bytes) {
        self.response = Some(response);
    }
}
