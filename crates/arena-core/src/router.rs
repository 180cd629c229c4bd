//! Session directory and channel lookup for one server node.
//!
//! The router accepts session registrations, runs them through validation,
//! keeps the live UserId -> Session directory, and creates channels on
//! demand. Directory joins and leaves are replicated to peer nodes over a
//! dedicated control channel, together with the rotating reconnect keys
//! that let a client re-attach without re-validating.

use crate::channel::Channel;
use crate::session::{log_delivery, Session, SessionHandle};
use crate::validator::{Validator, ValidatorFactory};
use arena_protocol::{codec, ChannelId, ControlFrame, ProtocolError, UserId};
use arena_transport::{TransportChannel, TransportChannelListener, TransportError, TransportHub};
use bytes::Bytes;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Length in bytes of a generated reconnect key.
const KEY_LEN: usize = 16;

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The inter-node transport failed us.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No registration attempt with this pending id.
    #[error("Unknown pending registration: {0}")]
    UnknownPending(u64),

    /// The validator rejected the registration attempt.
    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    /// The presented reconnect key matched neither the current nor the
    /// previous key.
    #[error("Reconnect key rejected")]
    ReconnectRejected,

    /// No channel with this id.
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// The channel is locked; membership changes must go through the router.
    #[error("Channel is locked: {0}")]
    ChannelLocked(ChannelId),

    /// No such user in the directory.
    #[error("User not registered: {0}")]
    UnknownUser(UserId),

    /// The router has shut down.
    #[error("Router is shut down")]
    ShutDown,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Name of the transport channel replicating the directory.
    pub control_channel: String,
    /// Reconnect key lifetime; keys rotate once per lifetime.
    pub key_ttl: Duration,
    /// Whether a channel closes when its last local member leaves.
    pub auto_close_empty_channels: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            control_channel: "__ROUTER_CONTROL".to_string(),
            key_ttl: Duration::from_secs(120),
            auto_close_empty_channels: true,
        }
    }
}

/// Hook invoked on unrecoverable faults (the control channel closing).
///
/// The default logs and terminates the process: the directory cannot be
/// trusted once its replication channel is gone.
pub type FatalHook = Box<dyn Fn(&str) + Send + Sync>;

fn default_fatal(msg: &str) {
    error!("{msg}");
    std::process::exit(1);
}

/// Identifier for an in-flight validation attempt.
pub type PendingId = u64;

/// Outcome of a registration step.
#[derive(Debug)]
pub enum Registration {
    /// Registration finished; the user is in the directory.
    Complete(SessionHandle),
    /// A challenge was sent to the session; answer it with
    /// [`ChannelRouter::submit_validation`].
    Challenged(PendingId),
}

/// Observer of router-level events, e.g. for metrics or game logic.
///
/// All methods default to no-ops so implementors pick what they care about.
pub trait RouterListener: Send + Sync {
    /// A user registered on this node.
    fn user_joined(&self, user: UserId) {
        let _ = user;
    }

    /// A user deregistered on this node.
    fn user_left(&self, user: UserId) {
        let _ = user;
    }

    /// A local session joined a channel.
    fn user_joined_channel(&self, user: UserId, channel: ChannelId) {
        let _ = (user, channel);
    }

    /// A local session left a channel.
    fn user_left_channel(&self, user: UserId, channel: ChannelId) {
        let _ = (user, channel);
    }

    /// A data payload was submitted to a channel on this node.
    fn channel_data(&self, channel: ChannelId, from: UserId, payload: &Bytes, reliable: bool) {
        let _ = (channel, from, payload, reliable);
    }
}

struct PendingRegistration {
    session: Arc<dyn Session>,
    validator: Box<dyn Validator>,
}

#[derive(Default)]
struct KeyTable {
    current: HashMap<UserId, Bytes>,
    previous: HashMap<UserId, Bytes>,
}

/// The per-node session directory and channel registry.
pub struct ChannelRouter {
    shared: Arc<RouterShared>,
}

pub(crate) struct RouterShared {
    hub: Arc<dyn TransportHub>,
    control: Arc<dyn TransportChannel>,
    users: DashMap<UserId, SessionHandle>,
    channels: DashMap<ChannelId, Arc<Channel>>,
    channels_by_name: DashMap<String, Arc<Channel>>,
    pending: Mutex<HashMap<PendingId, PendingRegistration>>,
    next_pending: AtomicU64,
    keys: Mutex<KeyTable>,
    listeners: RwLock<Vec<Arc<dyn RouterListener>>>,
    validators: Option<Arc<dyn ValidatorFactory>>,
    rng: Mutex<StdRng>,
    config: RouterConfig,
    shutdown: AtomicBool,
    fatal: Mutex<FatalHook>,
}

impl ChannelRouter {
    /// Create a router with no validation: sessions register immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the control channel cannot be opened.
    pub fn new(hub: Arc<dyn TransportHub>, config: RouterConfig) -> Result<Self, RouterError> {
        Self::build(hub, config, None)
    }

    /// Create a router that challenges every registration through the
    /// given validator factory.
    ///
    /// # Errors
    ///
    /// Returns an error if the control channel cannot be opened.
    pub fn with_validators(
        hub: Arc<dyn TransportHub>,
        config: RouterConfig,
        validators: Arc<dyn ValidatorFactory>,
    ) -> Result<Self, RouterError> {
        Self::build(hub, config, Some(validators))
    }

    fn build(
        hub: Arc<dyn TransportHub>,
        config: RouterConfig,
        validators: Option<Arc<dyn ValidatorFactory>>,
    ) -> Result<Self, RouterError> {
        let control = hub.open_channel(&config.control_channel)?;
        let shared = Arc::new(RouterShared {
            hub,
            control: control.clone(),
            users: DashMap::new(),
            channels: DashMap::new(),
            channels_by_name: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            next_pending: AtomicU64::new(0),
            keys: Mutex::new(KeyTable::default()),
            listeners: RwLock::new(Vec::new()),
            validators,
            rng: Mutex::new(StdRng::from_entropy()),
            config,
            shutdown: AtomicBool::new(false),
            fatal: Mutex::new(Box::new(default_fatal)),
        });
        control.add_listener(Arc::new(ControlTap {
            router: Arc::downgrade(&shared),
        }));
        info!(control = %shared.config.control_channel, "Router ready");
        Ok(Self { shared })
    }

    /// Register a new session.
    ///
    /// Without validators the session enters the directory immediately with
    /// a fresh user id. With validators, the first challenge is delivered to
    /// the session and a pending id is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the router is shut down or validation fails
    /// outright.
    pub fn register_session(&self, session: Arc<dyn Session>) -> Result<Registration, RouterError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(RouterError::ShutDown);
        }
        match &self.shared.validators {
            None => {
                let user = self.shared.mint_user_id();
                Ok(Registration::Complete(
                    self.shared.complete_registration(session, user),
                ))
            }
            Some(factory) => {
                let validator = factory.create_validator();
                self.shared.drive_validator(session, validator)
            }
        }
    }

    /// Feed a session's response to its outstanding challenge.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending id is unknown or the validator
    /// rejects the attempt; rejection also invalidates the session.
    pub fn submit_validation(
        &self,
        pending: PendingId,
        response: Bytes,
    ) -> Result<Registration, RouterError> {
        let entry = self
            .shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&pending)
            .ok_or(RouterError::UnknownPending(pending))?;
        let PendingRegistration {
            session,
            mut validator,
        } = entry;
        validator.submit_response(response);
        self.shared.drive_validator(session, validator)
    }

    /// Re-register a session for `user` without full validation.
    ///
    /// Succeeds only if `key` matches the user's current or previous
    /// reconnect key; any older key fails and invalidates the session.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::ReconnectRejected`] on a key mismatch.
    pub fn reregister_session(
        &self,
        session: Arc<dyn Session>,
        user: UserId,
        key: &[u8],
    ) -> Result<SessionHandle, RouterError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(RouterError::ShutDown);
        }
        if self.shared.validate_reconnect_key(user, key) {
            Ok(self.shared.complete_registration(session, user))
        } else {
            session.invalidated("reconnect key failure");
            Err(RouterError::ReconnectRejected)
        }
    }

    /// Remove a user from the directory.
    ///
    /// The session is pulled out of every channel, told it disconnected,
    /// and the departure is replicated to peers and announced to the
    /// remaining local users (best-effort).
    ///
    /// # Errors
    ///
    /// Returns an error if the user is not in the directory.
    pub fn deregister(&self, user: UserId) -> Result<(), RouterError> {
        let (_, handle) = self
            .shared
            .users
            .remove(&user)
            .ok_or(RouterError::UnknownUser(user))?;

        let channels: Vec<Arc<Channel>> =
            self.shared.channels.iter().map(|e| e.value().clone()).collect();
        for channel in channels {
            channel.leave(&handle);
        }

        {
            let mut keys = self.shared.keys.lock().expect("key lock poisoned");
            keys.current.remove(&user);
            keys.previous.remove(&user);
        }

        handle.session().disconnected();
        self.shared.xmit_control(&ControlFrame::UserLeft { user });
        self.shared.fire(|l| l.user_left(user));
        self.shared.report_user_left(user);
        debug!(user = %user, "User deregistered");
        Ok(())
    }

    /// Find or create the channel with this name.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot provide the channel; this is
    /// non-fatal and the caller may retry.
    pub fn open_channel(&self, name: &str) -> Result<Arc<Channel>, RouterError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(RouterError::ShutDown);
        }
        match self.shared.channels_by_name.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Ok(existing.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let transport = self.shared.hub.open_channel(name)?;
                let channel = Channel::open(Arc::downgrade(&self.shared), transport, name);
                self.shared.channels.insert(channel.id(), channel.clone());
                slot.insert(channel.clone());
                debug!(channel = %name, id = %channel.id(), "Opened channel");
                Ok(channel)
            }
        }
    }

    /// Look up a channel by id.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.shared.channels.get(&id).map(|e| e.value().clone())
    }

    /// Look up a channel by name.
    #[must_use]
    pub fn channel_by_name(&self, name: &str) -> Option<Arc<Channel>> {
        self.shared
            .channels_by_name
            .get(name)
            .map(|e| e.value().clone())
    }

    /// Close the local view of a channel, notifying its local members.
    pub fn close_channel(&self, id: ChannelId) {
        if let Some(channel) = self.channel(id) {
            channel.close();
        }
    }

    /// Lock or unlock a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if no such channel exists.
    pub fn lock_channel(&self, id: ChannelId, locked: bool) -> Result<(), RouterError> {
        let channel = self.channel(id).ok_or(RouterError::ChannelNotFound(id))?;
        channel.set_locked(locked);
        Ok(())
    }

    /// Join a registered user to a channel on the router's authority.
    ///
    /// Router-initiated joins bypass the lock flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel or user is unknown.
    pub fn join(&self, user: UserId, channel: ChannelId) -> Result<(), RouterError> {
        let channel = self
            .channel(channel)
            .ok_or(RouterError::ChannelNotFound(channel))?;
        let handle = self.handle_for(user)?;
        channel.join(&handle);
        Ok(())
    }

    /// Remove a user from a channel on the router's authority.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel or user is unknown.
    pub fn leave(&self, user: UserId, channel: ChannelId) -> Result<(), RouterError> {
        let channel = self
            .channel(channel)
            .ok_or(RouterError::ChannelNotFound(channel))?;
        let handle = self.handle_for(user)?;
        channel.leave(&handle);
        Ok(())
    }

    /// Handle a session-originated join request: find-or-create by name,
    /// honoring the lock flag.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::ChannelLocked`] if the channel is locked, or
    /// the usual lookup/transport errors.
    pub fn request_join(&self, user: UserId, name: &str) -> Result<Arc<Channel>, RouterError> {
        let channel = self.open_channel(name)?;
        if channel.is_locked() {
            return Err(RouterError::ChannelLocked(channel.id()));
        }
        let handle = self.handle_for(user)?;
        channel.join(&handle);
        Ok(channel)
    }

    /// Handle a session-originated leave request, honoring the lock flag.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::ChannelLocked`] if the channel is locked, or
    /// the usual lookup errors.
    pub fn request_leave(&self, user: UserId, channel: ChannelId) -> Result<(), RouterError> {
        let channel = self
            .channel(channel)
            .ok_or(RouterError::ChannelNotFound(channel))?;
        if channel.is_locked() {
            return Err(RouterError::ChannelLocked(channel.id()));
        }
        let handle = self.handle_for(user)?;
        channel.leave(&handle);
        Ok(())
    }

    /// Check whether a user is in the local directory.
    #[must_use]
    pub fn is_registered(&self, user: UserId) -> bool {
        self.shared.users.contains_key(&user)
    }

    /// Get the session handle for a registered user.
    ///
    /// # Errors
    ///
    /// Returns an error if the user is not in the directory.
    pub fn handle_for(&self, user: UserId) -> Result<SessionHandle, RouterError> {
        self.shared
            .users
            .get(&user)
            .map(|e| e.value().clone())
            .ok_or(RouterError::UnknownUser(user))
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            user_count: self.shared.users.len(),
            channel_count: self.shared.channels.len(),
            pending_count: self.shared.pending.lock().expect("pending lock poisoned").len(),
        }
    }

    /// Attach a router listener.
    pub fn add_listener(&self, listener: Arc<dyn RouterListener>) {
        self.shared
            .listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    /// Replace the fatal-fault hook (mainly for embedding and tests).
    pub fn set_fatal_hook(&self, hook: FatalHook) {
        *self.shared.fatal.lock().expect("fatal lock poisoned") = hook;
    }

    /// Spawn the periodic reconnect-key rotation task.
    ///
    /// Keys rotate once per `key_ttl`; each rotation demotes every current
    /// key to previous, issues fresh keys to local sessions, and replicates
    /// them on the control channel.
    pub fn start_key_rotation(&self) -> tokio::task::JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.config.key_ttl;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else { break };
                if shared.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                shared.rotate_keys();
            }
        })
    }

    /// Rotate reconnect keys once, outside the periodic task.
    pub fn rotate_keys(&self) {
        self.shared.rotate_keys();
    }

    /// Validate a presented reconnect key against the two-key window.
    #[must_use]
    pub fn validate_reconnect_key(&self, user: UserId, key: &[u8]) -> bool {
        self.shared.validate_reconnect_key(user, key)
    }

    /// Shut the router down: disconnect every session, close every channel.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Router shutting down");

        let handles: Vec<SessionHandle> =
            self.shared.users.iter().map(|e| e.value().clone()).collect();
        self.shared.users.clear();
        for handle in handles {
            handle.session().disconnected();
        }

        let channels: Vec<Arc<Channel>> =
            self.shared.channels.iter().map(|e| e.value().clone()).collect();
        for channel in channels {
            channel.close();
        }
        self.shared.keys.lock().expect("key lock poisoned").current.clear();
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Users in the local directory.
    pub user_count: usize,
    /// Channels open on this node.
    pub channel_count: usize,
    /// Registration attempts awaiting a validation response.
    pub pending_count: usize,
}

impl RouterShared {
    fn mint_user_id(&self) -> UserId {
        UserId::from_rng(&mut *self.rng.lock().expect("rng lock poisoned"))
    }

    fn mint_key(&self) -> Bytes {
        let mut key = [0u8; KEY_LEN];
        self.rng.lock().expect("rng lock poisoned").fill(&mut key[..]);
        Bytes::copy_from_slice(&key)
    }

    fn drive_validator(
        &self,
        session: Arc<dyn Session>,
        mut validator: Box<dyn Validator>,
    ) -> Result<Registration, RouterError> {
        if let Some(challenge) = validator.next_challenge() {
            if let Err(e) = session.validation_requested(&challenge) {
                warn!(error = %e, "Dropping registration: challenge undeliverable");
                return Err(RouterError::ValidationRejected(
                    "challenge undeliverable".to_string(),
                ));
            }
            let id = self.next_pending.fetch_add(1, Ordering::Relaxed);
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .insert(id, PendingRegistration { session, validator });
            trace!(pending = id, "Validation challenge outstanding");
            Ok(Registration::Challenged(id))
        } else if validator.authenticated() {
            let user = validator.chosen_user().unwrap_or_else(|| self.mint_user_id());
            Ok(Registration::Complete(
                self.complete_registration(session, user),
            ))
        } else {
            session.invalidated("validation failed");
            Err(RouterError::ValidationRejected(
                "validation failed".to_string(),
            ))
        }
    }

    fn complete_registration(&self, session: Arc<dyn Session>, user: UserId) -> SessionHandle {
        let handle = SessionHandle::new(user, session);
        self.users.insert(user, handle.clone());

        self.xmit_control(&ControlFrame::UserJoined { user });
        log_delivery(user, "validated", handle.session().validated(user));
        self.issue_key(&handle);
        self.report_user_joined(user);
        self.fire(|l| l.user_joined(user));

        // The new arrival learns who is already here.
        for other in self.user_snapshot() {
            if other.id() != user {
                log_delivery(
                    user,
                    "user_joined_system",
                    handle.session().user_joined_system(other.id()),
                );
            }
        }
        debug!(user = %user, users = self.users.len(), "User registered");
        handle
    }

    fn issue_key(&self, handle: &SessionHandle) {
        let key = self.mint_key();
        self.keys
            .lock()
            .expect("key lock poisoned")
            .current
            .insert(handle.id(), key.clone());
        log_delivery(
            handle.id(),
            "reconnect_key",
            handle.session().reconnect_key(&key, self.config.key_ttl),
        );
        self.xmit_control(&ControlFrame::ReconnectKey {
            user: handle.id(),
            key,
        });
        trace!(user = %handle.id(), "Issued reconnect key");
    }

    fn rotate_keys(&self) {
        {
            let mut keys = self.keys.lock().expect("key lock poisoned");
            keys.previous = std::mem::take(&mut keys.current);
        }
        let handles = self.user_snapshot();
        let count = handles.len();
        for handle in handles {
            self.issue_key(&handle);
        }
        debug!(users = count, "Rotated reconnect keys");
    }

    fn validate_reconnect_key(&self, user: UserId, key: &[u8]) -> bool {
        let keys = self.keys.lock().expect("key lock poisoned");
        match keys.current.get(&user) {
            Some(current) if current[..] == *key => {
                trace!(user = %user, "Current key validated");
                true
            }
            Some(_) | None => match keys.previous.get(&user) {
                Some(previous) if previous[..] == *key => {
                    trace!(user = %user, "Previous key validated");
                    true
                }
                _ => {
                    debug!(user = %user, "Reconnect key mismatch");
                    false
                }
            },
        }
    }

    /// Snapshot the directory so callbacks never run under the map locks.
    fn user_snapshot(&self) -> Vec<SessionHandle> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    /// Tell every local session except `user` that `user` joined the system.
    fn report_user_joined(&self, user: UserId) {
        for handle in self.user_snapshot() {
            if handle.id() == user {
                continue;
            }
            log_delivery(
                handle.id(),
                "user_joined_system",
                handle.session().user_joined_system(user),
            );
        }
    }

    /// Tell every local session that `user` left the system.
    fn report_user_left(&self, user: UserId) {
        for handle in self.user_snapshot() {
            if handle.id() == user {
                continue;
            }
            log_delivery(
                handle.id(),
                "user_left_system",
                handle.session().user_left_system(user),
            );
        }
    }

    fn xmit_control(&self, frame: &ControlFrame) {
        match codec::encode_control(frame) {
            Ok(buf) => {
                if let Err(e) = self.control.send(buf) {
                    warn!(error = %e, "Control channel send failed");
                }
            }
            Err(e) => warn!(error = %e, "Control frame encode failed"),
        }
    }

    pub(crate) fn fire(&self, f: impl Fn(&dyn RouterListener)) {
        for listener in self.listeners.read().expect("listener lock poisoned").iter() {
            f(listener.as_ref());
        }
    }

    pub(crate) fn fire_channel_data(
        &self,
        channel: ChannelId,
        from: UserId,
        payload: &Bytes,
        reliable: bool,
    ) {
        self.fire(|l| l.channel_data(channel, from, payload, reliable));
    }

    pub(crate) fn remove_channel(&self, id: ChannelId, name: &str) {
        self.channels.remove(&id);
        self.channels_by_name.remove(name);
    }

    pub(crate) fn auto_close_empty(&self) -> bool {
        self.config.auto_close_empty_channels
    }

    fn fatal(&self, msg: &str) {
        (self.fatal.lock().expect("fatal lock poisoned"))(msg);
    }
}

/// Control channel listener; forwards directory gossip into the router.
struct ControlTap {
    router: Weak<RouterShared>,
}

impl TransportChannelListener for ControlTap {
    fn data_arrived(&self, data: Bytes) {
        let Some(router) = self.router.upgrade() else {
            return;
        };
        match codec::decode_control(data) {
            Ok(ControlFrame::UserJoined { user }) => router.report_user_joined(user),
            Ok(ControlFrame::UserLeft { user }) => router.report_user_left(user),
            Ok(ControlFrame::ReconnectKey { user, key }) => {
                router
                    .keys
                    .lock()
                    .expect("key lock poisoned")
                    .current
                    .insert(user, key);
                trace!(user = %user, "Learned peer reconnect key");
            }
            Err(e) => warn!(error = %e, "Dropping malformed control frame"),
        }
    }

    fn channel_closed(&self) {
        let Some(router) = self.router.upgrade() else {
            return;
        };
        router.fatal("Router control channel closed; directory consistency lost");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockSession, PasswordValidator, SessionEvent};
    use crate::validator::ValidatorFactory;
    use arena_transport::LoopbackHub;
    use std::sync::atomic::AtomicUsize;

    fn router(hub: &LoopbackHub) -> ChannelRouter {
        ChannelRouter::new(Arc::new(hub.clone()), RouterConfig::default())
            .expect("router construction")
    }

    fn must_complete(reg: Registration) -> SessionHandle {
        match reg {
            Registration::Complete(handle) => handle,
            Registration::Challenged(_) => panic!("unexpected challenge"),
        }
    }

    #[test]
    fn registration_without_validators_is_immediate() {
        let hub = LoopbackHub::new();
        let router = router(&hub);

        let s1 = MockSession::new();
        let h1 = must_complete(router.register_session(s1.clone()).unwrap());
        assert_eq!(s1.last_validated(), Some(h1.id()));
        assert!(s1.last_reconnect_key().is_some());
        assert!(router.is_registered(h1.id()));

        let s2 = MockSession::new();
        let h2 = must_complete(router.register_session(s2.clone()).unwrap());

        // The veteran hears about the newcomer, and the newcomer is handed
        // the existing directory.
        assert!(s1.events().contains(&SessionEvent::UserJoinedSystem(h2.id())));
        assert!(s2.events().contains(&SessionEvent::UserJoinedSystem(h1.id())));
        assert!(!s2.events().contains(&SessionEvent::UserJoinedSystem(h2.id())));
    }

    #[test]
    fn validator_challenge_round_trip() {
        struct Factory;
        impl ValidatorFactory for Factory {
            fn create_validator(&self) -> Box<dyn Validator> {
                PasswordValidator::new(b"sesame")
            }
        }

        let hub = LoopbackHub::new();
        let router = ChannelRouter::with_validators(
            Arc::new(hub.clone()),
            RouterConfig::default(),
            Arc::new(Factory),
        )
        .unwrap();

        // Wrong password: rejected, session invalidated.
        let bad = MockSession::new();
        let Registration::Challenged(pending) = router.register_session(bad.clone()).unwrap()
        else {
            panic!("expected a challenge");
        };
        assert!(matches!(
            bad.events().first(),
            Some(SessionEvent::ValidationRequested(_))
        ));
        let err = router
            .submit_validation(pending, Bytes::from_static(b"mellon"))
            .unwrap_err();
        assert!(matches!(err, RouterError::ValidationRejected(_)));
        assert!(matches!(
            bad.events().last(),
            Some(SessionEvent::Invalidated(_))
        ));

        // The pending id is consumed either way.
        assert!(matches!(
            router.submit_validation(pending, Bytes::from_static(b"sesame")),
            Err(RouterError::UnknownPending(_))
        ));

        // Right password: registered.
        let good = MockSession::new();
        let Registration::Challenged(pending) = router.register_session(good.clone()).unwrap()
        else {
            panic!("expected a challenge");
        };
        let reg = router
            .submit_validation(pending, Bytes::from_static(b"sesame"))
            .unwrap();
        let handle = must_complete(reg);
        assert_eq!(good.last_validated(), Some(handle.id()));
    }

    #[test]
    fn reconnect_key_window_is_two_generations() {
        let hub = LoopbackHub::new();
        let router = router(&hub);

        let session = MockSession::new();
        let handle = must_complete(router.register_session(session.clone()).unwrap());
        let k1 = session.last_reconnect_key().unwrap();

        router.rotate_keys();
        let k2 = session.last_reconnect_key().unwrap();
        assert_ne!(k1, k2);
        assert!(router.validate_reconnect_key(handle.id(), &k1));
        assert!(router.validate_reconnect_key(handle.id(), &k2));

        router.rotate_keys();
        let k3 = session.last_reconnect_key().unwrap();
        assert!(!router.validate_reconnect_key(handle.id(), &k1));
        assert!(router.validate_reconnect_key(handle.id(), &k2));
        assert!(router.validate_reconnect_key(handle.id(), &k3));
    }

    #[test]
    fn reconnect_to_peer_node_with_replicated_key() {
        let hub = LoopbackHub::new();
        let node_a = router(&hub);
        let node_b = router(&hub);

        let s1 = MockSession::new();
        let handle = must_complete(node_a.register_session(s1.clone()).unwrap());
        let key = s1.last_reconnect_key().unwrap();

        // The connection to node A dies; the client re-attaches to node B,
        // which learned the key off the control channel.
        node_a.deregister(handle.id()).unwrap();
        assert!(s1.events().contains(&SessionEvent::Disconnected));

        let s2 = MockSession::new();
        let recovered = node_b
            .reregister_session(s2.clone(), handle.id(), &key)
            .unwrap();
        assert_eq!(recovered.id(), handle.id());
        assert_eq!(s2.last_validated(), Some(handle.id()));
        assert!(node_b.is_registered(handle.id()));

        // A made-up key must not get in.
        let s3 = MockSession::new();
        assert!(matches!(
            node_b.reregister_session(s3.clone(), handle.id(), b"not-a-key"),
            Err(RouterError::ReconnectRejected)
        ));
        assert!(matches!(
            s3.events().last(),
            Some(SessionEvent::Invalidated(_))
        ));
    }

    #[test]
    fn directory_replicates_across_nodes() {
        let hub = LoopbackHub::new();
        let node_a = router(&hub);
        let node_b = router(&hub);

        let s_a = MockSession::new();
        let h_a = must_complete(node_a.register_session(s_a.clone()).unwrap());

        let s_b = MockSession::new();
        let h_b = must_complete(node_b.register_session(s_b.clone()).unwrap());

        assert!(s_a.events().contains(&SessionEvent::UserJoinedSystem(h_b.id())));

        node_b.deregister(h_b.id()).unwrap();
        assert!(s_a.events().contains(&SessionEvent::UserLeftSystem(h_b.id())));
        let _ = h_a;
    }

    #[test]
    fn control_channel_loss_is_fatal() {
        let hub = LoopbackHub::new();
        let config = RouterConfig::default();
        let control_name = config.control_channel.clone();
        let router = ChannelRouter::new(Arc::new(hub.clone()), config).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let hits = fired.clone();
        router.set_fatal_hook(Box::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }));

        hub.drop_channel(&control_name);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn locked_channel_refuses_session_requests_only() {
        let hub = LoopbackHub::new();
        let router = router(&hub);
        let session = MockSession::new();
        let handle = must_complete(router.register_session(session.clone()).unwrap());

        let arena = router.open_channel("arena").unwrap();
        router.lock_channel(arena.id(), true).unwrap();

        assert!(matches!(
            router.request_join(handle.id(), "arena"),
            Err(RouterError::ChannelLocked(_))
        ));
        assert!(!arena.is_member(handle.id()));

        // The router itself may still place users.
        router.join(handle.id(), arena.id()).unwrap();
        assert!(arena.is_member(handle.id()));

        assert!(matches!(
            router.request_leave(handle.id(), arena.id()),
            Err(RouterError::ChannelLocked(_))
        ));
        router.lock_channel(arena.id(), false).unwrap();
        router.request_leave(handle.id(), arena.id()).unwrap();
        assert!(!arena.is_member(handle.id()));
    }

    #[test]
    fn open_channel_is_find_or_create() {
        let hub = LoopbackHub::new();
        let router = router(&hub);

        let first = router.open_channel("arena").unwrap();
        let second = router.open_channel("arena").unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(router.stats().channel_count, 1);
        assert_eq!(hub.endpoint_count("arena"), 1);
    }

    #[test]
    fn deregister_removes_user_from_channels() {
        let hub = LoopbackHub::new();
        let router = router(&hub);

        let s1 = MockSession::new();
        let h1 = must_complete(router.register_session(s1.clone()).unwrap());
        let s2 = MockSession::new();
        let h2 = must_complete(router.register_session(s2.clone()).unwrap());

        let arena = router.open_channel("arena").unwrap();
        router.join(h1.id(), arena.id()).unwrap();
        router.join(h2.id(), arena.id()).unwrap();

        router.deregister(h1.id()).unwrap();
        assert!(!arena.is_member(h1.id()));
        assert!(s2
            .events()
            .contains(&SessionEvent::UserLeftChannel(arena.id(), h1.id())));
        assert!(matches!(
            router.deregister(h1.id()),
            Err(RouterError::UnknownUser(_))
        ));
    }

    #[test]
    fn shutdown_disconnects_everyone_and_refuses_work() {
        let hub = LoopbackHub::new();
        let router = router(&hub);
        let session = MockSession::new();
        let _handle = must_complete(router.register_session(session.clone()).unwrap());
        router.open_channel("arena").unwrap();

        router.shutdown();
        assert!(session.events().contains(&SessionEvent::Disconnected));
        assert_eq!(router.stats().user_count, 0);
        assert_eq!(router.stats().channel_count, 0);

        assert!(matches!(
            router.register_session(MockSession::new()),
            Err(RouterError::ShutDown)
        ));
        assert!(matches!(
            router.open_channel("arena"),
            Err(RouterError::ShutDown)
        ));
    }

    #[test]
    fn broadcast_spans_nodes_without_echoing_the_sender() {
        let hub = LoopbackHub::new();
        let node_a = router(&hub);
        let node_b = router(&hub);

        let s_a = MockSession::new();
        let h_a = must_complete(node_a.register_session(s_a.clone()).unwrap());
        let s_b = MockSession::new();
        let h_b = must_complete(node_b.register_session(s_b.clone()).unwrap());

        let arena_a = node_a.open_channel("arena").unwrap();
        let arena_b = node_b.open_channel("arena").unwrap();
        node_a.join(h_a.id(), arena_a.id()).unwrap();
        s_a.clear();
        node_b.join(h_b.id(), arena_b.id()).unwrap();

        // The veteran on node A observes the cross-node join; the joiner on
        // node B never observes its own announcement.
        assert!(s_a
            .events()
            .contains(&SessionEvent::UserJoinedChannel(arena_a.id(), h_b.id())));
        assert!(!s_b
            .events()
            .contains(&SessionEvent::UserJoinedChannel(arena_b.id(), h_b.id())));

        arena_a.broadcast_data(h_a.id(), Bytes::from_static(b"fight"), true);
        assert_eq!(s_b.messages(), vec![(h_a.id(), b"fight".to_vec())]);
        assert!(s_a.messages().is_empty());
    }
}
