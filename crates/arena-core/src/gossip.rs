//! Keyed presence gossip over a single shared transport channel.
//!
//! Every node publishes the users it owns by broadcasting per-user id keys,
//! and tracks the users other nodes publish. Keys age out in two steps,
//! current then previous, so a client holding a slightly stale key can
//! still re-attach to any node. The same channel carries application data
//! addressed per user; multicast frames are decomposed into per-target
//! deliveries at each receiving node.

use arena_protocol::{codec, GossipFrame, ProtocolError, UserId};
use arena_transport::{TransportChannel, TransportChannelListener, TransportError, TransportHub};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Length in bytes of a generated id key.
const KEY_LEN: usize = 16;

/// Gossip errors.
#[derive(Debug, Error)]
pub enum GossipError {
    /// The shared gossip channel failed us.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Gossip configuration.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Name of the shared transport channel all nodes join.
    pub channel: String,
    /// Id key lifetime. Owned keys renew and remote keys expire on a
    /// half-lifetime cadence.
    pub key_timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            channel: "__ID_GOSSIP".to_string(),
            key_timeout: Duration::from_secs(120),
        }
    }
}

/// Observer of gossip presence and data events.
///
/// All methods default to no-ops so implementors pick what they care about.
pub trait GossipListener: Send + Sync {
    /// A user became known, locally created or learned from a peer node.
    fn user_added(&self, user: UserId) {
        let _ = user;
    }

    /// A user was disposed or its keys fully expired.
    fn user_dropped(&self, user: UserId) {
        let _ = user;
    }

    /// A key was issued or learned for a user. Fired for renewals as well
    /// as first keys.
    fn new_user_key(&self, user: UserId, key: &Bytes) {
        let _ = (user, key);
    }

    /// A payload addressed to `to` arrived. Multicast frames surface here
    /// once per target.
    fn data_arrived(&self, to: UserId, from: UserId, payload: &Bytes, reliable: bool) {
        let _ = (to, from, payload, reliable);
    }

    /// An unaddressed broadcast payload arrived.
    fn broadcast_arrived(&self, from: UserId, payload: &Bytes, reliable: bool) {
        let _ = (from, payload, reliable);
    }
}

/// Hook invoked when the gossip channel closes underneath us.
pub type FatalHook = Box<dyn Fn(&str) + Send + Sync>;

fn default_fatal(msg: &str) {
    error!("{msg}");
    std::process::exit(1);
}

struct KeyEntry {
    key: Bytes,
    deadline: Instant,
}

/// Two-generation key table. A key demotes from current to previous when
/// its deadline passes and is dropped entirely one lifetime later.
#[derive(Default)]
struct KeyRegistry {
    current: HashMap<UserId, KeyEntry>,
    previous: HashMap<UserId, KeyEntry>,
}

impl KeyRegistry {
    fn knows(&self, user: UserId) -> bool {
        self.current.contains_key(&user) || self.previous.contains_key(&user)
    }

    fn forget(&mut self, user: UserId) {
        self.current.remove(&user);
        self.previous.remove(&user);
    }
}

/// Presence and per-user data fan-out over one shared gossip channel.
pub struct PresenceGossip {
    shared: Arc<GossipShared>,
}

struct GossipShared {
    channel: Arc<dyn TransportChannel>,
    registry: Mutex<KeyRegistry>,
    owned: Mutex<HashSet<UserId>>,
    listeners: RwLock<Vec<Arc<dyn GossipListener>>>,
    rng: Mutex<StdRng>,
    config: GossipConfig,
    fatal: Mutex<FatalHook>,
}

impl PresenceGossip {
    /// Join the shared gossip channel on the given hub.
    ///
    /// # Errors
    ///
    /// Returns an error if the gossip channel cannot be opened.
    pub fn new(hub: Arc<dyn TransportHub>, config: GossipConfig) -> Result<Self, GossipError> {
        Self::build(hub, config, StdRng::from_entropy())
    }

    /// Like [`PresenceGossip::new`] but with a caller-provided RNG, for
    /// deterministic ids and keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the gossip channel cannot be opened.
    pub fn with_rng(
        hub: Arc<dyn TransportHub>,
        config: GossipConfig,
        rng: StdRng,
    ) -> Result<Self, GossipError> {
        Self::build(hub, config, rng)
    }

    fn build(
        hub: Arc<dyn TransportHub>,
        config: GossipConfig,
        rng: StdRng,
    ) -> Result<Self, GossipError> {
        let channel = hub.open_channel(&config.channel)?;
        let shared = Arc::new(GossipShared {
            channel: channel.clone(),
            registry: Mutex::new(KeyRegistry::default()),
            owned: Mutex::new(HashSet::new()),
            listeners: RwLock::new(Vec::new()),
            rng: Mutex::new(rng),
            config,
            fatal: Mutex::new(Box::new(default_fatal)),
        });
        channel.add_listener(Arc::new(GossipTap {
            gossip: Arc::downgrade(&shared),
        }));
        info!(channel = %shared.config.channel, "Presence gossip ready");
        Ok(Self { shared })
    }

    /// Mint a new user owned by this node.
    ///
    /// The id stays unannounced until [`PresenceGossip::initialize_id_key`]
    /// issues its first key; peers learn of a user and its key together.
    pub fn create_user(&self) -> UserId {
        let user = UserId::from_rng(&mut *self.shared.rng.lock().expect("rng lock poisoned"));
        self.shared
            .owned
            .lock()
            .expect("owned lock poisoned")
            .insert(user);
        debug!(user = %user, "Created user");
        user
    }

    /// Issue a fresh id key for an owned user and publish it.
    ///
    /// Returns the new key so the caller can hand it to the client.
    pub fn initialize_id_key(&self, user: UserId) -> Bytes {
        self.shared.issue_key(user)
    }

    /// Attempt to re-attach `user` with a previously issued key.
    ///
    /// Accepts the current or previous key. On success this node takes
    /// ownership of the user, the matched key stays (or becomes) current
    /// with a refreshed deadline, and that same key is re-announced so
    /// peers converge on the key the client already holds.
    pub fn reregister_user(&self, user: UserId, key: &[u8]) -> bool {
        let Some(matched) = self.shared.touch_key(user, key) else {
            debug!(user = %user, "Reregistration key mismatch");
            return false;
        };
        self.shared
            .owned
            .lock()
            .expect("owned lock poisoned")
            .insert(user);
        self.shared.xmit(&GossipFrame::IdKey {
            user,
            key: matched.clone(),
        });
        self.shared.fire(|l| l.new_user_key(user, &matched));
        debug!(user = %user, "User reregistered");
        true
    }

    /// Drop a user: forget its keys, announce the destruction to peers,
    /// and notify listeners.
    pub fn dispose_user(&self, user: UserId) {
        self.shared
            .owned
            .lock()
            .expect("owned lock poisoned")
            .remove(&user);
        let known = {
            let mut registry = self.shared.registry.lock().expect("registry lock poisoned");
            let known = registry.knows(user);
            registry.forget(user);
            known
        };
        self.shared.xmit(&GossipFrame::IdDestroyed { user });
        if known {
            self.shared.fire(|l| l.user_dropped(user));
        }
        debug!(user = %user, "Disposed user");
    }

    /// Whether any key generation is held for this user.
    #[must_use]
    pub fn is_tracked(&self, user: UserId) -> bool {
        self.shared
            .registry
            .lock()
            .expect("registry lock poisoned")
            .knows(user)
    }

    /// Number of users owned by this node.
    #[must_use]
    pub fn owned_count(&self) -> usize {
        self.shared.owned.lock().expect("owned lock poisoned").len()
    }

    /// Send a payload to one user, wherever it lives.
    pub fn unicast_data(&self, from: UserId, to: UserId, payload: Bytes, reliable: bool) {
        self.shared.xmit(&GossipFrame::Unicast {
            from,
            to,
            payload: payload.clone(),
            reliable,
        });
        self.shared.fire(|l| l.data_arrived(to, from, &payload, reliable));
    }

    /// Send a payload to an explicit recipient list, decomposed into one
    /// delivery per target at each node.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient list exceeds the wire limit;
    /// nothing is sent in that case.
    pub fn multicast_data(
        &self,
        from: UserId,
        to: &[UserId],
        payload: Bytes,
        reliable: bool,
    ) -> Result<(), GossipError> {
        if to.len() > codec::MAX_MULTICAST_TARGETS {
            return Err(ProtocolError::TooManyRecipients(to.len()).into());
        }
        self.shared.xmit(&GossipFrame::Multicast {
            from,
            to: to.to_vec(),
            payload: payload.clone(),
            reliable,
        });
        for target in to {
            self.shared
                .fire(|l| l.data_arrived(*target, from, &payload, reliable));
        }
        Ok(())
    }

    /// Send an unaddressed payload to every node.
    pub fn broadcast_data(&self, from: UserId, payload: Bytes, reliable: bool) {
        self.shared.xmit(&GossipFrame::Broadcast {
            from,
            payload: payload.clone(),
            reliable,
        });
        self.shared.fire(|l| l.broadcast_arrived(from, &payload, reliable));
    }

    /// Renew the keys of every owned user.
    pub fn renew_keys(&self) {
        let owned: Vec<UserId> = self
            .shared
            .owned
            .lock()
            .expect("owned lock poisoned")
            .iter()
            .copied()
            .collect();
        for user in &owned {
            self.shared.issue_key(*user);
        }
        debug!(users = owned.len(), "Renewed id keys");
    }

    /// Age the registry: demote current keys past their deadline to
    /// previous, and drop previous keys past theirs. A user whose last key
    /// is dropped is reported to listeners.
    pub fn expire_keys(&self) {
        let now = Instant::now();
        let dropped = {
            let mut registry = self.shared.registry.lock().expect("registry lock poisoned");

            let expired: Vec<UserId> = registry
                .current
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(u, _)| *u)
                .collect();
            for user in expired {
                if let Some(mut entry) = registry.current.remove(&user) {
                    entry.deadline = now + self.shared.config.key_timeout;
                    registry.previous.insert(user, entry);
                    trace!(user = %user, "Id key demoted");
                }
            }

            let mut dropped = Vec::new();
            registry.previous.retain(|user, entry| {
                if entry.deadline <= now {
                    dropped.push(*user);
                    false
                } else {
                    true
                }
            });
            dropped.retain(|user| !registry.current.contains_key(user));
            dropped
        };
        for user in dropped {
            debug!(user = %user, "Id keys expired; dropping user");
            self.shared.fire(|l| l.user_dropped(user));
        }
    }

    /// Spawn the periodic renewal and expiry task, running at half the key
    /// lifetime so an owned key always renews before it can demote.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.config.key_timeout / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else { break };
                let gossip = PresenceGossip { shared };
                gossip.renew_keys();
                gossip.expire_keys();
            }
        })
    }

    /// Attach a gossip listener.
    pub fn add_listener(&self, listener: Arc<dyn GossipListener>) {
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
}

impl GossipShared {
    /// Mint and register a fresh key for `user`, then publish it.
    fn issue_key(&self, user: UserId) -> Bytes {
        let mut buf = [0u8; KEY_LEN];
        self.rng.lock().expect("rng lock poisoned").fill(&mut buf[..]);
        let key = Bytes::copy_from_slice(&buf);
        self.register_key(user, key.clone());
        self.xmit(&GossipFrame::IdKey {
            user,
            key: key.clone(),
        });
        trace!(user = %user, "Issued id key");
        key
    }

    /// Match `key` against the user's two live generations. On a match the
    /// matched key stays (or returns to) current with a fresh deadline; a
    /// key resurrected from previous pushes the newer one back down.
    fn touch_key(&self, user: UserId, key: &[u8]) -> Option<Bytes> {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let deadline = Instant::now() + self.config.key_timeout;

        if let Some(entry) = registry.current.get_mut(&user) {
            if entry.key[..] == *key {
                entry.deadline = deadline;
                return Some(entry.key.clone());
            }
        }
        match registry.previous.remove(&user) {
            Some(entry) if entry.key[..] == *key => {
                let matched = entry.key.clone();
                if let Some(newer) = registry.current.remove(&user) {
                    registry.previous.insert(user, newer);
                }
                registry.current.insert(
                    user,
                    KeyEntry {
                        key: matched.clone(),
                        deadline,
                    },
                );
                Some(matched)
            }
            Some(entry) => {
                registry.previous.insert(user, entry);
                None
            }
            None => None,
        }
    }

    /// Record a key as the user's current one, demoting the old current.
    /// The first key seen for a user announces the user to listeners.
    fn register_key(&self, user: UserId, key: Bytes) {
        let added = {
            let mut registry = self.registry.lock().expect("registry lock poisoned");
            let added = !registry.knows(user);
            let deadline = Instant::now() + self.config.key_timeout;
            if let Some(old) = registry.current.remove(&user) {
                registry.previous.insert(user, old);
            }
            registry.current.insert(user, KeyEntry { key: key.clone(), deadline });
            added
        };
        if added {
            self.fire(|l| l.user_added(user));
        }
        self.fire(|l| l.new_user_key(user, &key));
    }

    fn xmit(&self, frame: &GossipFrame) {
        match codec::encode_gossip(frame) {
            Ok(buf) => {
                if let Err(e) = self.channel.send(buf) {
                    warn!(error = %e, "Gossip send failed");
                }
            }
            Err(e) => warn!(error = %e, "Gossip frame encode failed"),
        }
    }

    fn fire(&self, f: impl Fn(&dyn GossipListener)) {
        for listener in self.listeners.read().expect("listener lock poisoned").iter() {
            f(listener.as_ref());
        }
    }

    fn fatal(&self, msg: &str) {
        (self.fatal.lock().expect("fatal lock poisoned"))(msg);
    }
}

/// Gossip channel listener; forwards inbound frames into the registry.
struct GossipTap {
    gossip: Weak<GossipShared>,
}

impl TransportChannelListener for GossipTap {
    fn data_arrived(&self, data: Bytes) {
        let Some(gossip) = self.gossip.upgrade() else {
            return;
        };
        match codec::decode_gossip(data) {
            Ok(GossipFrame::IdKey { user, key }) => {
                gossip.register_key(user, key);
                trace!(user = %user, "Learned peer id key");
            }
            Ok(GossipFrame::IdDestroyed { user }) => {
                let known = {
                    let mut registry = gossip.registry.lock().expect("registry lock poisoned");
                    let known = registry.knows(user);
                    registry.forget(user);
                    known
                };
                gossip.owned.lock().expect("owned lock poisoned").remove(&user);
                if known {
                    gossip.fire(|l| l.user_dropped(user));
                }
            }
            Ok(GossipFrame::Unicast {
                from,
                to,
                payload,
                reliable,
            }) => gossip.fire(|l| l.data_arrived(to, from, &payload, reliable)),
            Ok(GossipFrame::Multicast {
                from,
                to,
                payload,
                reliable,
            }) => {
                for target in to {
                    gossip.fire(|l| l.data_arrived(target, from, &payload, reliable));
                }
            }
            Ok(GossipFrame::Broadcast {
                from,
                payload,
                reliable,
            }) => gossip.fire(|l| l.broadcast_arrived(from, &payload, reliable)),
            Err(e) => warn!(error = %e, "Dropping malformed gossip frame"),
        }
    }

    fn channel_closed(&self) {
        let Some(gossip) = self.gossip.upgrade() else {
            return;
        };
        gossip.fatal("Presence gossip channel closed; peer state lost");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_transport::{LoopbackHub, TransportChannel, TransportHub};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingListener {
        added: Mutex<Vec<UserId>>,
        dropped: Mutex<Vec<UserId>>,
        keys: Mutex<Vec<(UserId, Vec<u8>)>>,
        data: Mutex<Vec<(UserId, UserId, Vec<u8>)>>,
        broadcasts: Mutex<Vec<(UserId, Vec<u8>)>>,
    }

    impl RecordingListener {
        fn added(&self) -> Vec<UserId> {
            self.added.lock().unwrap().clone()
        }

        fn dropped(&self) -> Vec<UserId> {
            self.dropped.lock().unwrap().clone()
        }

        fn data(&self) -> Vec<(UserId, UserId, Vec<u8>)> {
            self.data.lock().unwrap().clone()
        }
    }

    impl GossipListener for RecordingListener {
        fn user_added(&self, user: UserId) {
            self.added.lock().unwrap().push(user);
        }

        fn user_dropped(&self, user: UserId) {
            self.dropped.lock().unwrap().push(user);
        }

        fn new_user_key(&self, user: UserId, key: &Bytes) {
            self.keys.lock().unwrap().push((user, key.to_vec()));
        }

        fn data_arrived(&self, to: UserId, from: UserId, payload: &Bytes, _reliable: bool) {
            self.data.lock().unwrap().push((to, from, payload.to_vec()));
        }

        fn broadcast_arrived(&self, from: UserId, payload: &Bytes, _reliable: bool) {
            self.broadcasts.lock().unwrap().push((from, payload.to_vec()));
        }
    }

    fn gossip(hub: &LoopbackHub) -> (PresenceGossip, Arc<RecordingListener>) {
        let gossip = PresenceGossip::new(Arc::new(hub.clone()), GossipConfig::default())
            .expect("gossip construction");
        let listener = Arc::new(RecordingListener::default());
        gossip.add_listener(listener.clone());
        (gossip, listener)
    }

    #[test]
    fn users_are_announced_with_their_first_key_not_before() {
        let hub = LoopbackHub::new();
        let (node_a, _) = gossip(&hub);
        let (node_b, heard_b) = gossip(&hub);

        // Creation alone is local; peers learn nothing yet.
        let user = node_a.create_user();
        assert_eq!(node_a.owned_count(), 1);
        assert!(!node_a.is_tracked(user));
        assert!(!node_b.is_tracked(user));
        assert!(heard_b.added().is_empty());

        // The first key carries the announcement.
        let key = node_a.initialize_id_key(user);
        assert!(node_a.is_tracked(user));
        assert!(node_b.is_tracked(user));
        assert_eq!(heard_b.added(), vec![user]);
        let keys = heard_b.keys.lock().unwrap();
        assert_eq!(keys.as_slice(), &[(user, key.to_vec())]);
    }

    #[test]
    fn reregistration_accepts_only_the_last_two_keys() {
        let hub = LoopbackHub::new();
        let (node_a, _) = gossip(&hub);
        let (node_b, _) = gossip(&hub);

        let user = node_a.create_user();
        let k1 = node_a.initialize_id_key(user);
        let k2 = node_a.initialize_id_key(user);
        // k1 demoted to previous by k2; both are within the window.
        assert!(node_b.reregister_user(user, &k1));
        assert!(node_b.reregister_user(user, &k2));

        let k3 = node_a.initialize_id_key(user);
        let k4 = node_a.initialize_id_key(user);
        assert!(!node_b.reregister_user(user, &k1));
        assert!(!node_b.reregister_user(user, &k2));
        assert!(node_b.reregister_user(user, &k3));
        assert!(node_b.reregister_user(user, &k4));
    }

    #[test]
    fn reregistration_takes_ownership() {
        let hub = LoopbackHub::new();
        let (node_a, _) = gossip(&hub);
        let (node_b, _) = gossip(&hub);

        let user = node_a.create_user();
        let key = node_a.initialize_id_key(user);
        assert_eq!(node_b.owned_count(), 0);
        assert!(node_b.reregister_user(user, &key));
        assert_eq!(node_b.owned_count(), 1);
        assert!(!node_b.reregister_user(user, b"bogus"));
    }

    #[test]
    fn reregistration_preserves_the_presented_key() {
        let hub = LoopbackHub::new();
        let (node, heard) = gossip(&hub);

        let user = node.create_user();
        let key = node.initialize_id_key(user);
        assert!(node.reregister_user(user, &key));

        // The accepted key is re-announced, not replaced.
        let last = heard.keys.lock().unwrap().last().cloned();
        assert_eq!(last, Some((user, key.to_vec())));

        // After one renewal the client's key is merely previous and must
        // still get back in; only after a second renewal is it gone.
        node.renew_keys();
        assert!(node.reregister_user(user, &key));
        node.renew_keys();
        node.renew_keys();
        assert!(!node.reregister_user(user, &key));
    }

    #[test]
    fn dispose_drops_the_user_everywhere() {
        let hub = LoopbackHub::new();
        let (node_a, heard_a) = gossip(&hub);
        let (node_b, heard_b) = gossip(&hub);

        let user = node_a.create_user();
        node_a.initialize_id_key(user);
        node_a.dispose_user(user);

        assert!(!node_a.is_tracked(user));
        assert!(!node_b.is_tracked(user));
        assert_eq!(heard_a.dropped(), vec![user]);
        assert_eq!(heard_b.dropped(), vec![user]);
        assert_eq!(node_a.owned_count(), 0);
    }

    #[test]
    fn multicast_is_decomposed_per_target() {
        let hub = LoopbackHub::new();
        let (node_a, heard_a) = gossip(&hub);
        let (_node_b, heard_b) = gossip(&hub);

        let from = node_a.create_user();
        let t1 = UserId::random();
        let t2 = UserId::random();
        node_a
            .multicast_data(from, &[t1, t2], Bytes::from_static(b"go"), true)
            .unwrap();

        // Each node surfaces one delivery per target.
        for heard in [&heard_a, &heard_b] {
            assert_eq!(
                heard.data(),
                vec![
                    (t1, from, b"go".to_vec()),
                    (t2, from, b"go".to_vec()),
                ]
            );
        }

        let too_many: Vec<UserId> = (0..=codec::MAX_MULTICAST_TARGETS)
            .map(|_| UserId::random())
            .collect();
        assert!(matches!(
            node_a.multicast_data(from, &too_many, Bytes::new(), true),
            Err(GossipError::Protocol(ProtocolError::TooManyRecipients(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_keys_demote_then_drop() {
        let hub = LoopbackHub::new();
        let (node_a, _) = gossip(&hub);
        let (node_b, heard_b) = gossip(&hub);
        let timeout = GossipConfig::default().key_timeout;

        let user = node_a.create_user();
        let key = node_a.initialize_id_key(user);

        // One lifetime passes with no renewal from the owner: the key
        // demotes but still re-attaches.
        tokio::time::advance(timeout).await;
        node_b.expire_keys();
        assert!(node_b.is_tracked(user));
        assert!(node_b.reregister_user(user, &key));
        node_b.dispose_user(user);

        // Two lifetimes with no renewal: the user disappears.
        let user = node_a.create_user();
        node_a.initialize_id_key(user);
        tokio::time::advance(timeout).await;
        node_b.expire_keys();
        tokio::time::advance(timeout).await;
        node_b.expire_keys();
        assert!(!node_b.is_tracked(user));
        assert_eq!(heard_b.dropped().last(), Some(&user));
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_keeps_remote_users_alive() {
        let hub = LoopbackHub::new();
        let (node_a, _) = gossip(&hub);
        let (node_b, heard_b) = gossip(&hub);
        let timeout = GossipConfig::default().key_timeout;

        let user = node_a.create_user();
        node_a.initialize_id_key(user);
        for _ in 0..4 {
            tokio::time::advance(timeout / 2).await;
            node_a.renew_keys();
            node_b.expire_keys();
        }
        assert!(node_b.is_tracked(user));
        assert!(heard_b.dropped().is_empty());
    }

    #[test]
    fn malformed_inbound_frames_are_dropped() {
        let hub = LoopbackHub::new();
        let (_node, heard) = gossip(&hub);

        let raw = hub
            .open_channel(&GossipConfig::default().channel)
            .unwrap();
        // Unknown opcode, then an id-key frame cut off mid-id.
        raw.send(Bytes::from_static(&[0xff, 0x01, 0x02])).unwrap();
        raw.send(Bytes::from_static(&[0x01, 0x00])).unwrap();

        assert!(heard.added().is_empty());
        assert!(heard.keys.lock().unwrap().is_empty());
        assert!(heard.data().is_empty());
        assert!(heard.broadcasts.lock().unwrap().is_empty());
    }

    #[test]
    fn gossip_channel_loss_is_fatal() {
        let hub = LoopbackHub::new();
        let config = GossipConfig::default();
        let channel_name = config.channel.clone();
        let gossip = PresenceGossip::new(Arc::new(hub.clone()), config).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let hits = fired.clone();
        gossip.set_fatal_hook(Box::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }));

        hub.drop_channel(&channel_name);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
