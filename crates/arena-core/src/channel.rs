//! A named pub/sub channel spanning server nodes.
//!
//! Each node holds its own view of a channel: the local member table plus
//! one transport endpoint. Frames sent on the transport reach every peer
//! node's view but never echo back to the sender, so every operation both
//! transmits the frame and performs the matching local delivery itself.

use crate::router::RouterShared;
use crate::session::{log_delivery, SessionHandle};
use arena_protocol::{codec, ChannelFrame, ChannelId, ProtocolError, UserId};
use arena_transport::{TransportChannel, TransportChannelListener};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace, warn};

/// One node's view of a named channel.
pub struct Channel {
    id: ChannelId,
    name: String,
    transport: Arc<dyn TransportChannel>,
    members: Mutex<HashMap<UserId, SessionHandle>>,
    locked: AtomicBool,
    router: Weak<RouterShared>,
}

impl Channel {
    pub(crate) fn open(
        router: Weak<RouterShared>,
        transport: Arc<dyn TransportChannel>,
        name: &str,
    ) -> Arc<Self> {
        let channel = Arc::new(Self {
            id: ChannelId::next(),
            name: name.to_string(),
            transport: transport.clone(),
            members: Mutex::new(HashMap::new()),
            locked: AtomicBool::new(false),
            router,
        });
        transport.add_listener(Arc::new(ChannelTap {
            channel: Arc::downgrade(&channel),
        }));
        channel
    }

    /// Node-local channel id.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Channel name, shared across nodes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether session-originated joins and leaves are refused.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Set the lock flag. Router-initiated membership changes ignore it.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
        debug!(channel = %self.name, locked, "Channel lock changed");
    }

    /// Number of local members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.lock().expect("member lock poisoned").len()
    }

    /// Whether `user` is a local member.
    #[must_use]
    pub fn is_member(&self, user: UserId) -> bool {
        self.members
            .lock()
            .expect("member lock poisoned")
            .contains_key(&user)
    }

    /// Ids of the local members.
    #[must_use]
    pub fn member_ids(&self) -> Vec<UserId> {
        self.members
            .lock()
            .expect("member lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Add a session to this channel. Idempotent for existing members.
    ///
    /// The join is announced on the transport before local state changes,
    /// so the joiner never observes its own join announcement. The joiner
    /// then learns the prior local member list, and those members learn of
    /// the joiner. All session callbacks are best-effort.
    pub fn join(&self, handle: &SessionHandle) {
        if self.is_member(handle.id()) {
            return;
        }
        self.send_frame(&ChannelFrame::UserJoined { user: handle.id() });

        log_delivery(
            handle.id(),
            "joined_channel",
            handle.session().joined_channel(self.id, &self.name),
        );

        let existing = self.member_snapshot();
        for member in &existing {
            log_delivery(
                handle.id(),
                "user_joined_channel",
                handle.session().user_joined_channel(self.id, member.id()),
            );
        }
        for member in &existing {
            log_delivery(
                member.id(),
                "user_joined_channel",
                member.session().user_joined_channel(self.id, handle.id()),
            );
        }

        self.members
            .lock()
            .expect("member lock poisoned")
            .insert(handle.id(), handle.clone());
        if let Some(router) = self.router.upgrade() {
            router.fire(|l| l.user_joined_channel(handle.id(), self.id));
        }
        debug!(channel = %self.name, user = %handle.id(), "Member joined");
    }

    /// Remove a session from this channel. A no-op for non-members.
    pub fn leave(&self, handle: &SessionHandle) {
        if self
            .members
            .lock()
            .expect("member lock poisoned")
            .remove(&handle.id())
            .is_none()
        {
            return;
        }
        self.send_frame(&ChannelFrame::UserLeft { user: handle.id() });

        log_delivery(
            handle.id(),
            "left_channel",
            handle.session().left_channel(self.id),
        );
        let remaining = self.member_snapshot();
        for member in &remaining {
            log_delivery(
                member.id(),
                "user_left_channel",
                member.session().user_left_channel(self.id, handle.id()),
            );
        }
        if let Some(router) = self.router.upgrade() {
            router.fire(|l| l.user_left_channel(handle.id(), self.id));
        }
        debug!(channel = %self.name, user = %handle.id(), "Member left");

        if remaining.is_empty() {
            if let Some(router) = self.router.upgrade() {
                if router.auto_close_empty() {
                    debug!(channel = %self.name, "Last member left; closing channel");
                    self.close();
                }
            }
        }
    }

    /// Send a payload to a single recipient.
    ///
    /// The frame goes out on the transport for peer nodes; if the recipient
    /// is local it is delivered directly. An unknown recipient is dropped
    /// silently so that remote recipients keep working.
    pub fn unicast_data(&self, from: UserId, to: UserId, payload: Bytes, reliable: bool) {
        self.send_frame(&ChannelFrame::Unicast {
            from,
            to,
            payload: payload.clone(),
            reliable,
        });
        self.deliver_local(from, to, &payload, reliable);
        if let Some(router) = self.router.upgrade() {
            router.fire_channel_data(self.id, from, &payload, reliable);
        }
    }

    /// Send a payload to an explicit recipient list.
    ///
    /// Local recipients get the payload directly; remote ones via the
    /// transport frame. `report_to_listeners` controls whether router
    /// listeners observe the payload, letting callers suppress reports for
    /// relayed traffic they have already reported.
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
        report_to_listeners: bool,
    ) -> Result<(), ProtocolError> {
        if to.len() > codec::MAX_MULTICAST_TARGETS {
            return Err(ProtocolError::TooManyRecipients(to.len()));
        }
        self.send_frame(&ChannelFrame::Multicast {
            from,
            to: to.to_vec(),
            payload: payload.clone(),
            reliable,
        });
        for target in to {
            self.deliver_local(from, *target, &payload, reliable);
        }
        if report_to_listeners {
            if let Some(router) = self.router.upgrade() {
                router.fire_channel_data(self.id, from, &payload, reliable);
            }
        }
        Ok(())
    }

    /// Send a payload to every member except the sender.
    pub fn broadcast_data(&self, from: UserId, payload: Bytes, reliable: bool) {
        self.send_frame(&ChannelFrame::Broadcast {
            from,
            payload: payload.clone(),
            reliable,
        });
        self.fan_out_local(from, &payload, reliable);
        if let Some(router) = self.router.upgrade() {
            router.fire_channel_data(self.id, from, &payload, reliable);
        }
    }

    /// Close this node's view: local members are told they left, and the
    /// channel disappears from the router's registry.
    pub fn close(&self) {
        self.transport.close();
        self.notify_closed();
    }

    fn notify_closed(&self) {
        let members: Vec<SessionHandle> = {
            let mut members = self.members.lock().expect("member lock poisoned");
            members.drain().map(|(_, handle)| handle).collect()
        };
        for member in &members {
            log_delivery(
                member.id(),
                "left_channel",
                member.session().left_channel(self.id),
            );
        }
        if let Some(router) = self.router.upgrade() {
            router.remove_channel(self.id, &self.name);
        }
        debug!(channel = %self.name, "Channel closed");
    }

    fn member_snapshot(&self) -> Vec<SessionHandle> {
        self.members
            .lock()
            .expect("member lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Deliver to every local member but the sender.
    fn fan_out_local(&self, from: UserId, payload: &Bytes, reliable: bool) {
        for member in self.member_snapshot() {
            if member.id() == from {
                continue;
            }
            log_delivery(
                member.id(),
                "message_received",
                member
                    .session()
                    .message_received(self.id, from, payload, reliable),
            );
        }
    }

    fn deliver_local(&self, from: UserId, to: UserId, payload: &Bytes, reliable: bool) {
        let member = self
            .members
            .lock()
            .expect("member lock poisoned")
            .get(&to)
            .cloned();
        match member {
            Some(member) => log_delivery(
                to,
                "message_received",
                member
                    .session()
                    .message_received(self.id, from, payload, reliable),
            ),
            None => trace!(channel = %self.name, to = %to, "Recipient not local; dropped"),
        }
    }

    fn send_frame(&self, frame: &ChannelFrame) {
        match codec::encode_channel(frame) {
            Ok(buf) => {
                if let Err(e) = self.transport.send(buf) {
                    warn!(channel = %self.name, error = %e, "Transport send failed");
                }
            }
            Err(e) => warn!(channel = %self.name, error = %e, "Frame encode failed"),
        }
    }

    /// A frame arrived from a peer node's view of this channel.
    fn data_arrived(&self, data: Bytes) {
        match codec::decode_channel(data) {
            Ok(ChannelFrame::UserJoined { user }) => {
                for member in self.member_snapshot() {
                    log_delivery(
                        member.id(),
                        "user_joined_channel",
                        member.session().user_joined_channel(self.id, user),
                    );
                }
            }
            Ok(ChannelFrame::UserLeft { user }) => {
                for member in self.member_snapshot() {
                    log_delivery(
                        member.id(),
                        "user_left_channel",
                        member.session().user_left_channel(self.id, user),
                    );
                }
            }
            Ok(ChannelFrame::Unicast {
                from,
                to,
                payload,
                reliable,
            }) => self.deliver_local(from, to, &payload, reliable),
            Ok(ChannelFrame::Multicast {
                from,
                to,
                payload,
                reliable,
            }) => {
                for target in to {
                    self.deliver_local(from, target, &payload, reliable);
                }
            }
            Ok(ChannelFrame::Broadcast {
                from,
                payload,
                reliable,
            }) => self.fan_out_local(from, &payload, reliable),
            Err(e) => warn!(channel = %self.name, error = %e, "Dropping malformed channel frame"),
        }
    }
}

/// Transport listener bridging inbound frames into the channel view.
struct ChannelTap {
    channel: Weak<Channel>,
}

impl TransportChannelListener for ChannelTap {
    fn data_arrived(&self, data: Bytes) {
        if let Some(channel) = self.channel.upgrade() {
            channel.data_arrived(data);
        }
    }

    fn channel_closed(&self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.notify_closed();
        }
    }
}
