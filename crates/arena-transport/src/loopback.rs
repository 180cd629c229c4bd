//! In-process transport hub.
//!
//! `LoopbackHub` wires every endpoint of a channel name together inside one
//! process: a send is delivered synchronously to the listeners of every
//! *other* endpoint. Single-node deployments and tests run on it; a real
//! interconnect replaces it behind the same traits.

use crate::traits::{TransportChannel, TransportChannelListener, TransportError, TransportHub};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// An in-process transport hub.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    channels: DashMap<String, Vec<Arc<LoopbackEndpoint>>>,
    next_endpoint_id: AtomicU64,
}

impl LoopbackHub {
    /// Create a new hub with no channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of endpoints currently attached to a channel name.
    #[must_use]
    pub fn endpoint_count(&self, name: &str) -> usize {
        self.inner.channels.get(name).map_or(0, |e| e.len())
    }

    /// Force-close a channel: every endpoint is detached and its listeners
    /// are told the channel closed.
    ///
    /// This models the interconnect failing underneath the routing layer.
    pub fn drop_channel(&self, name: &str) {
        if let Some((_, endpoints)) = self.inner.channels.remove(name) {
            debug!(channel = %name, endpoints = endpoints.len(), "Dropping channel");
            for endpoint in endpoints {
                endpoint.open.store(false, Ordering::SeqCst);
                for listener in endpoint.listeners() {
                    listener.channel_closed();
                }
            }
        }
    }
}

impl TransportHub for LoopbackHub {
    fn open_channel(&self, name: &str) -> Result<Arc<dyn TransportChannel>, TransportError> {
        let endpoint = Arc::new(LoopbackEndpoint {
            name: name.to_string(),
            id: self.inner.next_endpoint_id.fetch_add(1, Ordering::Relaxed),
            hub: Arc::downgrade(&self.inner),
            listeners: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        });

        self.inner
            .channels
            .entry(name.to_string())
            .or_default()
            .push(endpoint.clone());

        debug!(channel = %name, endpoint = endpoint.id, "Opened loopback endpoint");
        Ok(endpoint)
    }
}

/// One attachment to a loopback channel.
struct LoopbackEndpoint {
    name: String,
    id: u64,
    hub: Weak<HubInner>,
    listeners: Mutex<Vec<Arc<dyn TransportChannelListener>>>,
    open: AtomicBool,
}

impl LoopbackEndpoint {
    fn listeners(&self) -> Vec<Arc<dyn TransportChannelListener>> {
        self.listeners.lock().expect("listener lock poisoned").clone()
    }
}

impl TransportChannel for LoopbackEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed(self.name.clone()));
        }
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| TransportError::ChannelClosed(self.name.clone()))?;

        // Snapshot the peer set, then deliver outside the map guard so a
        // listener can open channels on the same hub.
        let peers: Vec<Arc<LoopbackEndpoint>> = hub
            .channels
            .get(&self.name)
            .map(|e| e.iter().filter(|p| p.id != self.id).cloned().collect())
            .unwrap_or_default();

        for peer in peers {
            if !peer.open.load(Ordering::SeqCst) {
                continue;
            }
            for listener in peer.listeners() {
                listener.data_arrived(data.clone());
            }
        }
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn TransportChannelListener>) {
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push(listener);
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            if let Some(mut endpoints) = hub.channels.get_mut(&self.name) {
                endpoints.retain(|e| e.id != self.id);
            }
            // Release the name once the last endpoint detaches.
            hub.channels
                .remove_if(&self.name, |_, endpoints| endpoints.is_empty());
        }
        debug!(channel = %self.name, endpoint = self.id, "Closed loopback endpoint");
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
