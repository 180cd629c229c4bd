//! Transport abstraction traits.
//!
//! These traits define the interface the routing core consumes, keeping it
//! agnostic of how buffers actually move between nodes. Sends are blocking,
//! bounded operations; listener callbacks are serialized per channel but may
//! run concurrently across channels.

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel has been closed and can no longer carry data.
    #[error("Transport channel closed: {0}")]
    ChannelClosed(String),

    /// The hub could not open a channel with this name.
    #[error("Failed to open channel {0}: {1}")]
    OpenFailed(String, String),

    /// A send could not be completed.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Listener for inbound traffic on a transport channel.
///
/// `data_arrived` is invoked once per datagram sent by a *remote* endpoint;
/// a channel never echoes a node's own sends back to it. Local fan-out is
/// the routing layer's job.
pub trait TransportChannelListener: Send + Sync {
    /// A buffer arrived from a peer node.
    fn data_arrived(&self, data: Bytes);

    /// The channel closed underneath us.
    fn channel_closed(&self);
}

/// One endpoint of a named inter-node broadcast channel.
pub trait TransportChannel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &str;

    /// Send one buffer to every peer endpoint of this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or the send fails; callers
    /// treat individual send failures as non-fatal and log them.
    fn send(&self, data: Bytes) -> Result<(), TransportError>;

    /// Send a header and payload as one datagram without concatenating them
    /// at the call site.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`send`](Self::send).
    fn send_vectored(&self, bufs: &[Bytes]) -> Result<(), TransportError> {
        let total: usize = bufs.iter().map(Bytes::len).sum();
        let mut joined = bytes::BytesMut::with_capacity(total);
        for buf in bufs {
            joined.extend_from_slice(buf);
        }
        self.send(joined.freeze())
    }

    /// Attach a listener for inbound data and closure.
    fn add_listener(&self, listener: Arc<dyn TransportChannelListener>);

    /// Detach this endpoint from the channel.
    ///
    /// Peers are unaffected; only this endpoint stops sending and receiving.
    fn close(&self);

    /// Check whether this endpoint is still attached.
    fn is_open(&self) -> bool;
}

/// Factory for transport channels, one per deployment interconnect.
pub trait TransportHub: Send + Sync {
    /// Open (or attach to) the named channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the interconnect cannot provide the channel.
    fn open_channel(&self, name: &str) -> Result<Arc<dyn TransportChannel>, TransportError>;
}
